use crate::apis::com::atproto::repo::is_local_repo;
use crate::apis::ApiError;
use crate::config::ServerConfig;
use crate::SharedActorStore;
use rocket::{Responder, State};

#[derive(Responder)]
#[response(status = 200, content_type = "application/vnd.ipld.car")]
pub struct CarResponder(Vec<u8>);

async fn inner_get_repo(
    did: String,
    since: Option<String>,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
) -> Result<Vec<u8>, ApiError> {
    if !is_local_repo(&did, cfg) {
        return Err(ApiError::RepoNotFound(did));
    }
    let store = actor_store.actor_store.read().await;
    store.export_car(since.as_deref()).map_err(|err| {
        tracing::error!("repo export failed: {err:?}");
        ApiError::InternalServerError
    })
}

/// Download a repository export as a CAR file, optionally as a diff since a
/// previous revision.
#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.sync.getRepo?<did>&<since>")]
pub async fn get_repo(
    did: String,
    since: Option<String>,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> Result<CarResponder, ApiError> {
    inner_get_repo(did, since, cfg, actor_store)
        .await
        .map(CarResponder)
}
