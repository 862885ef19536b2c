use crate::apis::com::atproto::repo::is_local_repo;
use crate::apis::ApiError;
use crate::config::ServerConfig;
use crate::SharedActorStore;
use rocket::serde::json::Json;
use rocket::State;

#[derive(Debug, Serialize)]
pub struct GetLatestCommitOutput {
    pub cid: String,
    pub rev: String,
}

/// Cheap probe relays use to decide whether a full `getRepo` is needed.
#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.sync.getLatestCommit?<did>")]
pub async fn get_latest_commit(
    did: String,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> Result<Json<GetLatestCommitOutput>, ApiError> {
    if !is_local_repo(&did, cfg) {
        return Err(ApiError::RepoNotFound(did));
    }
    let store = actor_store.actor_store.read().await;
    let repo = store.repo().map_err(|err| {
        tracing::error!("could not load repo: {err:?}");
        ApiError::InternalServerError
    })?;
    Ok(Json(GetLatestCommitOutput {
        cid: repo.cid.to_string(),
        rev: repo.rev().to_string(),
    }))
}
