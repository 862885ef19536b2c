use crate::apis::com::atproto::repo::is_local_repo;
use crate::apis::ApiError;
use crate::config::ServerConfig;
use crate::SharedActorStore;
use rocket::serde::json::Json;
use rocket::State;

#[derive(Debug, Serialize)]
pub struct ListBlobsOutput {
    pub cids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.sync.listBlobs?<did>&<limit>&<cursor>")]
pub async fn list_blobs(
    did: String,
    limit: Option<u16>,
    cursor: Option<String>,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> Result<Json<ListBlobsOutput>, ApiError> {
    if !is_local_repo(&did, cfg) {
        return Err(ApiError::RepoNotFound(did));
    }
    let limit = limit.unwrap_or(500).min(1000) as usize;
    let store = actor_store.actor_store.read().await;
    let blobs = store.blob.list(limit, cursor.as_deref()).map_err(|err| {
        tracing::error!("blob list failed: {err:?}");
        ApiError::InternalServerError
    })?;
    let cids: Vec<String> = blobs.iter().map(|b| b.cid.to_string()).collect();
    let cursor = cids.last().cloned();
    Ok(Json(ListBlobsOutput { cids, cursor }))
}
