use crate::apis::com::atproto::repo::is_local_repo;
use crate::apis::ApiError;
use crate::config::ServerConfig;
use crate::SharedActorStore;
use hearth_repo::cid::parse_cid;
use rocket::http::Header;
use rocket::{Responder, State};

#[derive(Responder)]
#[response(status = 200)]
pub struct BlobResponder(Vec<u8>, Header<'static>, Header<'static>, Header<'static>);

async fn inner_get_blob(
    did: String,
    cid: String,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
) -> Result<(Vec<u8>, String), ApiError> {
    if !is_local_repo(&did, cfg) {
        return Err(ApiError::RepoNotFound(did));
    }
    let cid = parse_cid(&cid)?;
    let store = actor_store.actor_store.read().await;
    let found = store.blob.get(&cid).map_err(|err| {
        tracing::error!("blob read failed: {err:?}");
        ApiError::InternalServerError
    })?;
    match found {
        Some(blob) => Ok((blob.bytes, blob.mime_type)),
        None => Err(ApiError::BlobNotFound),
    }
}

/// Returns the full blob as originally uploaded, with its stored MIME type.
#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.sync.getBlob?<did>&<cid>")]
pub async fn get_blob(
    did: String,
    cid: String,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> Result<BlobResponder, ApiError> {
    let (bytes, mime_type) = inner_get_blob(did, cid, cfg, actor_store).await?;
    Ok(BlobResponder(
        bytes.clone(),
        Header::new("content-length", bytes.len().to_string()),
        Header::new("content-type", mime_type),
        Header::new("content-security-policy", "default-src 'none'; sandbox"),
    ))
}
