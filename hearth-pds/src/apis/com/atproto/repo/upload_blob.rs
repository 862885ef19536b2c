use crate::apis::ApiError;
use crate::auth::AccessWrite;
use crate::config::ServerConfig;
use crate::SharedActorStore;
use rocket::data::{Data, ToByteUnit};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use serde_json::{json, Value};

#[derive(Clone)]
pub struct ContentType {
    pub name: String,
}

/// Pulls the Content-Type out of the request; uploads keep whatever MIME
/// the client declared.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for ContentType {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.content_type() {
            None => Outcome::Error((Status::UnsupportedMediaType, ())),
            Some(content_type) => Outcome::Success(ContentType {
                name: content_type.to_string(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BlobOutput {
    pub blob: Value,
}

async fn inner_upload_blob(
    blob: Data<'_>,
    content_type: ContentType,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
) -> Result<BlobOutput, ApiError> {
    // read one byte past the cap so an oversize body is distinguishable
    // from one that exactly fits
    let limit = (cfg.blob.max_blob_size as u64 + 1).bytes();
    let capped = blob
        .open(limit)
        .into_bytes()
        .await
        .map_err(|_| ApiError::UploadFailed)?;
    let complete = capped.is_complete();
    let bytes = capped.into_inner();
    if !complete || bytes.len() > cfg.blob.max_blob_size {
        return Err(ApiError::BlobTooLarge(format!(
            "blob too large: max {} bytes",
            cfg.blob.max_blob_size
        )));
    }
    let store = actor_store.actor_store.read().await;
    let blob_ref = store.blob.put(&bytes, &content_type.name)?;
    Ok(BlobOutput {
        blob: json!({
            "$type": "blob",
            "ref": {"$link": blob_ref.cid.to_string()},
            "mimeType": blob_ref.mime_type,
            "size": blob_ref.size,
        }),
    })
}

#[tracing::instrument(skip_all)]
#[rocket::post("/xrpc/com.atproto.repo.uploadBlob", data = "<blob>")]
pub async fn upload_blob(
    blob: Data<'_>,
    content_type: ContentType,
    _auth: AccessWrite,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> Result<Json<BlobOutput>, ApiError> {
    inner_upload_blob(blob, content_type, cfg, actor_store)
        .await
        .map(Json)
}
