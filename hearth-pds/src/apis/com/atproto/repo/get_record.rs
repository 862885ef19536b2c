use crate::apis::com::atproto::repo::{is_local_repo, record_to_json};
use crate::apis::ApiError;
use crate::config::ServerConfig;
use crate::SharedActorStore;
use hearth_repo::cid::parse_cid;
use rocket::serde::json::Json;
use rocket::State;

#[derive(Debug, Serialize)]
pub struct GetRecordOutput {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
}

async fn inner_get_record(
    repo: String,
    collection: String,
    rkey: String,
    cid: Option<String>,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
) -> Result<GetRecordOutput, ApiError> {
    if !is_local_repo(&repo, cfg) {
        return Err(ApiError::RepoNotFound(repo));
    }
    let expected_cid = match cid {
        None => None,
        Some(s) => Some(parse_cid(&s)?),
    };
    let store = actor_store.actor_store.read().await;
    let found = store
        .get_record(&collection, &rkey, expected_cid)
        .map_err(|err| {
            tracing::error!("get_record failed: {err:?}");
            ApiError::InternalServerError
        })?;
    match found {
        Some(record) => Ok(GetRecordOutput {
            uri: record.uri,
            cid: record.cid.to_string(),
            value: record_to_json(record.value),
        }),
        None => Err(ApiError::RecordNotFound),
    }
}

#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.repo.getRecord?<repo>&<collection>&<rkey>&<cid>")]
pub async fn get_record(
    repo: String,
    collection: String,
    rkey: String,
    cid: Option<String>,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> Result<Json<GetRecordOutput>, ApiError> {
    inner_get_record(repo, collection, rkey, cid, cfg, actor_store)
        .await
        .map(Json)
}
