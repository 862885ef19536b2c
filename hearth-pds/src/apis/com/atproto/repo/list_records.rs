use crate::apis::com::atproto::repo::{is_local_repo, record_to_json};
use crate::apis::ApiError;
use crate::config::ServerConfig;
use crate::SharedActorStore;
use rocket::serde::json::Json;
use rocket::State;

#[derive(Debug, Serialize)]
pub struct ListedRecord {
    pub uri: String,
    pub cid: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ListRecordsOutput {
    pub records: Vec<ListedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

async fn inner_list_records(
    repo: String,
    collection: String,
    limit: u16,
    cursor: Option<String>,
    reverse: bool,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
) -> Result<ListRecordsOutput, ApiError> {
    if limit > 100 {
        return Err(ApiError::InvalidRequest(
            "limit can not be greater than 100".to_string(),
        ));
    }
    if !is_local_repo(&repo, cfg) {
        return Err(ApiError::RepoNotFound(repo));
    }
    let store = actor_store.actor_store.read().await;
    let records = store
        .list_records(&collection, limit as usize, cursor.as_deref(), reverse)
        .map_err(|err| {
            tracing::error!("list_records failed: {err:?}");
            ApiError::InternalServerError
        })?;
    let records: Vec<ListedRecord> = records
        .into_iter()
        .map(|record| ListedRecord {
            uri: format!(
                "at://{}/{}/{}",
                cfg.service.did, record.collection, record.rkey
            ),
            cid: record.cid.to_string(),
            value: record_to_json(record.record),
        })
        .collect();
    let cursor = records
        .last()
        .and_then(|record| record.uri.rsplit('/').next().map(|s| s.to_string()));
    Ok(ListRecordsOutput { records, cursor })
}

#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.repo.listRecords?<repo>&<collection>&<limit>&<cursor>&<reverse>")]
pub async fn list_records(
    repo: String,
    collection: String,
    limit: Option<u16>,
    cursor: Option<String>,
    reverse: Option<bool>,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> Result<Json<ListRecordsOutput>, ApiError> {
    inner_list_records(
        repo,
        collection,
        limit.unwrap_or(50),
        cursor,
        reverse.unwrap_or(false),
        cfg,
        actor_store,
    )
    .await
    .map(Json)
}
