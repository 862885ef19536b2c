use crate::apis::com::atproto::repo::{is_local_repo, json_to_record, parse_swap_cid};
use crate::apis::ApiError;
use crate::auth::AccessWrite;
use crate::config::ServerConfig;
use crate::content::Author;
use crate::dispatcher::Dispatcher;
use std::sync::Arc;
use crate::{SharedActorStore, SharedSequencer};
use rocket::serde::json::Json;
use rocket::State;

#[derive(Debug, Deserialize)]
pub struct PutRecordInput {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
    pub record: serde_json::Value,
    #[serde(rename = "swapRecord")]
    pub swap_record: Option<String>,
    #[serde(rename = "swapCommit")]
    pub swap_commit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PutRecordOutput {
    pub uri: String,
    pub cid: String,
}

async fn inner_put_record(
    body: PutRecordInput,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
    sequencer: &SharedSequencer,
    dispatcher: &Dispatcher,
) -> Result<PutRecordOutput, ApiError> {
    let PutRecordInput {
        repo,
        collection,
        rkey,
        record,
        swap_record,
        swap_commit,
    } = body;

    if !is_local_repo(&repo, cfg) {
        let author = Author {
            did: repo.clone(),
            handle: repo.clone(),
        };
        if let Err(err) = dispatcher.dispatch(&record, &author, None) {
            tracing::warn!("failed to dispatch incoming record: {err}");
        }
        return Err(ApiError::RepoNotFound(repo));
    }

    let swap_record = parse_swap_cid(swap_record)?;
    let swap_commit = parse_swap_cid(swap_commit)?;
    let record = json_to_record(record)?;

    let mut store = actor_store.actor_store.write().await;
    let mut lock = sequencer.sequencer.write().await;
    let result = store.put_record(&collection, &rkey, record, swap_record, swap_commit)?;
    if let Err(err) = lock.sequence_commit(&store.did, &result.commit) {
        tracing::warn!("failed to sequence commit: {err}");
    }
    Ok(PutRecordOutput {
        uri: result.uri,
        cid: result.cid.to_string(),
    })
}

#[tracing::instrument(skip_all)]
#[rocket::post("/xrpc/com.atproto.repo.putRecord", format = "json", data = "<body>")]
pub async fn put_record(
    body: Json<PutRecordInput>,
    _auth: AccessWrite,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
    sequencer: &State<SharedSequencer>,
    dispatcher: &State<Arc<Dispatcher>>,
) -> Result<Json<PutRecordOutput>, ApiError> {
    inner_put_record(body.into_inner(), cfg, actor_store, sequencer, dispatcher)
        .await
        .map(Json)
}
