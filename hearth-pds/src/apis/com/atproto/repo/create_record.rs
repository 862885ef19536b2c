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
pub struct CreateRecordInput {
    pub repo: String,
    pub collection: String,
    pub rkey: Option<String>,
    pub record: serde_json::Value,
    #[serde(rename = "swapCommit")]
    pub swap_commit: Option<String>,
    // undefined on create; a non-null value can never match
    #[serde(rename = "swapRecord")]
    pub swap_record: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateRecordOutput {
    pub uri: String,
    pub cid: String,
}

async fn inner_create_record(
    body: CreateRecordInput,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
    sequencer: &SharedSequencer,
    dispatcher: &Dispatcher,
) -> Result<CreateRecordOutput, ApiError> {
    let CreateRecordInput {
        repo,
        collection,
        rkey,
        record,
        swap_commit,
        swap_record,
    } = body;

    if !is_local_repo(&repo, cfg) {
        // a write addressed to another repository is an incoming federated
        // record; route it to the interaction sinks and tell the caller the
        // repo is not here
        let author = Author {
            did: repo.clone(),
            handle: repo.clone(),
        };
        if let Err(err) = dispatcher.dispatch(&record, &author, None) {
            tracing::warn!("failed to dispatch incoming record: {err}");
        }
        return Err(ApiError::RepoNotFound(repo));
    }

    if swap_record.is_some() {
        return Err(ApiError::InvalidSwap(
            "swapRecord is not defined on create".to_string(),
        ));
    }
    let swap_commit = parse_swap_cid(swap_commit)?;
    let record = json_to_record(record)?;

    // both locks up front: once the mutation starts there is no suspension
    // point before its event is sequenced
    let mut store = actor_store.actor_store.write().await;
    let mut lock = sequencer.sequencer.write().await;
    let result = store.create_record(&collection, record, rkey, swap_commit)?;
    if let Err(err) = lock.sequence_commit(&store.did, &result.commit) {
        tracing::warn!("failed to sequence commit: {err}");
    }
    Ok(CreateRecordOutput {
        uri: result.uri,
        cid: result.cid.to_string(),
    })
}

#[tracing::instrument(skip_all)]
#[rocket::post(
    "/xrpc/com.atproto.repo.createRecord",
    format = "json",
    data = "<body>"
)]
pub async fn create_record(
    body: Json<CreateRecordInput>,
    _auth: AccessWrite,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
    sequencer: &State<SharedSequencer>,
    dispatcher: &State<Arc<Dispatcher>>,
) -> Result<Json<CreateRecordOutput>, ApiError> {
    inner_create_record(body.into_inner(), cfg, actor_store, sequencer, dispatcher)
        .await
        .map(Json)
}
