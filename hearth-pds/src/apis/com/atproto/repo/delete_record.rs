use crate::apis::com::atproto::repo::{is_local_repo, parse_swap_cid};
use crate::apis::ApiError;
use crate::auth::AccessWrite;
use crate::config::ServerConfig;
use crate::{SharedActorStore, SharedSequencer};
use rocket::serde::json::Json;
use rocket::State;

#[derive(Debug, Deserialize)]
pub struct DeleteRecordInput {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
    #[serde(rename = "swapRecord")]
    pub swap_record: Option<String>,
    #[serde(rename = "swapCommit")]
    pub swap_commit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CommitMeta {
    pub cid: String,
    pub rev: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteRecordOutput {
    pub commit: CommitMeta,
}

async fn inner_delete_record(
    body: DeleteRecordInput,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
    sequencer: &SharedSequencer,
) -> Result<DeleteRecordOutput, ApiError> {
    let DeleteRecordInput {
        repo,
        collection,
        rkey,
        swap_record,
        swap_commit,
    } = body;

    if !is_local_repo(&repo, cfg) {
        return Err(ApiError::RepoNotFound(repo));
    }
    let swap_record = parse_swap_cid(swap_record)?;
    let swap_commit = parse_swap_cid(swap_commit)?;

    let mut store = actor_store.actor_store.write().await;
    let mut lock = sequencer.sequencer.write().await;
    let commit = store.delete_record(&collection, &rkey, swap_record, swap_commit)?;
    if let Err(err) = lock.sequence_commit(&store.did, &commit) {
        tracing::warn!("failed to sequence commit: {err}");
    }
    Ok(DeleteRecordOutput {
        commit: CommitMeta {
            cid: commit.cid.to_string(),
            rev: commit.rev,
        },
    })
}

#[tracing::instrument(skip_all)]
#[rocket::post(
    "/xrpc/com.atproto.repo.deleteRecord",
    format = "json",
    data = "<body>"
)]
pub async fn delete_record(
    body: Json<DeleteRecordInput>,
    _auth: AccessWrite,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
    sequencer: &State<SharedSequencer>,
) -> Result<Json<DeleteRecordOutput>, ApiError> {
    inner_delete_record(body.into_inner(), cfg, actor_store, sequencer)
        .await
        .map(Json)
}
