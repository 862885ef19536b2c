use crate::apis::com::atproto::repo::is_local_repo;
use crate::apis::ApiError;
use crate::config::ServerConfig;
use crate::identity::{build_did_doc, get_handle};
use crate::SharedActorStore;
use rocket::serde::json::Json;
use rocket::State;

#[derive(Debug, Serialize)]
pub struct DescribeRepoOutput {
    pub handle: String,
    pub did: String,
    #[serde(rename = "didDoc")]
    pub did_doc: serde_json::Value,
    pub collections: Vec<String>,
    #[serde(rename = "handleIsCorrect")]
    pub handle_is_correct: bool,
}

async fn inner_describe_repo(
    repo: String,
    cfg: &ServerConfig,
    actor_store: &SharedActorStore,
) -> Result<DescribeRepoOutput, ApiError> {
    if !is_local_repo(&repo, cfg) {
        return Err(ApiError::RepoNotFound(repo));
    }
    let store = actor_store.actor_store.read().await;
    let collections = store.collections().map_err(|err| {
        tracing::error!("describe_repo failed: {err:?}");
        ApiError::InternalServerError
    })?;
    let did_doc = build_did_doc(
        &cfg.service.did,
        &cfg.service.handle,
        &cfg.service.public_url,
        &store.keypair().public_multibase(),
    );
    let handle_is_correct = get_handle(&did_doc).as_deref() == Some(cfg.service.handle.as_str());
    Ok(DescribeRepoOutput {
        handle: cfg.service.handle.clone(),
        did: cfg.service.did.clone(),
        did_doc,
        collections,
        handle_is_correct,
    })
}

#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.repo.describeRepo?<repo>")]
pub async fn describe_repo(
    repo: String,
    cfg: &State<ServerConfig>,
    actor_store: &State<SharedActorStore>,
) -> Result<Json<DescribeRepoOutput>, ApiError> {
    inner_describe_repo(repo, cfg, actor_store).await.map(Json)
}
