use crate::apis::ApiError;
use crate::config::ServerConfig;
use crate::APP_USER_AGENT;
use anyhow::Result;
use hearth_syntax::handle::{ensure_valid_handle, normalize_handle};
use rocket::serde::json::Json;
use rocket::State;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveHandleOutput {
    pub did: String,
}

/// Remote fallback: any host serving atproto publishes its DID at
/// `/.well-known/atproto-did`.
async fn try_resolve_from_host(handle: &str) -> Result<Option<String>> {
    let client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(Duration::from_secs(10))
        .build()?;
    let res = client
        .get(format!("https://{handle}/.well-known/atproto-did"))
        .send()
        .await;
    match res {
        Err(_) => Ok(None),
        Ok(res) if !res.status().is_success() => Ok(None),
        Ok(res) => {
            let did = res.text().await?.trim().to_string();
            if did.starts_with("did:") {
                Ok(Some(did))
            } else {
                Ok(None)
            }
        }
    }
}

async fn inner_resolve_handle(handle: String, cfg: &ServerConfig) -> Result<ResolveHandleOutput, ApiError> {
    ensure_valid_handle(&handle).map_err(|_| ApiError::InvalidHandle)?;
    let handle = normalize_handle(&handle);
    if handle == normalize_handle(&cfg.service.handle) {
        return Ok(ResolveHandleOutput {
            did: cfg.service.did.clone(),
        });
    }
    // not someone on this server, but we help with resolving anyway
    match try_resolve_from_host(&handle).await {
        Ok(Some(did)) => Ok(ResolveHandleOutput { did }),
        _ => Err(ApiError::HandleNotFound),
    }
}

#[tracing::instrument(skip_all)]
#[rocket::get("/xrpc/com.atproto.identity.resolveHandle?<handle>")]
pub async fn resolve_handle(
    handle: String,
    cfg: &State<ServerConfig>,
) -> Result<Json<ResolveHandleOutput>, ApiError> {
    inner_resolve_handle(handle, cfg).await.map(Json)
}
