use crate::config::ServerConfig;
use rocket::serde::json::Json;
use rocket::State;

#[derive(Debug, Serialize, Deserialize)]
pub struct DescribeServerOutput {
    pub did: String,
    #[serde(rename = "availableUserDomains")]
    pub available_user_domains: Vec<String>,
    #[serde(rename = "inviteCodeRequired")]
    pub invite_code_required: bool,
}

/// This node hosts exactly one actor, so there are no open user domains.
#[rocket::get("/xrpc/com.atproto.server.describeServer")]
pub async fn describe_server(cfg: &State<ServerConfig>) -> Json<DescribeServerOutput> {
    Json(DescribeServerOutput {
        did: cfg.service.did.clone(),
        available_user_domains: Vec::new(),
        invite_code_required: false,
    })
}
