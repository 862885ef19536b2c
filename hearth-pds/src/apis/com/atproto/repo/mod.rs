pub mod create_record;
pub mod delete_record;
pub mod describe_repo;
pub mod get_record;
pub mod list_records;
pub mod put_record;
pub mod upload_blob;

use crate::apis::ApiError;
use crate::config::ServerConfig;
use hearth_repo::cbor::{ipld_to_json, json_to_ipld};
use hearth_repo::cid::parse_cid;
use hearth_repo::types::RepoRecord;
use hearth_syntax::handle::normalize_handle;
use ipld_core::ipld::Ipld;
use lexicon_cid::Cid;

/// The `repo` parameter may name us by DID or handle.
pub fn is_local_repo(repo: &str, cfg: &ServerConfig) -> bool {
    repo == cfg.service.did || normalize_handle(repo) == normalize_handle(&cfg.service.handle)
}

pub fn json_to_record(value: serde_json::Value) -> Result<RepoRecord, ApiError> {
    match json_to_ipld(value)? {
        Ipld::Map(map) => Ok(map),
        _ => Err(ApiError::InvalidRequest("record must be an object".into())),
    }
}

pub fn record_to_json(record: RepoRecord) -> serde_json::Value {
    ipld_to_json(&Ipld::Map(record))
}

pub fn parse_swap_cid(value: Option<String>) -> Result<Option<Cid>, ApiError> {
    match value {
        None => Ok(None),
        Some(s) => Ok(Some(parse_cid(&s)?)),
    }
}
