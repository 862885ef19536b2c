use anyhow::{anyhow, bail, Result};
use hearth_repo::cbor;
use lexicon_cid::Cid;

#[derive(Debug, Deserialize)]
pub struct Header {
    pub op: i8,
    #[serde(rename = "t")]
    pub type_: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RepoOp {
    pub action: String,
    pub path: String,
    pub cid: Option<Cid>,
}

#[derive(Debug, Deserialize)]
pub struct Commit {
    pub seq: i64,
    pub repo: String,
    pub commit: Cid,
    pub rev: String,
    pub since: Option<String>,
    #[serde(with = "serde_bytes")]
    pub blocks: Vec<u8>,
    pub ops: Vec<RepoOp>,
    pub blobs: Vec<Cid>,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct Identity {
    pub seq: i64,
    pub did: String,
    pub handle: Option<String>,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct Account {
    pub seq: i64,
    pub did: String,
    pub active: bool,
    pub status: Option<String>,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamError {
    pub error: String,
    pub message: Option<String>,
}

#[derive(Debug)]
pub enum SubscribedEvent {
    Commit(Commit),
    Identity(Identity),
    Account(Account),
    Error(StreamError),
}

/// Splits a frame (`varint(header_len) || header || body`) and decodes the
/// body according to the header's `t`. Unknown message types come back as
/// `None`; new event kinds must not break old subscribers.
pub fn read(data: &[u8]) -> Result<Option<(Header, SubscribedEvent)>> {
    let (header_len, rest) = unsigned_varint::decode::u64(data)
        .map_err(|e| anyhow!("invalid frame length prefix: {e}"))?;
    let header_len = header_len as usize;
    if rest.len() < header_len {
        bail!("truncated frame header");
    }
    let header: Header = cbor::cbor_to_struct(&rest[..header_len])?;
    let body = &rest[header_len..];

    if header.op < 0 {
        let err: StreamError = cbor::cbor_to_struct(body)?;
        return Ok(Some((header, SubscribedEvent::Error(err))));
    }
    let event = match header.type_.as_deref() {
        Some("#commit") => SubscribedEvent::Commit(cbor::cbor_to_struct(body)?),
        Some("#identity") => SubscribedEvent::Identity(cbor::cbor_to_struct(body)?),
        Some("#account") => SubscribedEvent::Account(cbor::cbor_to_struct(body)?),
        other => {
            tracing::debug!("ignoring unknown event type {other:?}");
            return Ok(None);
        }
    };
    Ok(Some((header, event)))
}
