//! Firehose frame layout: two canonical-CBOR maps (header, body) behind a
//! varint header-length prefix, so consumers can split the pair without
//! streaming CBOR parsing.

use anyhow::{anyhow, bail, Result};
use hearth_repo::cbor;
use serde::Serialize;

pub const OP_MESSAGE: i8 = 1;
pub const OP_ERROR: i8 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageFrameHeader {
    pub op: i8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrameBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn frame(header_bytes: Vec<u8>, body_bytes: Vec<u8>) -> Vec<u8> {
    let mut buf = unsigned_varint::encode::u64_buffer();
    let prefix = unsigned_varint::encode::u64(header_bytes.len() as u64, &mut buf);
    let mut out = Vec::with_capacity(prefix.len() + header_bytes.len() + body_bytes.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&body_bytes);
    out
}

pub fn message_frame<T: Serialize>(t: &str, body: &T) -> Result<Vec<u8>> {
    let header = cbor::struct_to_cbor(&MessageFrameHeader {
        op: OP_MESSAGE,
        t: Some(t.to_string()),
    })?;
    Ok(frame(header, cbor::struct_to_cbor(body)?))
}

pub fn error_frame(error: &str, message: Option<&str>) -> Result<Vec<u8>> {
    let header = cbor::struct_to_cbor(&MessageFrameHeader {
        op: OP_ERROR,
        t: None,
    })?;
    let body = cbor::struct_to_cbor(&ErrorFrameBody {
        error: error.to_string(),
        message: message.map(|m| m.to_string()),
    })?;
    Ok(frame(header, body))
}

/// Splits a frame back into its header and raw body bytes.
pub fn read_frame(bytes: &[u8]) -> Result<(MessageFrameHeader, &[u8])> {
    let (header_len, rest) = unsigned_varint::decode::u64(bytes)
        .map_err(|e| anyhow!("invalid frame length prefix: {e}"))?;
    let header_len = header_len as usize;
    if rest.len() < header_len {
        bail!("truncated frame header");
    }
    let header: MessageFrameHeader = cbor::cbor_to_struct(&rest[..header_len])?;
    Ok((header, &rest[header_len..]))
}
