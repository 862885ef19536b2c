//! Canonical DAG-CBOR subset used for every persisted or hashed structure.
//!
//! The encoding is deterministic: map keys sort by byte length then
//! byte-lexicographically, integer heads use the minimum-length form, CID
//! links are tag 42 around an identity-prefixed byte string, and floats and
//! indefinite-length items are not representable.

mod decode;
mod encode;

use ipld_core::ipld::Ipld;
use lexicon_cid::Cid;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

pub use decode::Decoder;
pub use encode::Encoder;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("MalformedEncoding: {0}")]
    Malformed(String),
    #[error("MalformedEncoding: value not representable in canonical form: {0}")]
    Unrepresentable(String),
}

impl serde::ser::Error for CodecError {
    fn custom<T: Display>(msg: T) -> Self {
        CodecError::Unrepresentable(msg.to_string())
    }
}

impl serde::de::Error for CodecError {
    fn custom<T: Display>(msg: T) -> Self {
        CodecError::Malformed(msg.to_string())
    }
}

/// Serializes any serde value into canonical bytes.
pub fn struct_to_cbor<T: Serialize>(obj: &T) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    obj.serialize(Encoder::new(&mut out))?;
    Ok(out)
}

/// Decodes canonical bytes into a serde value. Duplicate map keys and
/// truncated input are always rejected; key ordering is not checked.
pub fn cbor_to_struct<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let mut decoder = Decoder::new(bytes, false);
    let value = T::deserialize(&mut decoder)?;
    decoder.finish()?;
    Ok(value)
}

pub fn encode(value: &Ipld) -> Result<Vec<u8>, CodecError> {
    struct_to_cbor(value)
}

pub fn decode(bytes: &[u8]) -> Result<Ipld, CodecError> {
    cbor_to_struct(bytes)
}

/// Like [`decode`] but additionally enforces canonical map-key order and
/// minimum-length integer heads.
pub fn decode_strict(bytes: &[u8]) -> Result<Ipld, CodecError> {
    let mut decoder = Decoder::new(bytes, true);
    let value = serde::Deserialize::deserialize(&mut decoder)?;
    decoder.finish()?;
    Ok(value)
}

/// JSON surface form: links are `{"$link": "b..."}`, bytes are
/// `{"$bytes": base64}`. Floats are rejected, integers pass through.
pub fn json_to_ipld(value: serde_json::Value) -> Result<Ipld, CodecError> {
    use serde_json::Value;
    Ok(match value {
        Value::Null => Ipld::Null,
        Value::Bool(b) => Ipld::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ipld::Integer(i as i128)
            } else if let Some(u) = n.as_u64() {
                Ipld::Integer(u as i128)
            } else {
                return Err(CodecError::Unrepresentable(format!(
                    "non-integer number: {n}"
                )));
            }
        }
        Value::String(s) => Ipld::String(s),
        Value::Array(items) => Ipld::List(
            items
                .into_iter()
                .map(json_to_ipld)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(link)) = map.get("$link") {
                    let cid = Cid::from_str(link).map_err(|e| {
                        CodecError::Malformed(format!("bad $link value `{link}`: {e}"))
                    })?;
                    return Ok(Ipld::Link(cid));
                }
                if let Some(Value::String(b64)) = map.get("$bytes") {
                    use base64::Engine;
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(b64)
                        .map_err(|e| CodecError::Malformed(format!("bad $bytes value: {e}")))?;
                    return Ok(Ipld::Bytes(bytes));
                }
            }
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k, json_to_ipld(v)?);
            }
            Ipld::Map(out)
        }
    })
}

pub fn ipld_to_json(value: &Ipld) -> serde_json::Value {
    use serde_json::{json, Value};
    match value {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(*b),
        Ipld::Integer(i) => json!(*i as i64),
        Ipld::Float(f) => json!(f),
        Ipld::String(s) => Value::String(s.clone()),
        Ipld::Bytes(b) => {
            use base64::Engine;
            json!({ "$bytes": base64::engine::general_purpose::STANDARD.encode(b) })
        }
        Ipld::List(items) => Value::Array(items.iter().map(ipld_to_json).collect()),
        Ipld::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), ipld_to_json(v)))
                .collect(),
        ),
        Ipld::Link(cid) => json!({ "$link": cid.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::cid_for_cbor;
    use ipld_core::ipld;

    #[test]
    fn round_trips_scalars() {
        for value in [
            Ipld::Null,
            Ipld::Bool(true),
            Ipld::Bool(false),
            Ipld::Integer(0),
            Ipld::Integer(23),
            Ipld::Integer(24),
            Ipld::Integer(255),
            Ipld::Integer(256),
            Ipld::Integer(65536),
            Ipld::Integer(u32::MAX as i128 + 1),
            Ipld::Integer(-1),
            Ipld::Integer(-25),
            Ipld::Integer(i64::MIN as i128),
            Ipld::String("hello".into()),
            Ipld::Bytes(vec![0, 1, 2]),
        ] {
            let bytes = encode(&value).unwrap();
            assert_eq!(decode(&bytes).unwrap(), value, "{value:?}");
            assert_eq!(decode_strict(&bytes).unwrap(), value, "{value:?}");
        }
    }

    #[test]
    fn round_trips_nested() {
        let value = ipld!({
            "$type": "app.bsky.feed.post",
            "text": "hello world",
            "langs": ["en"],
            "reply": {"root": {"uri": "at://did:web:x/app.bsky.feed.post/abc"}},
            "count": 3,
        });
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
        // re-encoding the decode is byte-identical
        assert_eq!(encode(&decode(&bytes).unwrap()).unwrap(), bytes);
    }

    #[test]
    fn map_keys_sort_by_length_then_bytes() {
        let value = ipld!({"bb": 1, "a": 2, "ab": 3, "c": 4});
        let bytes = encode(&value).unwrap();
        // 0xa4 map(4), then keys in canonical order: a, c, ab, bb
        assert_eq!(bytes[0], 0xa4);
        let keys: Vec<u8> = vec![bytes[2], bytes[5], bytes[8], bytes[12]];
        assert_eq!(keys, vec![b'a', b'c', b'a', b'b']);
    }

    #[test]
    fn links_round_trip_through_tag_42() {
        let cid = cid_for_cbor(&Ipld::String("target".into())).unwrap();
        let value = ipld!({"subject": cid});
        let bytes = encode(&value).unwrap();
        // tag 42 head
        assert!(bytes.windows(2).any(|w| w == [0xd8, 0x2a]));
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn rejects_floats() {
        assert!(encode(&Ipld::Float(1.5)).is_err());
        // 0xf9 = float16
        assert!(decode(&[0xf9, 0x3c, 0x00]).is_err());
    }

    #[test]
    fn rejects_truncated_and_trailing() {
        let bytes = encode(&ipld!({"a": "b"})).unwrap();
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
        let mut extra = bytes.clone();
        extra.push(0x00);
        assert!(decode(&extra).is_err());
    }

    #[test]
    fn rejects_duplicate_keys() {
        // {"a": 1, "a": 2}
        let raw = vec![0xa2, 0x61, b'a', 0x01, 0x61, b'a', 0x02];
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn rejects_non_string_map_key() {
        // {1: 2}
        let raw = vec![0xa1, 0x01, 0x02];
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn rejects_unknown_tag() {
        // tag 43 around an int
        let raw = vec![0xd8, 0x2b, 0x01];
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn rejects_indefinite_length() {
        // indefinite-length text string
        let raw = vec![0x7f, 0x61, b'a', 0xff];
        assert!(decode(&raw).is_err());
    }

    #[test]
    fn strict_mode_rejects_misordered_keys() {
        // {"bb": 1, "a": 2} in that (non-canonical) order
        let raw = vec![0xa2, 0x62, b'b', b'b', 0x01, 0x61, b'a', 0x02];
        assert!(decode(&raw).is_ok());
        assert!(decode_strict(&raw).is_err());
    }

    #[test]
    fn strict_mode_rejects_overlong_heads() {
        // 1 encoded with a two-byte head
        let raw = vec![0x18, 0x01];
        assert!(decode(&raw).is_ok());
        assert!(decode_strict(&raw).is_err());
    }

    #[test]
    fn json_surface_form_round_trips() {
        let cid = cid_for_cbor(&Ipld::Integer(7)).unwrap();
        let value = ipld!({"subject": cid, "payload": Ipld::Bytes(vec![1, 2, 3]), "n": 5});
        let json = ipld_to_json(&value);
        assert_eq!(json["subject"]["$link"], cid.to_string());
        assert_eq!(json_to_ipld(json).unwrap(), value);
    }

    #[test]
    fn json_rejects_floats() {
        let json = serde_json::json!({"temp": 98.6});
        assert!(json_to_ipld(json).is_err());
    }
}
