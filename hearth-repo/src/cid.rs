use crate::cbor::{self, CodecError};
use lexicon_cid::Cid;
use multihash::Multihash;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::str::FromStr;

const SHA2_256: u64 = 0x12;
pub const DAG_CBOR_CODEC: u64 = 0x71;
pub const RAW_CODEC: u64 = 0x55;

const BASE32_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz234567";

fn wrap_sha256(codec: u64, digest: &[u8]) -> Result<Cid, CodecError> {
    let hash = Multihash::<64>::wrap(SHA2_256, digest)
        .map_err(|e| CodecError::Malformed(format!("multihash wrap: {e}")))?;
    Ok(Cid::new_v1(codec, hash))
}

/// CID of the canonical encoding of any serde value (dag-cbor codec).
pub fn cid_for_cbor<T: Serialize>(data: &T) -> Result<Cid, CodecError> {
    let bytes = cbor::struct_to_cbor(data)?;
    cid_for_cbor_bytes(&bytes)
}

/// CID for bytes that are already canonical cbor.
pub fn cid_for_cbor_bytes(bytes: &[u8]) -> Result<Cid, CodecError> {
    wrap_sha256(DAG_CBOR_CODEC, Sha256::digest(bytes).as_slice())
}

/// CID for opaque blob bytes (raw codec).
pub fn cid_for_raw(bytes: &[u8]) -> Result<Cid, CodecError> {
    wrap_sha256(RAW_CODEC, Sha256::digest(bytes).as_slice())
}

/// Strict text-form parse: `b` + lowercase base32, CIDv1 only.
pub fn parse_cid(s: &str) -> Result<Cid, CodecError> {
    let Some(body) = s.strip_prefix('b') else {
        return Err(CodecError::Malformed(format!(
            "CID must be base32-lower (`b` prefix): `{s}`"
        )));
    };
    if body.is_empty() || !body.chars().all(|c| BASE32_ALPHABET.contains(c)) {
        return Err(CodecError::Malformed(format!(
            "CID body is not base32-lower: `{s}`"
        )));
    }
    let cid = Cid::from_str(s).map_err(|e| CodecError::Malformed(format!("bad CID `{s}`: {e}")))?;
    if cid.version() != lexicon_cid::Version::V1 {
        return Err(CodecError::Malformed(format!("CID must be v1: `{s}`")));
    }
    Ok(cid)
}

/// True when `cid` is the sha2-256 content address of `bytes`.
pub fn verify_cid(cid: &Cid, bytes: &[u8]) -> bool {
    cid.hash().code() == SHA2_256
        && cid.hash().digest() == Sha256::digest(bytes).as_slice()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipld_core::ipld;
    use ipld_core::ipld::Ipld;

    #[test]
    fn deterministic_over_semantic_equality() {
        let a = ipld!({"b": 2, "a": 1});
        let b = ipld!({"a": 1, "b": 2});
        assert_eq!(cid_for_cbor(&a).unwrap(), cid_for_cbor(&b).unwrap());
    }

    #[test]
    fn codecs_differ() {
        let bytes = cbor::encode(&Ipld::String("x".into())).unwrap();
        let as_cbor = cid_for_cbor_bytes(&bytes).unwrap();
        let as_raw = cid_for_raw(&bytes).unwrap();
        assert_ne!(as_cbor, as_raw);
        assert_eq!(as_cbor.codec(), DAG_CBOR_CODEC);
        assert_eq!(as_raw.codec(), RAW_CODEC);
    }

    #[test]
    fn text_form_round_trips() {
        let cid = cid_for_cbor(&ipld!({"hello": "world"})).unwrap();
        let s = cid.to_string();
        assert!(s.starts_with('b'));
        assert_eq!(parse_cid(&s).unwrap(), cid);
    }

    #[test]
    fn parse_rejects_bad_strings() {
        assert!(parse_cid("Qmfoo").is_err()); // v0 / not base32-lower
        assert!(parse_cid("b").is_err());
        assert!(parse_cid("bAFY").is_err()); // upper case
        assert!(parse_cid("bafyrei1").is_err()); // '1' not in alphabet
    }

    #[test]
    fn verify_matches_bytes() {
        let bytes = cbor::encode(&ipld!({"n": 1})).unwrap();
        let cid = cid_for_cbor_bytes(&bytes).unwrap();
        assert!(verify_cid(&cid, &bytes));
        assert!(!verify_cid(&cid, b"other bytes"));
    }
}
