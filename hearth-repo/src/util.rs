use crate::cbor;
use crate::error::RepoError;
use crate::types::{Commit, RecordPath, RepoRecord, UnsignedCommit};
use anyhow::{bail, Result};
use hearth_crypto::verify::verify_sig;
use hearth_crypto::Keypair;
use ipld_core::ipld::Ipld;

pub fn format_data_key(collection: &str, rkey: &str) -> String {
    format!("{collection}/{rkey}")
}

pub fn parse_data_key(key: &str) -> Result<RecordPath> {
    let parts: Vec<&str> = key.split('/').collect();
    if parts.len() != 2 {
        bail!("Invalid record key: `{key:?}`");
    }
    Ok(RecordPath {
        collection: parts[0].to_owned(),
        rkey: parts[1].to_owned(),
    })
}

/// Signs the canonical encoding of the unsigned commit. A signer failure
/// aborts the commit; an empty signature is never substituted.
pub fn sign_commit(unsigned: UnsignedCommit, keypair: &Keypair) -> Result<Commit> {
    let encoded = cbor::struct_to_cbor(&unsigned)?;
    let sig = keypair
        .sign(&encoded)
        .map_err(|e| RepoError::SigningFailed(e.to_string()))?;
    Ok(Commit {
        did: unsigned.did,
        version: unsigned.version,
        data: unsigned.data,
        rev: unsigned.rev,
        prev: unsigned.prev,
        sig: sig.to_vec(),
    })
}

/// Re-derives the unsigned form (sig stripped) and checks the signature
/// against a SEC1-encoded public key.
pub fn verify_commit_sig(commit: &Commit, public_key: &[u8]) -> Result<bool> {
    let encoded = cbor::struct_to_cbor(&commit.unsigned())?;
    verify_sig(public_key, &encoded, &commit.sig, None)
}

pub fn parse_record(bytes: &[u8]) -> Result<RepoRecord> {
    match cbor::decode(bytes)? {
        Ipld::Map(map) => Ok(map),
        _ => bail!("record must be a map"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::cid_for_cbor;
    use ipld_core::ipld;

    #[test]
    fn data_key_round_trip() {
        let key = format_data_key("app.bsky.feed.post", "3jui7kd54zh2y");
        let path = parse_data_key(&key).unwrap();
        assert_eq!(path.collection, "app.bsky.feed.post");
        assert_eq!(path.rkey, "3jui7kd54zh2y");
        assert!(parse_data_key("no-slash").is_err());
        assert!(parse_data_key("a/b/c").is_err());
    }

    #[test]
    fn commit_sign_and_verify() {
        let keypair = Keypair::generate();
        let unsigned = UnsignedCommit {
            did: "did:web:example.com".to_string(),
            version: 3,
            data: cid_for_cbor(&ipld!({"e": []})).unwrap(),
            rev: "3jui7kd54zh2y".to_string(),
            prev: None,
        };
        let commit = sign_commit(unsigned, &keypair).unwrap();
        assert_eq!(commit.sig.len(), 64);
        assert!(verify_commit_sig(&commit, &keypair.public_compressed()).unwrap());

        let mut tampered = commit.clone();
        tampered.rev = "3jui7kd54zh2z".to_string();
        assert!(!verify_commit_sig(&tampered, &keypair.public_compressed()).unwrap());

        let other = Keypair::generate();
        assert!(!verify_commit_sig(&commit, &other.public_compressed()).unwrap());
    }
}
