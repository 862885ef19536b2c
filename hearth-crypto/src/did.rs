use crate::constants::{BASE58_MULTIBASE_PREFIX, DID_KEY_PREFIX, P256_DID_PREFIX};
use anyhow::{bail, Result};
use multibase::decode;

pub fn extract_multikey(did: &str) -> Result<String> {
    if !did.starts_with(DID_KEY_PREFIX) {
        bail!("Incorrect prefix for did:key: {did}")
    }
    Ok(did[DID_KEY_PREFIX.len()..].to_string())
}

/// Decodes a `z...` multikey into the compressed P-256 point.
pub fn parse_multikey(multikey: &str) -> Result<Vec<u8>> {
    if !multikey.starts_with(BASE58_MULTIBASE_PREFIX) {
        bail!("Incorrect prefix for multikey: {multikey}")
    }
    let (_base, bytes) = decode(multikey)?;
    if bytes.len() < P256_DID_PREFIX.len() || bytes[..P256_DID_PREFIX.len()] != P256_DID_PREFIX {
        bail!("Not a P-256 multikey: {multikey}")
    }
    Ok(bytes[P256_DID_PREFIX.len()..].to_vec())
}

pub fn parse_did_key(did: &str) -> Result<Vec<u8>> {
    let multikey = extract_multikey(did)?;
    parse_multikey(&multikey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::Keypair;

    #[test]
    fn did_key_round_trip() {
        let keypair = Keypair::generate();
        let did = keypair.did_key();
        let key_bytes = parse_did_key(&did).unwrap();
        assert_eq!(key_bytes, keypair.public_compressed());
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(parse_did_key("did:web:example.com").is_err());
        assert!(parse_multikey("fabc").is_err());
    }
}
