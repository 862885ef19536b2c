use anyhow::Result;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};

pub struct VerifyOptions {
    pub allow_malleable_sig: Option<bool>,
}

/// Verifies a raw `r||s` signature against a SEC1-encoded public key
/// (compressed or uncompressed). Low-S form is required unless the caller
/// opts into malleable signatures.
pub fn verify_sig(
    public_key: &[u8],
    data: &[u8],
    sig: &[u8],
    opts: Option<VerifyOptions>,
) -> Result<bool> {
    let allow_malleable = matches!(
        opts,
        Some(VerifyOptions {
            allow_malleable_sig: Some(true)
        })
    );
    if !allow_malleable && !is_compact_format(sig) {
        return Ok(false);
    }
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)?;
    let signature = Signature::try_from(sig)?;
    Ok(verifying_key.verify(data, &signature).is_ok())
}

/// True when `sig` parses as a fixed-width low-S signature.
pub fn is_compact_format(sig: &[u8]) -> bool {
    let parsed = match Signature::try_from(sig) {
        Ok(res) => res,
        Err(_) => return false,
    };
    parsed.normalize_s().is_none() && parsed.to_vec() == *sig
}
