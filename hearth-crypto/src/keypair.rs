use crate::constants::P256_DID_PREFIX;
use anyhow::{bail, Result};
use multibase::Base::Base58Btc;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;

/// The node's one P-256 signing keypair. Signatures are raw `r||s`
/// (64 bytes), low-S normalized.
#[derive(Clone)]
pub struct Keypair {
    secret: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Keypair {
            secret: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_private_pem(pem: &str) -> Result<Self> {
        let secret = SigningKey::from_pkcs8_pem(pem)?;
        Ok(Keypair { secret })
    }

    pub fn private_pem(&self) -> Result<String> {
        Ok(self.secret.to_pkcs8_pem(LineEnding::LF)?.to_string())
    }

    pub fn public_pem(&self) -> Result<String> {
        Ok(self
            .secret
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)?)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.secret.verifying_key()
    }

    /// SEC1 compressed point, 33 bytes.
    pub fn public_compressed(&self) -> Vec<u8> {
        self.secret
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// ECDSA-P256-SHA256 over `msg`, returned as raw `r||s`.
    pub fn sign(&self, msg: &[u8]) -> Result<[u8; 64]> {
        let sig: Signature = self.secret.sign(msg);
        let sig = sig.normalize_s().unwrap_or(sig);
        let bytes = sig.to_bytes();
        if bytes.len() != 64 {
            bail!("unexpected signature length: {}", bytes.len());
        }
        let mut out = [0u8; 64];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// `z` + base58btc(multicodec p256 prefix + compressed point).
    pub fn public_multibase(&self) -> String {
        let prefixed: Vec<u8> = [P256_DID_PREFIX.to_vec(), self.public_compressed()].concat();
        multibase::encode(Base58Btc, prefixed.as_slice())
    }

    pub fn did_key(&self) -> String {
        format!("did:key:{}", self.public_multibase())
    }
}

/// Converts a DER-encoded ECDSA signature to raw `r||s` form.
pub fn raw_sig_from_der(der: &[u8]) -> Result<[u8; 64]> {
    let sig = Signature::from_der(der)?;
    let sig = sig.normalize_s().unwrap_or(sig);
    let mut out = [0u8; 64];
    out.copy_from_slice(&sig.to_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::verify_sig;

    #[test]
    fn sign_and_verify() {
        let keypair = Keypair::generate();
        let msg = b"hello world";
        let sig = keypair.sign(msg).unwrap();
        assert!(verify_sig(&keypair.public_compressed(), msg, &sig, None).unwrap());
        assert!(!verify_sig(&keypair.public_compressed(), b"other", &sig, None).unwrap());
    }

    #[test]
    fn pem_round_trip() {
        let keypair = Keypair::generate();
        let pem = keypair.private_pem().unwrap();
        let restored = Keypair::from_private_pem(&pem).unwrap();
        assert_eq!(keypair.public_compressed(), restored.public_compressed());
    }

    #[test]
    fn multibase_has_z_prefix() {
        let keypair = Keypair::generate();
        let mb = keypair.public_multibase();
        assert!(mb.starts_with('z'));
        assert!(keypair.did_key().starts_with("did:key:z"));
    }

    #[test]
    fn der_conversion_matches_raw() {
        use p256::ecdsa::signature::Signer;
        let keypair = Keypair::generate();
        let msg = b"raw and der agree";
        let sig: Signature = keypair.secret.sign(msg);
        let sig = sig.normalize_s().unwrap_or(sig);
        let raw = keypair.sign(msg).unwrap();
        assert_eq!(raw_sig_from_der(sig.to_der().as_bytes()).unwrap(), raw);
    }
}
