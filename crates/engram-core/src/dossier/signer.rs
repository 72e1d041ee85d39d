//! Pluggable dossier signing.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::domain::{EngramError, Result};

/// Capability to sign dossier bytes.
pub trait DossierSigner: Send + Sync {
    /// Algorithm label recorded next to the signature.
    fn algorithm(&self) -> &'static str;

    /// Hex-encoded public key a reader verifies against.
    fn public_key_hex(&self) -> String;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Ed25519 signer built from a 32-byte seed.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub const ALGORITHM: &'static str = "ed25519";

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a hex-encoded 32-byte seed (as in `ENGRAM_SIGNING_KEY`).
    pub fn from_hex_seed(hex_seed: &str) -> Result<Self> {
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| EngramError::Config(format!("signing key is not hex: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            EngramError::Config(format!("signing key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

impl DossierSigner for Ed25519Signer {
    fn algorithm(&self) -> &'static str {
        Self::ALGORITHM
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

/// Check an Ed25519 signature given hex-encoded key and signature.
pub fn verify_ed25519(public_key_hex: &str, message: &[u8], signature_hex: &str) -> Result<bool> {
    let key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| EngramError::Signing("public key must be 32 hex-encoded bytes".to_string()))?;
    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| EngramError::Signing("signature must be 64 hex-encoded bytes".to_string()))?;

    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| EngramError::Signing(format!("invalid public key: {e}")))?;
    let signature = Signature::from_bytes(&sig_bytes);
    Ok(key.verify(message, &signature).is_ok())
}
