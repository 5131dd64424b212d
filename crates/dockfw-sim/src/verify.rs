//! Ed25519 package signatures
//!
//! Packages are signed over their SHA-256 digest. Keys travel as hex: a
//! 32-byte seed for signing, a 32-byte public key for verification.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use dockfw_core::platform::SignatureVerifier;

use crate::error::{Result, SimError};

/// Length of an Ed25519 signature
pub const SIGNATURE_LEN: u16 = 64;

fn decode_32(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim()).map_err(|e| SimError::InvalidKey(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| SimError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

/// Verifier holding one public key
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    /// Verifier for a raw public key
    pub fn from_bytes(key: &[u8; 32]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(key).map_err(|e| SimError::InvalidKey(e.to_string()))?;
        Ok(Self { key })
    }

    /// Verifier for a hex-encoded public key
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Self::from_bytes(&decode_32(hex_str)?)
    }

    /// Hex encoding of the public key
    pub fn to_hex(&self) -> String {
        hex::encode(self.key.as_bytes())
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify_signature(&self, digest: &[u8; 32], signature: &[u8]) -> bool {
        let Ok(sig) = Signature::from_slice(signature) else {
            log::debug!("signature has {} bytes", signature.len());
            return false;
        };
        self.key.verify(digest, &sig).is_ok()
    }
}

/// Signing side, used when building packages
#[derive(Debug, Clone)]
pub struct PackageSigner {
    key: SigningKey,
}

impl PackageSigner {
    /// Signer from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Signer from a hex-encoded seed
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        Ok(Self::from_seed(&decode_32(hex_str)?))
    }

    /// Sign a package digest
    pub fn sign(&self, digest: &[u8; 32]) -> Vec<u8> {
        self.key.sign(digest).to_bytes().to_vec()
    }

    /// Matching verifier
    pub fn verifier(&self) -> Ed25519Verifier {
        Ed25519Verifier {
            key: self.key.verifying_key(),
        }
    }
}
