//! At-rest protection for a sharing identity's private key
//!
//! The protection key is derived from a signature produced by an external
//! authenticator (for example the wallet used to log in) over a fixed
//! challenge. It is never stored: each session asks the authenticator to sign
//! [`PROTECTION_CHALLENGE`] again and re-derives it.
//!
//! There is intentionally no recovery path. Losing access to the
//! authenticator makes every [`ProtectedPrivateKey`] sealed under it
//! permanently unreadable.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::keys::SecretKey;

/// The message the external authenticator is asked to sign
pub const PROTECTION_CHALLENGE: &str = "Vellum: unlock document sharing key";

const IV_SIZE: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum ProtectionError {
    #[error("authenticator error: {0}")]
    Authenticator(String),
    #[error("protection error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("wrong password or corrupted data")]
    DecryptionFailed,
}

/// What the host's authenticator hands back for a challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSignature {
    pub signature: String,
    pub address: String,
}

/// Host-supplied signing oracle (e.g. a login wallet)
///
/// The engine treats it as opaque: it only requires that signing the same
/// challenge again yields the same signature string.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_message(&self, challenge: &str) -> Result<AuthSignature, ProtectionError>;
}

/// Symmetric key derived from an authenticator signature; lives for one session
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ProtectionKey([u8; 32]);

impl fmt::Debug for ProtectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProtectionKey(..)")
    }
}

impl ProtectionKey {
    /// SHA-256 of the signature string
    pub fn from_signature(signature: &str) -> Self {
        ProtectionKey(Sha256::digest(signature.as_bytes()).into())
    }

    /// Ask the authenticator to sign the fixed challenge and derive the key from it
    pub async fn request(authenticator: &dyn Authenticator) -> Result<Self, ProtectionError> {
        let signed = authenticator.sign_message(PROTECTION_CHALLENGE).await?;
        tracing::debug!(address = %signed.address, "derived protection key from authenticator");
        Ok(Self::from_signature(&signed.signature))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// A sharing private key sealed under a [`ProtectionKey`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPrivateKey {
    #[serde(with = "crate::encoding::b64")]
    encrypted: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    iv: Vec<u8>,
}

impl ProtectedPrivateKey {
    /// Encrypt `key` under `protection` with a fresh random iv
    pub fn seal(key: &SecretKey, protection: &ProtectionKey) -> Result<Self, ProtectionError> {
        let mut iv = [0u8; IV_SIZE];
        getrandom::getrandom(&mut iv)
            .map_err(|e| anyhow::anyhow!("failed to generate iv: {}", e))?;

        let plaintext = Zeroizing::new(key.to_bytes());
        let encrypted = protection
            .cipher()
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;

        Ok(Self {
            encrypted,
            iv: iv.to_vec(),
        })
    }

    /// Decrypt with the session's protection key
    pub fn open(&self, protection: &ProtectionKey) -> Result<SecretKey, ProtectionError> {
        if self.iv.len() != IV_SIZE {
            return Err(ProtectionError::DecryptionFailed);
        }
        let plaintext = Zeroizing::new(
            protection
                .cipher()
                .decrypt(Nonce::from_slice(&self.iv), self.encrypted.as_ref())
                .map_err(|_| ProtectionError::DecryptionFailed)?,
        );
        SecretKey::from_slice(&plaintext).map_err(|_| ProtectionError::DecryptionFailed)
    }
}
