use std::fs;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::crypto::{
    AuthSignature, Authenticator, KeyError, ProtectedPrivateKey, ProtectionError, ProtectionKey,
    PublicKey, SecretKey,
};
use common::wallet::{VaultHandle, VaultStore};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no sharing identity. Run 'vellum identity create' first")]
    NotFound,
    #[error("sharing identity already exists")]
    AlreadyExists,
    #[error("protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("unlocked key does not match the recorded public key")]
    Mismatch,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed identity record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Uses the vault's master key as the login authenticator
///
/// The signature is deterministic, so every session recovers the same
/// protection key for as long as the same master key is installed.
pub struct WalletAuthenticator<'a, S: VaultStore> {
    vault: &'a VaultHandle<S>,
}

impl<'a, S: VaultStore> WalletAuthenticator<'a, S> {
    pub fn new(vault: &'a VaultHandle<S>) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl<'a, S: VaultStore> Authenticator for WalletAuthenticator<'a, S> {
    async fn sign_message(&self, challenge: &str) -> Result<AuthSignature, ProtectionError> {
        let network = self.vault.network();
        let (signature, info) = self
            .vault
            .with_master(|master| (master.sign_message(challenge), master.info(network)))
            .map_err(|e| ProtectionError::Authenticator(e.to_string()))?;

        Ok(AuthSignature {
            signature: hex::encode(signature.serialize_der()),
            address: info.address,
        })
    }
}

/// A sharing identity as kept on disk: the public half in the clear and the
/// private half sealed under the authenticator-derived protection key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub handle: String,
    pub public_key: PublicKey,
    pub protected_key: ProtectedPrivateKey,
    pub created_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Generate a fresh sharing key and seal it for `handle`
    pub async fn create(
        handle: &str,
        authenticator: &dyn Authenticator,
    ) -> Result<(Self, SecretKey), IdentityError> {
        let secret = SecretKey::generate()?;
        let protection = ProtectionKey::request(authenticator).await?;
        let protected_key = ProtectedPrivateKey::seal(&secret, &protection)?;

        let record = Self {
            handle: handle.to_string(),
            public_key: secret.public(),
            protected_key,
            created_at: Utc::now(),
        };
        Ok((record, secret))
    }

    /// Recover the private key for this session
    pub async fn unlock(&self, authenticator: &dyn Authenticator) -> Result<SecretKey, IdentityError> {
        let protection = ProtectionKey::request(authenticator).await?;
        let secret = self.protected_key.open(&protection)?;
        if secret.public() != self.public_key {
            return Err(IdentityError::Mismatch);
        }
        Ok(secret)
    }

    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        match fs::read(path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(IdentityError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the record, refusing to replace an existing one
    pub fn save_new(&self, path: &Path) -> Result<(), IdentityError> {
        if path.exists() {
            return Err(IdentityError::AlreadyExists);
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}
