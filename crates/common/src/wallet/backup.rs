//! Password-protected export of the master secret
//!
//! The password is stretched with Argon2id under a fresh 16-byte salt and the
//! resulting key seals the raw scalar with AES-256-GCM. Any failure while
//! opening a blob (unknown version, bad encoding, wrong password, bad tag)
//! collapses to [`BackupError::DecryptionFailed`].

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::master::MasterSecret;

pub const BACKUP_VERSION: u32 = 1;
pub const MIN_PASSWORD_LEN: usize = 8;

const SALT_SIZE: usize = 16;
const IV_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("password must be at least {} characters", MIN_PASSWORD_LEN)]
    WeakPassword,
    #[error("wrong password or corrupted data")]
    DecryptionFailed,
    #[error("backup error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters argon2 accepts. Only for tests.
    pub fn fast_insecure() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn derive_key(
        &self,
        password: &str,
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, argon2::Error> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )?;
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params).hash_password_into(
            password.as_bytes(),
            salt,
            &mut key[..],
        )?;
        Ok(key)
    }
}

/// `{v, salt, iv, data}`, everything but `v` base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupBlob {
    pub v: u32,
    #[serde(with = "crate::encoding::b64")]
    pub salt: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub data: Vec<u8>,
}

impl BackupBlob {
    pub fn seal(
        master: &MasterSecret,
        password: &str,
        params: &KdfParams,
    ) -> Result<Self, BackupError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackupError::WeakPassword);
        }

        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        getrandom::getrandom(&mut salt)
            .and_then(|_| getrandom::getrandom(&mut iv))
            .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {}", e))?;

        let key = params
            .derive_key(password, &salt)
            .map_err(|e| anyhow::anyhow!("kdf error: {}", e))?;
        let data = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]))
            .encrypt(Nonce::from_slice(&iv), master.to_bytes().as_slice())
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;

        Ok(Self {
            v: BACKUP_VERSION,
            salt: salt.to_vec(),
            iv: iv.to_vec(),
            data,
        })
    }

    pub fn open(&self, password: &str, params: &KdfParams) -> Result<MasterSecret, BackupError> {
        if self.v != BACKUP_VERSION || self.iv.len() != IV_SIZE || self.salt.is_empty() {
            return Err(BackupError::DecryptionFailed);
        }
        let key = params
            .derive_key(password, &self.salt)
            .map_err(|_| BackupError::DecryptionFailed)?;
        let plaintext = Zeroizing::new(
            Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]))
                .decrypt(Nonce::from_slice(&self.iv), self.data.as_ref())
                .map_err(|_| BackupError::DecryptionFailed)?,
        );
        MasterSecret::from_slice(&plaintext).ok_or(BackupError::DecryptionFailed)
    }

    /// Parse an exported blob; malformed input is indistinguishable from a bad password
    pub fn from_json(json: &str) -> Result<Self, BackupError> {
        serde_json::from_str(json).map_err(|_| BackupError::DecryptionFailed)
    }

    pub fn to_json(&self) -> Result<String, BackupError> {
        serde_json::to_string_pretty(self).map_err(|e| anyhow::Error::from(e).into())
    }
}
