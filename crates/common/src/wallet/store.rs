use std::fmt::{self, Debug};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The stored bytes are not a vault record
    #[error("malformed vault record")]
    Malformed,
    #[error("a vault record already exists")]
    AlreadyExists,
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Master,
}

/// The only persisted form of the master secret
///
/// `salt` carries the device key material the wrapping key is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMasterRecord {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(with = "crate::encoding::b64")]
    pub encrypted_key: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::encoding::b64")]
    pub salt: Vec<u8>,
}

/// Exclusive claim on a device profile, released when dropped
pub struct MutationLock {
    _held: Box<dyn Send + Sync>,
}

impl MutationLock {
    fn new(held: impl Send + Sync + 'static) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl Debug for MutationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MutationLock")
    }
}

/// Where one device profile keeps its [`EncryptedMasterRecord`]
///
/// Implementations must make `save`, `create` and `remove` atomic: a reader
/// sees either the old record, the new record, or nothing, never a torn
/// write. The mutation lock is shared by every store opened on the same
/// profile, including stores in other processes.
pub trait VaultStore: Send + Sync + Debug {
    fn load(&self) -> Result<Option<EncryptedMasterRecord>, StoreError>;

    fn exists(&self) -> Result<bool, StoreError>;

    /// Write `record`, replacing any existing one
    fn save(&self, record: &EncryptedMasterRecord) -> Result<(), StoreError>;

    /// Write `record` only if the profile has none; [`StoreError::AlreadyExists`] otherwise
    fn create(&self, record: &EncryptedMasterRecord) -> Result<(), StoreError>;

    /// Returns whether there was a record to remove
    fn remove(&self) -> Result<bool, StoreError>;

    /// Claim the profile for one mutation, or `None` while someone else holds it
    fn try_lock(&self) -> Result<Option<MutationLock>, StoreError>;
}

/// JSON record on disk, replaced via write-to-temp and rename
///
/// Mutations are serialised through an advisory lock on a sibling
/// `<record>.lock` file.
#[derive(Debug, Clone)]
pub struct FileVaultStore {
    path: PathBuf,
}

impl FileVaultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn staged(
        &self,
        record: &EncryptedMasterRecord,
    ) -> Result<tempfile::NamedTempFile, StoreError> {
        let dir = self.dir();
        std::fs::create_dir_all(dir)?;

        let data = serde_json::to_vec_pretty(record).map_err(anyhow::Error::from)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&data)?;
        file.as_file().sync_all()?;
        Ok(file)
    }
}

impl VaultStore for FileVaultStore {
    fn load(&self) -> Result<Option<EncryptedMasterRecord>, StoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_slice(&data).map_err(|_| StoreError::Malformed)?;
        Ok(Some(record))
    }

    fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.path.try_exists()?)
    }

    fn save(&self, record: &EncryptedMasterRecord) -> Result<(), StoreError> {
        self.staged(record)?.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!(path = %self.path.display(), "vault record written");
        Ok(())
    }

    fn create(&self, record: &EncryptedMasterRecord) -> Result<(), StoreError> {
        match self.staged(record)?.persist_noclobber(&self.path) {
            Ok(_) => {
                tracing::debug!(path = %self.path.display(), "vault record created");
                Ok(())
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists)
            }
            Err(e) => Err(e.error.into()),
        }
    }

    fn remove(&self) -> Result<bool, StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "vault record removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn try_lock(&self) -> Result<Option<MutationLock>, StoreError> {
        std::fs::create_dir_all(self.dir())?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        match file.try_lock() {
            Ok(()) => Ok(Some(MutationLock::new(file))),
            Err(TryLockError::WouldBlock) => {
                tracing::debug!(path = %self.path.display(), "vault profile is locked");
                Ok(None)
            }
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }
}

/// Clears the shared busy flag of a [`MemoryVaultStore`] on drop
struct BusyFlag(Arc<AtomicBool>);

impl Drop for BusyFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// In-memory store for tests and ephemeral profiles
///
/// Clones share the record and the mutation lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryVaultStore {
    inner: Arc<RwLock<Option<EncryptedMasterRecord>>>,
    busy: Arc<AtomicBool>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VaultStore for MemoryVaultStore {
    fn load(&self) -> Result<Option<EncryptedMasterRecord>, StoreError> {
        Ok(self.inner.read().clone())
    }

    fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.inner.read().is_some())
    }

    fn save(&self, record: &EncryptedMasterRecord) -> Result<(), StoreError> {
        *self.inner.write() = Some(record.clone());
        Ok(())
    }

    fn create(&self, record: &EncryptedMasterRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.is_some() {
            return Err(StoreError::AlreadyExists);
        }
        *inner = Some(record.clone());
        Ok(())
    }

    fn remove(&self) -> Result<bool, StoreError> {
        Ok(self.inner.write().take().is_some())
    }

    fn try_lock(&self) -> Result<Option<MutationLock>, StoreError> {
        match self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Ok(Some(MutationLock::new(BusyFlag(self.busy.clone())))),
            Err(_) => Ok(None),
        }
    }
}
