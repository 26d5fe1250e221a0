use std::fmt::Debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed receipt log: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("no receipt for {0}")]
    NotFound(String),
}

/// Identity of one inscription attempt
///
/// The same commitment may be inscribed several times from one derived key
/// as long as the payloads differ (another path, kind or ticker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptKey<'a> {
    pub commitment_hash: &'a str,
    pub derivation_path: &'a str,
    pub payload_hash: &'a str,
}

/// One entry in the ownership chain
///
/// `txid` stays `None` until a broadcast is confirmed by the relay; a receipt
/// without one means "hashed but not on chain yet". While a broadcast is
/// outstanding, `raw_tx` holds the exact signed transaction so a retry can
/// resubmit it instead of building a second one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InscriptionReceipt {
    pub commitment_hash: String,
    pub derivation_path: String,
    /// [`Inscription::fingerprint`](super::Inscription::fingerprint) of the payload
    #[serde(default)]
    pub payload_hash: String,
    pub timestamp: DateTime<Utc>,
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_tx: Option<String>,
}

impl InscriptionReceipt {
    pub fn pending(key: ReceiptKey<'_>) -> Self {
        Self {
            commitment_hash: key.commitment_hash.to_string(),
            derivation_path: key.derivation_path.to_string(),
            payload_hash: key.payload_hash.to_string(),
            timestamp: Utc::now(),
            txid: None,
            raw_tx: None,
        }
    }

    pub fn key(&self) -> ReceiptKey<'_> {
        ReceiptKey {
            commitment_hash: &self.commitment_hash,
            derivation_path: &self.derivation_path,
            payload_hash: &self.payload_hash,
        }
    }

    pub fn matches(&self, key: ReceiptKey<'_>) -> bool {
        self.key() == key
    }

    pub fn is_confirmed(&self) -> bool {
        self.txid.is_some()
    }
}

/// Append-only log of inscription receipts
///
/// Entries are keyed by [`ReceiptKey`]; `update` rewrites the latest entry
/// for a key in place (to fill in a txid) and never drops entries.
pub trait ReceiptStore: Send + Sync + Debug {
    fn list(&self) -> Result<Vec<InscriptionReceipt>, ReceiptError>;

    fn append(&self, receipt: InscriptionReceipt) -> Result<(), ReceiptError>;

    fn update(&self, receipt: &InscriptionReceipt) -> Result<(), ReceiptError>;

    /// Latest receipt for the key, if any
    fn find(&self, key: ReceiptKey<'_>) -> Result<Option<InscriptionReceipt>, ReceiptError> {
        Ok(self.list()?.into_iter().rev().find(|r| r.matches(key)))
    }
}

fn replace_latest(
    receipts: &mut [InscriptionReceipt],
    receipt: &InscriptionReceipt,
) -> Result<(), ReceiptError> {
    let slot = receipts
        .iter_mut()
        .rev()
        .find(|r| r.matches(receipt.key()))
        .ok_or_else(|| {
            ReceiptError::NotFound(format!(
                "{} at {}",
                receipt.commitment_hash, receipt.derivation_path
            ))
        })?;
    *slot = receipt.clone();
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MemoryReceiptStore {
    inner: Arc<RwLock<Vec<InscriptionReceipt>>>,
}

impl MemoryReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptStore for MemoryReceiptStore {
    fn list(&self) -> Result<Vec<InscriptionReceipt>, ReceiptError> {
        Ok(self.inner.read().clone())
    }

    fn append(&self, receipt: InscriptionReceipt) -> Result<(), ReceiptError> {
        self.inner.write().push(receipt);
        Ok(())
    }

    fn update(&self, receipt: &InscriptionReceipt) -> Result<(), ReceiptError> {
        replace_latest(&mut self.inner.write(), receipt)
    }
}

/// Receipts as a JSON array on disk, rewritten atomically on every change
#[derive(Debug)]
pub struct FileReceiptStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileReceiptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<InscriptionReceipt>, ReceiptError> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, receipts: &[InscriptionReceipt]) -> Result<(), ReceiptError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(&serde_json::to_vec_pretty(receipts)?)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl ReceiptStore for FileReceiptStore {
    fn list(&self) -> Result<Vec<InscriptionReceipt>, ReceiptError> {
        let _guard = self.lock.lock();
        self.read()
    }

    fn append(&self, receipt: InscriptionReceipt) -> Result<(), ReceiptError> {
        let _guard = self.lock.lock();
        let mut receipts = self.read()?;
        receipts.push(receipt);
        self.write(&receipts)
    }

    fn update(&self, receipt: &InscriptionReceipt) -> Result<(), ReceiptError> {
        let _guard = self.lock.lock();
        let mut receipts = self.read()?;
        replace_latest(&mut receipts, receipt)?;
        self.write(&receipts)
    }
}
