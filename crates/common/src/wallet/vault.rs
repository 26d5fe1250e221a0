use std::fmt::Debug;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use bitcoin::Network;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::backup::{BackupBlob, BackupError, KdfParams};
use super::derive::{self, DerivationError, DerivedChild, Manifest};
use super::master::{MasterKeyInfo, MasterSecret};
use super::store::{EncryptedMasterRecord, MutationLock, RecordKind, StoreError, VaultStore};

const DEVICE_KEY_INFO: &[u8] = b"vellum/device-key/v1";
const DEVICE_MATERIAL_SIZE: usize = 32;
const IV_SIZE: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("no master key in this vault")]
    VaultNotFound,
    #[error("a master key already exists; delete it first")]
    AlreadyExists,
    #[error("password must be at least {} characters", super::backup::MIN_PASSWORD_LEN)]
    WeakPassword,
    #[error("wrong password or corrupted data")]
    DecryptionFailed,
    #[error("another vault operation is in progress")]
    VaultBusy,
    #[error("vault storage error: {0}")]
    Storage(StoreError),
    #[error("derivation error: {0}")]
    Derivation(#[from] DerivationError),
    #[error("vault error: {0}")]
    Default(#[from] anyhow::Error),
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Malformed => VaultError::DecryptionFailed,
            StoreError::AlreadyExists => VaultError::AlreadyExists,
            other => VaultError::Storage(other),
        }
    }
}

impl From<BackupError> for VaultError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::WeakPassword => VaultError::WeakPassword,
            BackupError::DecryptionFailed => VaultError::DecryptionFailed,
            BackupError::Default(e) => VaultError::Default(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultConfig {
    pub network: Network,
    pub kdf: KdfParams,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            kdf: KdfParams::default(),
        }
    }
}

/// Binds the at-rest master record to the current device
///
/// An OS secure-storage backend would keep its key outside the record and
/// leave `salt` as an opaque handle.
pub trait DeviceBinding: Send + Sync + Debug {
    fn seal(&self, master: &MasterSecret) -> Result<EncryptedMasterRecord, VaultError>;

    fn open(&self, record: &EncryptedMasterRecord) -> Result<MasterSecret, VaultError>;
}

/// Fallback binding that keeps the device key material inside the record it protects
///
/// This only hides the master from casual inspection of the file: anyone who
/// can read the record can decrypt it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordBoundDevice;

impl RecordBoundDevice {
    fn cipher(material: &[u8]) -> Result<Aes256Gcm, VaultError> {
        let mut key = Zeroizing::new([0u8; 32]);
        Hkdf::<Sha256>::new(None, material)
            .expand(DEVICE_KEY_INFO, &mut key[..])
            .map_err(|_| VaultError::DecryptionFailed)?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..])))
    }
}

impl DeviceBinding for RecordBoundDevice {
    fn seal(&self, master: &MasterSecret) -> Result<EncryptedMasterRecord, VaultError> {
        let mut material = Zeroizing::new([0u8; DEVICE_MATERIAL_SIZE]);
        let mut iv = [0u8; IV_SIZE];
        getrandom::getrandom(&mut material[..])
            .and_then(|_| getrandom::getrandom(&mut iv))
            .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {}", e))?;

        let encrypted_key = Self::cipher(&material[..])?
            .encrypt(Nonce::from_slice(&iv), master.to_bytes().as_slice())
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;

        Ok(EncryptedMasterRecord {
            kind: RecordKind::Master,
            encrypted_key,
            iv: iv.to_vec(),
            salt: material.to_vec(),
        })
    }

    fn open(&self, record: &EncryptedMasterRecord) -> Result<MasterSecret, VaultError> {
        if record.iv.len() != IV_SIZE || record.salt.len() != DEVICE_MATERIAL_SIZE {
            return Err(VaultError::DecryptionFailed);
        }
        let plaintext = Zeroizing::new(
            Self::cipher(&record.salt)?
                .decrypt(Nonce::from_slice(&record.iv), record.encrypted_key.as_ref())
                .map_err(|_| VaultError::DecryptionFailed)?,
        );
        MasterSecret::from_slice(&plaintext).ok_or(VaultError::DecryptionFailed)
    }
}

/// One device profile's master key
///
/// Every operation goes through an explicit handle so several profiles can
/// live side by side. Mutations (`setup_master`, `import_backup`,
/// `delete_master`) hold the store's profile lock: a second one started on
/// the same profile while the first is running fails with
/// [`VaultError::VaultBusy`], whichever handle or process it comes from.
/// Reads never block.
#[derive(Debug)]
pub struct VaultHandle<S: VaultStore> {
    store: S,
    binding: Box<dyn DeviceBinding>,
    config: VaultConfig,
}

impl<S: VaultStore> VaultHandle<S> {
    pub fn new(store: S, config: VaultConfig) -> Self {
        Self::with_binding(store, config, RecordBoundDevice)
    }

    pub fn with_binding(store: S, config: VaultConfig, binding: impl DeviceBinding + 'static) -> Self {
        Self {
            store,
            binding: Box::new(binding),
            config,
        }
    }

    fn claim(&self) -> Result<MutationLock, VaultError> {
        self.store.try_lock()?.ok_or(VaultError::VaultBusy)
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Existence check; never decrypts
    pub fn has_master(&self) -> Result<bool, VaultError> {
        Ok(self.store.exists()?)
    }

    /// Generate and persist a brand new master key
    pub fn setup_master(&self) -> Result<MasterKeyInfo, VaultError> {
        let _lock = self.claim()?;
        if self.store.exists()? {
            return Err(VaultError::AlreadyExists);
        }

        let master = MasterSecret::generate()
            .map_err(|e| anyhow::anyhow!("failed to generate master key: {}", e))?;
        let record = self.binding.seal(&master)?;
        self.store.create(&record)?;

        let info = master.info(self.config.network);
        tracing::info!(address = %info.address, "created master key");
        Ok(info)
    }

    /// Decrypt the master for the duration of `f` only
    pub fn with_master<T>(&self, f: impl FnOnce(&MasterSecret) -> T) -> Result<T, VaultError> {
        let record = self.store.load()?.ok_or(VaultError::VaultNotFound)?;
        let master = self.binding.open(&record)?;
        Ok(f(&master))
    }

    pub fn master_info(&self) -> Result<MasterKeyInfo, VaultError> {
        self.with_master(|master| master.info(self.config.network))
    }

    pub fn export_backup(&self, password: &str) -> Result<BackupBlob, VaultError> {
        let blob = self.with_master(|master| BackupBlob::seal(master, password, &self.config.kdf))??;
        tracing::info!("exported master key backup");
        Ok(blob)
    }

    /// Restore a backup, replacing whatever master this vault held
    pub fn import_backup(
        &self,
        blob: &BackupBlob,
        password: &str,
    ) -> Result<MasterKeyInfo, VaultError> {
        let _lock = self.claim()?;
        let master = blob.open(password, &self.config.kdf)?;
        let record = self.binding.seal(&master)?;
        self.store.save(&record)?;

        let info = master.info(self.config.network);
        tracing::info!(address = %info.address, "imported master key backup");
        Ok(info)
    }

    /// Irreversibly erase the master record
    pub fn delete_master(&self) -> Result<(), VaultError> {
        let _lock = self.claim()?;
        if !self.store.remove()? {
            return Err(VaultError::VaultNotFound);
        }
        tracing::info!("deleted master key");
        Ok(())
    }

    pub fn derive(&self, protocol: &str, slug: &str) -> Result<DerivedChild, VaultError> {
        Ok(self.with_master(|master| derive::derive(master, protocol, slug, self.config.network))??)
    }

    pub fn build_manifest<P, T>(&self, purposes: &[(P, T)]) -> Result<Manifest, VaultError>
    where
        P: AsRef<str>,
        T: AsRef<str>,
    {
        Ok(self.with_master(|master| derive::build_manifest(master, purposes, self.config.network))??)
    }
}

#[cfg(test)]
mod test {
    use super::super::store::MemoryVaultStore;
    use super::*;

    fn vault() -> VaultHandle<MemoryVaultStore> {
        VaultHandle::new(
            MemoryVaultStore::new(),
            VaultConfig {
                network: Network::Bitcoin,
                kdf: KdfParams::fast_insecure(),
            },
        )
    }

    #[test]
    fn test_setup_once() {
        let vault = vault();
        assert!(!vault.has_master().unwrap());
        let info = vault.setup_master().unwrap();
        assert!(vault.has_master().unwrap());
        assert_eq!(vault.master_info().unwrap(), info);
        assert!(matches!(vault.setup_master(), Err(VaultError::AlreadyExists)));
    }

    #[test]
    fn test_empty_vault() {
        let vault = vault();
        assert!(matches!(vault.master_info(), Err(VaultError::VaultNotFound)));
        assert!(matches!(vault.derive("stamp", "x"), Err(VaultError::VaultNotFound)));
        assert!(matches!(vault.export_backup("long enough"), Err(VaultError::VaultNotFound)));
        assert!(matches!(vault.delete_master(), Err(VaultError::VaultNotFound)));
    }

    #[test]
    fn test_record_does_not_contain_secret() {
        let vault = vault();
        vault.setup_master().unwrap();
        let record = vault.store().load().unwrap().unwrap();
        let secret = vault.with_master(|m| m.to_bytes().to_vec()).unwrap();
        assert_eq!(record.kind, RecordKind::Master);
        assert_ne!(record.encrypted_key[..32], secret[..]);
        assert_eq!(record.encrypted_key.len(), 32 + 16);
    }

    #[test]
    fn test_tampered_record() {
        let vault = vault();
        vault.setup_master().unwrap();
        let mut record = vault.store().load().unwrap().unwrap();
        record.encrypted_key[0] ^= 1;
        vault.store().save(&record).unwrap();
        assert!(matches!(vault.master_info(), Err(VaultError::DecryptionFailed)));

        record.iv.truncate(4);
        vault.store().save(&record).unwrap();
        assert!(matches!(vault.master_info(), Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn test_busy_while_mutating() {
        let vault = vault();
        let _held = vault.store().try_lock().unwrap().unwrap();
        assert!(matches!(vault.setup_master(), Err(VaultError::VaultBusy)));
        assert!(matches!(vault.delete_master(), Err(VaultError::VaultBusy)));
        // reads are not serialised
        assert!(!vault.has_master().unwrap());
    }

    #[test]
    fn test_setup_never_replaces_a_record_written_meanwhile() {
        let vault = vault();
        let other = VaultHandle::new(vault.store().clone(), *vault.config());
        let first = other.setup_master().unwrap();

        // a record that appears after the existence check still wins
        let master = MasterSecret::generate().unwrap();
        let record = vault.binding.seal(&master).unwrap();
        assert!(matches!(
            vault.store().create(&record),
            Err(StoreError::AlreadyExists)
        ));
        assert!(matches!(vault.setup_master(), Err(VaultError::AlreadyExists)));
        assert_eq!(vault.master_info().unwrap(), first);
    }

    #[test]
    fn test_import_replaces_existing() {
        let source = vault();
        let source_info = source.setup_master().unwrap();
        let blob = source.export_backup("hunter2hunter2").unwrap();

        let target = vault();
        target.setup_master().unwrap();
        let imported = target.import_backup(&blob, "hunter2hunter2").unwrap();
        assert_eq!(imported, source_info);
        assert_eq!(target.master_info().unwrap(), source_info);
    }

    #[test]
    fn test_weak_password_export() {
        let vault = vault();
        vault.setup_master().unwrap();
        assert!(matches!(vault.export_backup("1234567"), Err(VaultError::WeakPassword)));
    }

    #[test]
    fn test_derive_through_vault() {
        let vault = vault();
        vault.setup_master().unwrap();
        let a = vault.derive("stamp", "INV-001").unwrap();
        let b = vault.derive("stamp", "INV-001").unwrap();
        assert_eq!(a.address(), b.address());
        assert!(matches!(vault.derive("a/b", "c"), Err(VaultError::Derivation(_))));
    }
}
