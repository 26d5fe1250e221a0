//! The self-custodial key hierarchy
//!
//! A single [`MasterSecret`] per device profile, sealed at rest by a
//! [`VaultHandle`], from which purpose-bound children are derived on demand.
//! The master never leaves the vault in the clear except as a
//! password-protected [`BackupBlob`].

mod backup;
mod derive;
mod master;
mod store;
mod vault;

pub use backup::{BackupBlob, BackupError, KdfParams, BACKUP_VERSION, MIN_PASSWORD_LEN};
pub use derive::{
    build_manifest, derive, DerivationError, DerivedChild, Manifest, ManifestChild,
    DERIVATION_PREFIX, MANIFEST_PROTOCOL, MANIFEST_VERSION,
};
pub use master::{network_from_name, MasterKeyInfo, MasterSecret, MASTER_SECRET_SIZE};
pub use store::{
    EncryptedMasterRecord, FileVaultStore, MemoryVaultStore, MutationLock, RecordKind, StoreError,
    VaultStore,
};
pub use vault::{DeviceBinding, RecordBoundDevice, VaultConfig, VaultError, VaultHandle};
