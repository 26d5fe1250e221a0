/**
 * Cryptographic types and operations.
 *  - Content hashing
 *  - Sharing identities and per-recipient key grants
 *  - Envelope encryption of documents
 *  - At-rest protection of sharing keys
 */
pub mod crypto;
/**
 * A document encrypted once, together with the
 *  independent grants that let each reader open it.
 */
pub mod document;
/**
 * Base64 helpers shared by the persisted layouts.
 */
pub mod encoding;
/**
 * Building, signing and broadcasting on-chain
 *  commitments from derived keys, plus the
 *  ownership chain of receipts.
 */
pub mod inscription;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;
/**
 * The master key vault and the deterministic
 *  derivation of purpose-scoped child keys.
 */
pub mod wallet;

pub mod prelude {
    pub use crate::crypto::{ContentHash, PublicKey, SecretKey};
    pub use crate::document::SealedDocument;
    pub use crate::inscription::{Inscription, InscriptionBuilder, InscriptionReceipt};
    pub use crate::version::build_info;
    pub use crate::wallet::{DerivedChild, MasterKeyInfo, VaultHandle};
}
