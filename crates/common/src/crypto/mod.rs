//! Cryptographic primitives for Vellum documents
//!
//! - **Hashing**: SHA-256 content fingerprints, used as on-chain commitments
//! - **Envelope encryption**: ChaCha20-Poly1305 under a fresh [`EnvelopeKey`] per document
//! - **Key grants**: X25519 + HKDF-SHA256 + AES-KW wrap of an envelope key for one recipient
//! - **Key protection**: AES-256-GCM at-rest sealing of a sharing private key under a
//!   key derived from an external authenticator's signature
//!
//! # Security Model
//!
//! ## Sharing identity
//! Each user has an Ed25519 keypair (`SecretKey`/`PublicKey`) used only for sharing.
//! It never controls funds; spending keys come from the wallet's derivation engine.
//!
//! ## Documents
//! A document is encrypted once. Each reader, the author included, receives a
//! [`WrappedKeyGrant`] carrying the envelope key wrapped for their public key.
//! Adding a reader means adding a grant; the ciphertext never changes.
//!
//! ## Failure reporting
//! Decrypt and unwrap failures are reported as a single generic error kind. The
//! cause (tag mismatch, wrong key, truncation) is never surfaced.

pub mod envelope;
mod grant;
mod hash;
mod keys;
mod protection;

pub use ed25519_dalek::Signature;
pub use envelope::{EncryptedDocument, EnvelopeKey, SecretError, ENVELOPE_KEY_SIZE};
pub use grant::{
    unwrap, wrap_for_recipient, SecretShareError, WrappedKey, WrappedKeyGrant, WRAPPED_KEY_SIZE,
};
pub use hash::{digest, digest_reader, ContentHash, HashError};
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
pub use protection::{
    AuthSignature, Authenticator, ProtectedPrivateKey, ProtectionError, ProtectionKey,
    PROTECTION_CHALLENGE,
};
