//! On-chain commitments paid for by derived keys
//!
//! The [`InscriptionBuilder`] selects the largest spendable output at a
//! derived address, builds a one-input transaction whose first output
//! carries an [`Inscription`], signs it with the derived key and hands it to
//! a [`ChainClient`] for broadcast. Every attempt lands in a
//! [`ReceiptStore`] first, which is what makes retries safe.

mod batch;
mod builder;
mod chain;
mod payload;
mod receipt;

pub use batch::{BatchOutcome, BatchReport, SchedulePolicy};
pub use builder::{
    forkid_signature_hash, InscriptionBuilder, InscriptionConfig, InscriptionError,
    SIGHASH_ALL_FORKID,
};
pub use chain::{
    ChainClient, ChainClientConfig, ChainError, HttpChainClient, Utxo, DEFAULT_CHAIN_API_URL,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use payload::{Inscription, PayloadError, StampMetadata, TOKEN_CONTENT_TYPE};
pub use receipt::{
    FileReceiptStore, InscriptionReceipt, MemoryReceiptStore, ReceiptError, ReceiptKey,
    ReceiptStore,
};
