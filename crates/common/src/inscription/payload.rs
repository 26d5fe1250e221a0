//! On-chain encodings for each inscription kind
//!
//! Payloads are a closed set of variants so a malformed combination of fields
//! can never reach a transaction.

use bitcoin::opcodes::all::{OP_ENDIF, OP_IF, OP_PUSHNUM_1, OP_RETURN};
use bitcoin::opcodes::OP_FALSE;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::{Amount, Script, ScriptBuf};
use serde::{Deserialize, Serialize};

pub const STAMP_APP: &str = "vellum";
pub const STAMP_TAG: &str = "stamp";
pub const ORD_TAG: &str = "ord";
pub const TOKEN_CONTENT_TYPE: &str = "application/bsv-20";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid inscription: {0}")]
    Invalid(String),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("payload too large to push")]
    TooLarge,
}

/// Descriptive fields recorded next to a stamped commitment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Inscription {
    /// A bare commitment in a zero-value data output
    #[serde(rename_all = "camelCase")]
    Stamp {
        commitment: String,
        path: String,
        #[serde(default)]
        metadata: StampMetadata,
    },
    /// A token deploy+mint carried by a minimal-value output
    #[serde(rename_all = "camelCase")]
    TokenMint {
        commitment: String,
        path: String,
        ticker: String,
        amount: u64,
        #[serde(default)]
        decimals: u8,
    },
}

#[derive(Serialize)]
struct TokenBody<'a> {
    p: &'a str,
    op: &'a str,
    sym: &'a str,
    amt: String,
    dec: String,
    commitment: &'a str,
    path: &'a str,
}

fn push(data: impl Into<Vec<u8>>) -> Result<PushBytesBuf, PayloadError> {
    PushBytesBuf::try_from(data.into()).map_err(|_| PayloadError::TooLarge)
}

impl Inscription {
    pub fn commitment(&self) -> &str {
        match self {
            Inscription::Stamp { commitment, .. } | Inscription::TokenMint { commitment, .. } => {
                commitment
            }
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Inscription::Stamp { path, .. } | Inscription::TokenMint { path, .. } => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Inscription::Stamp { .. } => "stamp",
            Inscription::TokenMint { .. } => "token-mint",
        }
    }

    /// Digest over every field, so two inscriptions share it only if they
    /// would put the same payload on chain
    pub fn fingerprint(&self) -> Result<String, PayloadError> {
        Ok(crate::crypto::digest(&serde_json::to_vec(self)?).to_hex())
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.commitment().trim().is_empty() {
            return Err(PayloadError::Invalid("commitment must not be empty".into()));
        }
        if let Inscription::TokenMint {
            ticker, amount, ..
        } = self
        {
            if ticker.trim().is_empty() {
                return Err(PayloadError::Invalid("ticker must not be empty".into()));
            }
            if *amount == 0 {
                return Err(PayloadError::Invalid("amount must be positive".into()));
            }
        }
        Ok(())
    }

    /// Value carried by the inscription output
    pub fn output_value(&self, token_output_value: Amount) -> Amount {
        match self {
            Inscription::Stamp { .. } => Amount::ZERO,
            Inscription::TokenMint { .. } => token_output_value,
        }
    }

    /// Script of the inscription output
    ///
    /// Stamps are an unspendable `OP_FALSE OP_RETURN` data carrier. Token mints
    /// pay `destination` and append an ordinal envelope after its script.
    pub fn script(&self, destination: &Script) -> Result<ScriptBuf, PayloadError> {
        self.validate()?;
        let script = match self {
            Inscription::Stamp {
                commitment,
                path,
                metadata,
            } => Builder::new()
                .push_opcode(OP_FALSE)
                .push_opcode(OP_RETURN)
                .push_slice(push(STAMP_APP)?)
                .push_slice(push(STAMP_TAG)?)
                .push_slice(push(commitment.as_str())?)
                .push_slice(push(path.as_str())?)
                .push_slice(push(serde_json::to_vec(metadata)?)?)
                .into_script(),
            Inscription::TokenMint {
                commitment,
                path,
                ticker,
                amount,
                decimals,
            } => {
                let body = serde_json::to_vec(&TokenBody {
                    p: "bsv-20",
                    op: "deploy+mint",
                    sym: ticker,
                    amt: amount.to_string(),
                    dec: decimals.to_string(),
                    commitment,
                    path,
                })?;
                Builder::from(destination.to_bytes())
                    .push_opcode(OP_FALSE)
                    .push_opcode(OP_IF)
                    .push_slice(push(ORD_TAG)?)
                    .push_opcode(OP_PUSHNUM_1)
                    .push_slice(push(TOKEN_CONTENT_TYPE)?)
                    .push_opcode(OP_FALSE)
                    .push_slice(push(body)?)
                    .push_opcode(OP_ENDIF)
                    .into_script()
            }
        };
        Ok(script)
    }
}
