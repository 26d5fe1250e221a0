use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use common::crypto::{digest_reader, ContentHash, HashError};
use common::inscription::{
    ChainError, Inscription, InscriptionBuilder, InscriptionError, ReceiptError, ReceiptStore,
    SchedulePolicy, StampMetadata,
};
use common::wallet::VaultError;
use vellum::state::{AppState, StateError};

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Inscribe {
    #[command(subcommand)]
    pub command: InscribeCommand,
}

/// What gets committed on chain: a file's SHA-256 or a precomputed hash
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct CommitmentSource {
    /// Hash this file and commit the digest
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Hex SHA-256 to commit directly
    #[arg(long)]
    pub hash: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum InscribeCommand {
    /// Timestamp a commitment from a derived address
    Stamp {
        #[command(flatten)]
        source: CommitmentSource,
        /// Slug of the paying key under the protocol
        #[arg(long)]
        slug: String,
        #[arg(long, default_value = "stamp")]
        protocol: String,
        /// Logical location recorded alongside the commitment
        #[arg(long)]
        path: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Deploy and mint a token bound to a commitment
    Mint {
        #[command(flatten)]
        source: CommitmentSource,
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        amount: u64,
        #[arg(long, default_value_t = 0)]
        decimals: u8,
        /// Slug of the paying key; defaults to the ticker
        #[arg(long)]
        slug: Option<String>,
        #[arg(long, default_value = "token")]
        protocol: String,
        #[arg(long)]
        path: String,
    },
    /// Inscribe a JSON array of inscriptions from one derived address
    Batch {
        /// JSON file holding the inscriptions
        items: PathBuf,
        #[arg(long)]
        slug: String,
        #[arg(long, default_value = "token")]
        protocol: String,
        /// Pause between items, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        /// Double the pause after each failure, up to this many milliseconds
        #[arg(long)]
        backoff_max_ms: Option<u64>,
    },
    /// List recorded receipts
    Receipts,
}

#[derive(Debug, thiserror::Error)]
pub enum InscribeError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Inscription(#[from] InscriptionError),
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("malformed inscription list: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} of {1} inscriptions failed")]
    BatchIncomplete(usize, usize),
}

impl CommitmentSource {
    fn commitment(&self) -> Result<String, InscribeError> {
        match (&self.file, &self.hash) {
            (Some(file), _) => Ok(digest_reader(BufReader::new(File::open(file)?))?.to_hex()),
            (None, Some(hash)) => Ok(ContentHash::from_hex(hash)?.to_hex()),
            (None, None) => Err(HashError::Invalid("no commitment given".to_string()).into()),
        }
    }

    fn metadata(&self, title: &Option<String>) -> Result<StampMetadata, InscribeError> {
        let mut metadata = StampMetadata {
            title: title.clone(),
            ..StampMetadata::default()
        };
        if let Some(file) = &self.file {
            metadata.file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            metadata.size = Some(fs::metadata(file)?.len());
        }
        Ok(metadata)
    }
}

fn builder(state: &AppState, ctx: &OpContext) -> Result<InscriptionBuilder, InscribeError> {
    let chain = state.chain_client(ctx.chain_url.as_ref())?;
    Ok(InscriptionBuilder::new(
        Arc::new(chain),
        Arc::new(state.receipts()),
        state.inscription_config(),
    ))
}

fn format_receipt(receipt: &common::inscription::InscriptionReceipt) -> String {
    format!(
        "{} {} {} {}",
        receipt.timestamp.to_rfc3339(),
        receipt.derivation_path,
        receipt.commitment_hash,
        receipt.txid.as_deref().unwrap_or("(pending)")
    )
}

#[async_trait::async_trait]
impl Op for Inscribe {
    type Error = InscribeError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;

        match &self.command {
            InscribeCommand::Stamp {
                source,
                slug,
                protocol,
                path,
                title,
            } => {
                let inscription = Inscription::Stamp {
                    commitment: source.commitment()?,
                    path: path.clone(),
                    metadata: source.metadata(title)?,
                };
                let child = state.vault()?.derive(protocol, slug)?;
                let receipt = builder(&state, ctx)?.inscribe(&child, &inscription).await?;
                Ok(format!(
                    "Stamped {} from {}\nTxid: {}",
                    receipt.commitment_hash,
                    child.address(),
                    receipt.txid.as_deref().unwrap_or("(pending)")
                ))
            }
            InscribeCommand::Mint {
                source,
                ticker,
                amount,
                decimals,
                slug,
                protocol,
                path,
            } => {
                let inscription = Inscription::TokenMint {
                    commitment: source.commitment()?,
                    path: path.clone(),
                    ticker: ticker.clone(),
                    amount: *amount,
                    decimals: *decimals,
                };
                let slug = slug.as_deref().unwrap_or(ticker);
                let child = state.vault()?.derive(protocol, slug)?;
                let receipt = builder(&state, ctx)?.inscribe(&child, &inscription).await?;
                Ok(format!(
                    "Minted {} {} from {}\nTxid: {}",
                    amount,
                    ticker,
                    child.address(),
                    receipt.txid.as_deref().unwrap_or("(pending)")
                ))
            }
            InscribeCommand::Batch {
                items,
                slug,
                protocol,
                delay_ms,
                backoff_max_ms,
            } => {
                let inscriptions: Vec<Inscription> = serde_json::from_slice(&fs::read(items)?)?;
                let total = inscriptions.len();
                let delay = Duration::from_millis(*delay_ms);
                let policy = match backoff_max_ms {
                    Some(max) => SchedulePolicy::Backoff {
                        base: delay,
                        max: Duration::from_millis(*max),
                    },
                    None if delay.is_zero() => SchedulePolicy::Immediate,
                    None => SchedulePolicy::FixedDelay(delay),
                };

                let child = state.vault()?.derive(protocol, slug)?;
                let report = builder(&state, ctx)?
                    .mint_batch(&child, inscriptions, policy)
                    .await;

                for outcome in &report.outcomes {
                    match &outcome.result {
                        Ok(receipt) => tracing::info!(
                            index = outcome.index,
                            txid = receipt.txid.as_deref().unwrap_or_default(),
                            "batch item inscribed"
                        ),
                        Err(e) => tracing::warn!(index = outcome.index, error = %e, "batch item failed"),
                    }
                }

                let failed = report.failed().len();
                if failed > 0 {
                    return Err(InscribeError::BatchIncomplete(failed, total));
                }
                Ok(report
                    .succeeded()
                    .map(format_receipt)
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            InscribeCommand::Receipts => Ok(state
                .receipts()
                .list()?
                .iter()
                .map(format_receipt)
                .collect::<Vec<_>>()
                .join("\n")),
        }
    }
}
