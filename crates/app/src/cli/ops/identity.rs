use clap::{Args, Subcommand};

use common::wallet::VaultError;
use vellum::identity::{IdentityError, IdentityRecord, WalletAuthenticator};
use vellum::state::{AppState, StateError};

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Identity {
    #[command(subcommand)]
    pub command: IdentityCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IdentityCommand {
    /// Generate a sharing key protected by the wallet
    Create {
        /// Name other people address documents to
        #[arg(long)]
        handle: String,
    },
    /// Show the sharing handle and public key
    Show,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityOpError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Load the sharing identity and unlock its private key with the wallet
pub async fn unlock(
    state: &AppState,
) -> Result<(IdentityRecord, common::crypto::SecretKey), IdentityOpError> {
    let record = IdentityRecord::load(&state.identity_path)?;
    let vault = state.vault()?;
    let secret = record.unlock(&WalletAuthenticator::new(&vault)).await?;
    Ok((record, secret))
}

#[async_trait::async_trait]
impl Op for Identity {
    type Error = IdentityOpError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;

        match &self.command {
            IdentityCommand::Create { handle } => {
                if state.identity_path.exists() {
                    return Err(IdentityError::AlreadyExists.into());
                }
                let vault = state.vault()?;
                let (record, _) =
                    IdentityRecord::create(handle, &WalletAuthenticator::new(&vault)).await?;
                record.save_new(&state.identity_path)?;
                tracing::info!(handle = %record.handle, "created sharing identity");
                Ok(format!(
                    "Created sharing identity '{}'\nPublic key: {}",
                    record.handle, record.public_key
                ))
            }
            IdentityCommand::Show => {
                let record = IdentityRecord::load(&state.identity_path)?;
                Ok(format!(
                    "Handle: {}\nPublic key: {}\nCreated: {}",
                    record.handle, record.public_key, record.created_at
                ))
            }
        }
    }
}
