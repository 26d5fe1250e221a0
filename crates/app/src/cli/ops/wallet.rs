use std::fs;
use std::path::PathBuf;

use clap::{Args, Subcommand};

use common::wallet::{BackupBlob, BackupError, KdfParams, VaultError};
use vellum::state::StateError;

use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Wallet {
    #[command(subcommand)]
    pub command: WalletCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum WalletCommand {
    /// Generate and store a new master key
    Setup,
    /// Show the master address and public key
    Info,
    /// Write a password-encrypted backup of the master key
    ///
    /// The backup does not record the `[kdf]` settings from config.toml. It
    /// can only be imported by a profile using the same settings as the one
    /// that exported it.
    Export {
        /// Where to write the backup JSON
        #[arg(long)]
        out: PathBuf,
        #[arg(long, env = "VELLUM_BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Replace the stored master key with one from a backup
    ///
    /// Needs the `[kdf]` settings that were in effect when the backup was made.
    Import {
        /// Backup JSON produced by `wallet export`
        file: PathBuf,
        #[arg(long, env = "VELLUM_BACKUP_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Permanently remove the stored master key
    Delete {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("refusing to delete the master key without --yes")]
    NotConfirmed,
}

/// Backups made under non-default KDF settings only open under the same settings
fn kdf_notice(kdf: &KdfParams) -> Option<String> {
    if *kdf == KdfParams::default() {
        return None;
    }
    Some(format!(
        "Note: this profile uses non-default [kdf] settings (memory_kib = {}, iterations = {}, parallelism = {}); the backup only imports under these same settings",
        kdf.memory_kib, kdf.iterations, kdf.parallelism
    ))
}

#[async_trait::async_trait]
impl Op for Wallet {
    type Error = WalletError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;
        let vault = state.vault()?;

        match &self.command {
            WalletCommand::Setup => {
                let info = vault.setup_master()?;
                Ok(format!(
                    "Created master key\n- Address: {}\n- Public key: {}\nExport a backup now; there is no other recovery path",
                    info.address, info.public_key
                ))
            }
            WalletCommand::Info => {
                let info = vault.master_info()?;
                Ok(format!(
                    "Address: {}\nPublic key: {}",
                    info.address, info.public_key
                ))
            }
            WalletCommand::Export { out, password } => {
                let blob = vault.export_backup(password)?;
                fs::write(out, blob.to_json()?)?;
                let mut output = format!("Wrote backup to {}", out.display());
                if let Some(notice) = kdf_notice(&vault.config().kdf) {
                    tracing::warn!(kdf = ?vault.config().kdf, "backup exported with custom kdf settings");
                    output = format!("{}\n{}", output, notice);
                }
                Ok(output)
            }
            WalletCommand::Import { file, password } => {
                let json = fs::read_to_string(file)?;
                let blob = BackupBlob::from_json(&json)?;
                if kdf_notice(&vault.config().kdf).is_some() {
                    tracing::warn!(
                        kdf = ?vault.config().kdf,
                        "importing with custom kdf settings; a backup made under other settings will not decrypt"
                    );
                }
                let info = vault.import_backup(&blob, password)?;
                Ok(format!("Imported master key\n- Address: {}", info.address))
            }
            WalletCommand::Delete { yes } => {
                if !yes {
                    return Err(WalletError::NotConfirmed);
                }
                vault.delete_master()?;
                Ok("Deleted master key".to_string())
            }
        }
    }
}
