use clap::Args;

use common::wallet::VaultError;
use vellum::state::{AppConfig, AppState, ChainSettings, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Network addresses are rendered for (mainnet, testnet, signet, regtest)
    #[arg(long, default_value = "mainnet")]
    pub network: String,

    /// Chain service base URL
    #[arg(long)]
    pub api_url: Option<String>,

    /// Fee rate in satoshis per 1000 bytes
    #[arg(long)]
    pub fee_per_kb: Option<u64>,

    /// Also generate the master key
    #[arg(long)]
    pub setup_wallet: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),
    #[error("wallet setup failed: {0}")]
    Vault(#[from] VaultError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig {
            network: self.network.clone(),
            ..AppConfig::default()
        };
        if let Some(api_url) = &self.api_url {
            config.chain = ChainSettings {
                api_url: api_url.clone(),
                ..ChainSettings::default()
            };
        }
        if let Some(fee_per_kb) = self.fee_per_kb {
            config.inscription.fee_per_kb = fee_per_kb;
        }

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let mut output = format!(
            "Initialized vellum directory at: {}\n\
             - Config: {}\n\
             - Vault: {}\n\
             - Receipts: {}\n\
             - Logs: {}\n\
             - Network: {}\n\
             - Chain service: {}",
            state.vellum_dir.display(),
            state.config_path.display(),
            state.vault_path.display(),
            state.receipts_path.display(),
            state.logs_path.display(),
            state.config.network,
            state.config.chain.api_url,
        );

        if self.setup_wallet {
            let info = state.vault()?.setup_master()?;
            output.push_str(&format!("\n- Master address: {}", info.address));
        } else {
            output.push_str("\nRun 'vellum wallet setup' to create the master key");
        }

        Ok(output)
    }
}
