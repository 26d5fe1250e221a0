use std::{fs, path::PathBuf, time::Duration};

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use common::inscription::{
    ChainClientConfig, ChainError, FileReceiptStore, HttpChainClient, InscriptionConfig,
    DEFAULT_CHAIN_API_URL, DEFAULT_REQUEST_TIMEOUT,
};
use common::wallet::{network_from_name, FileVaultStore, KdfParams, VaultConfig, VaultHandle};

pub const APP_NAME: &str = "vellum";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const VAULT_FILE_NAME: &str = "vault.json";
pub const IDENTITY_FILE_NAME: &str = "identity.json";
pub const RECEIPTS_FILE_NAME: &str = "receipts.json";
pub const LOGS_DIR_NAME: &str = "logs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network addresses are rendered for (mainnet, testnet, signet, regtest)
    #[serde(default = "default_network")]
    pub network: String,
    /// Default tracing directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub chain: ChainSettings,
    /// Argon2id cost for backup export/import
    #[serde(default)]
    pub kdf: KdfParams,
    #[serde(default)]
    pub inscription: InscriptionSettings,
}

fn default_network() -> String {
    "mainnet".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            log_level: default_log_level(),
            chain: ChainSettings::default(),
            kdf: KdfParams::default(),
            inscription: InscriptionSettings::default(),
        }
    }
}

/// Where the chain service lives and how long to wait for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_CHAIN_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InscriptionSettings {
    /// satoshis per 1000 bytes
    #[serde(default = "default_fee_per_kb")]
    pub fee_per_kb: u64,
    #[serde(default = "default_dust_limit")]
    pub dust_limit: u64,
    #[serde(default = "default_token_output_value")]
    pub token_output_value: u64,
}

fn default_fee_per_kb() -> u64 {
    InscriptionConfig::default().fee_per_kb
}

fn default_dust_limit() -> u64 {
    InscriptionConfig::default().dust_limit
}

fn default_token_output_value() -> u64 {
    InscriptionConfig::default().token_output_value
}

impl Default for InscriptionSettings {
    fn default() -> Self {
        Self {
            fee_per_kb: default_fee_per_kb(),
            dust_limit: default_dust_limit(),
            token_output_value: default_token_output_value(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the vellum directory (~/.vellum)
    pub vellum_dir: PathBuf,
    /// Path to the encrypted master key record
    pub vault_path: PathBuf,
    /// Path to the protected sharing identity
    pub identity_path: PathBuf,
    /// Path to the inscription receipt log
    pub receipts_path: PathBuf,
    /// Path to the rolling log files
    pub logs_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the vellum directory path (custom or default ~/.vellum)
    pub fn vellum_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    pub fn exists(custom_path: Option<PathBuf>) -> Result<bool, StateError> {
        let vellum_dir = Self::vellum_dir(custom_path)?;
        Ok(vellum_dir.join(CONFIG_FILE_NAME).exists())
    }

    /// Initialize a new vellum state directory
    ///
    /// The master key is not created here; that is `wallet setup`.
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let vellum_dir = Self::vellum_dir(custom_path)?;

        let config_path = vellum_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        let config = config.unwrap_or_default();
        config.network()?;

        fs::create_dir_all(&vellum_dir)?;
        let logs_path = vellum_dir.join(LOGS_DIR_NAME);
        fs::create_dir_all(&logs_path)?;

        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        Ok(Self::at(vellum_dir, config))
    }

    /// Load existing state from the vellum directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let vellum_dir = Self::vellum_dir(custom_path)?;

        let config_path = vellum_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;
        config.network()?;

        Ok(Self::at(vellum_dir, config))
    }

    fn at(vellum_dir: PathBuf, config: AppConfig) -> Self {
        Self {
            vault_path: vellum_dir.join(VAULT_FILE_NAME),
            identity_path: vellum_dir.join(IDENTITY_FILE_NAME),
            receipts_path: vellum_dir.join(RECEIPTS_FILE_NAME),
            logs_path: vellum_dir.join(LOGS_DIR_NAME),
            config_path: vellum_dir.join(CONFIG_FILE_NAME),
            vellum_dir,
            config,
        }
    }

    /// Vault over the on-disk master record
    pub fn vault(&self) -> Result<VaultHandle<FileVaultStore>, StateError> {
        let config = VaultConfig {
            network: self.config.network()?,
            kdf: self.config.kdf,
        };
        Ok(VaultHandle::new(
            FileVaultStore::new(&self.vault_path),
            config,
        ))
    }

    pub fn receipts(&self) -> FileReceiptStore {
        FileReceiptStore::new(&self.receipts_path)
    }

    /// Chain client for the configured service, or `api_url` when given
    pub fn chain_client(&self, api_url: Option<&url::Url>) -> Result<HttpChainClient, ChainError> {
        let base_url = match api_url {
            Some(url) => url.to_string(),
            None => self.config.chain.api_url.clone(),
        };
        HttpChainClient::new(&ChainClientConfig {
            base_url,
            timeout: self.config.request_timeout(),
        })
    }

    pub fn inscription_config(&self) -> InscriptionConfig {
        let settings = &self.config.inscription;
        InscriptionConfig {
            fee_per_kb: settings.fee_per_kb,
            dust_limit: settings.dust_limit,
            token_output_value: settings.token_output_value,
            timeout: self.config.request_timeout(),
        }
    }
}

impl AppConfig {
    pub fn network(&self) -> Result<Network, StateError> {
        network_from_name(&self.network).ok_or_else(|| StateError::UnknownNetwork(self.network.clone()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("vellum directory not initialized. Run 'vellum init' first")]
    NotInitialized,

    #[error("vellum directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("unknown network '{0}'")]
    UnknownNetwork(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}
