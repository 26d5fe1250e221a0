// Sharing identity (protected key + wallet authenticator)
pub mod identity;

// Logging and panic reporting for the binary
pub mod logging;

// App state (configuration, paths)
pub mod state;

pub use identity::{IdentityError, IdentityRecord, WalletAuthenticator};
pub use state::{AppConfig, AppState, ChainSettings, InscriptionSettings, StateError};
