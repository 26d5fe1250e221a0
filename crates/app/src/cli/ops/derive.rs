use clap::Args;

use common::wallet::VaultError;
use vellum::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Derive {
    /// Purpose namespace, e.g. "stamp" or "token"
    pub protocol: String,
    /// Identifier within the namespace, e.g. an invoice number
    pub slug: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DeriveError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Vault(#[from] VaultError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Derive {
    type Error = DeriveError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let child = ctx.state()?.vault()?.derive(&self.protocol, &self.slug)?;
        Ok(format!(
            "Path: {}\nAddress: {}\nPublic key: {}",
            child.purpose_path(),
            child.address(),
            child.public_key()
        ))
    }
}
