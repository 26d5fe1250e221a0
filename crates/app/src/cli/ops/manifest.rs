use std::fs;
use std::path::PathBuf;

use clap::Args;

use common::wallet::VaultError;
use vellum::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Manifest {
    /// Purposes as protocol/slug, e.g. stamp/INV-001
    #[arg(required = true, value_parser = parse_purpose)]
    pub purposes: Vec<(String, String)>,

    /// Write the manifest here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,
}

fn parse_purpose(value: &str) -> Result<(String, String), String> {
    match value.split_once('/') {
        Some((protocol, slug)) if !protocol.is_empty() && !slug.is_empty() => {
            Ok((protocol.to_string(), slug.to_string()))
        }
        _ => Err(format!("expected protocol/slug, got '{}'", value)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Manifest {
    type Error = ManifestError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let manifest = ctx.state()?.vault()?.build_manifest(&self.purposes)?;
        let json = manifest.to_json_pretty()?;

        match &self.out {
            Some(out) => {
                fs::write(out, &json)?;
                Ok(format!(
                    "Wrote manifest with {} children to {}",
                    manifest.children.len(),
                    out.display()
                ))
            }
            None => Ok(json),
        }
    }
}
