use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};

use common::crypto::PublicKey;
use common::document::{DocumentError, SealedDocument};
use vellum::state::StateError;

use super::identity::{unlock, IdentityOpError};
use crate::cli::op::{Op, OpContext};

#[derive(Args, Debug, Clone)]
pub struct Doc {
    #[command(subcommand)]
    pub command: DocCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DocCommand {
    /// Encrypt a file for yourself and the given recipients
    Seal {
        file: PathBuf,
        /// Recipient as handle=public-key-hex; repeatable
        #[arg(long = "to", value_parser = parse_recipient)]
        recipients: Vec<(String, PublicKey)>,
        /// Where to write the sealed document JSON
        #[arg(long)]
        out: PathBuf,
    },
    /// Decrypt a sealed document with your identity
    Open {
        sealed: PathBuf,
        /// Write plaintext here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Grant another reader access, rewriting the sealed file in place
    Share {
        sealed: PathBuf,
        #[arg(long = "to", value_parser = parse_recipient)]
        recipient: (String, PublicKey),
    },
    /// Drop a reader's grant from the sealed file
    Forget { sealed: PathBuf, handle: String },
    /// List the handles holding a grant
    Grants { sealed: PathBuf },
}

fn parse_recipient(value: &str) -> Result<(String, PublicKey), String> {
    let (handle, key) = value
        .split_once('=')
        .ok_or_else(|| format!("expected handle=public-key, got '{}'", value))?;
    if handle.is_empty() {
        return Err("recipient handle is empty".to_string());
    }
    let key = PublicKey::from_hex(key).map_err(|e| e.to_string())?;
    Ok((handle.to_string(), key))
}

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Identity(#[from] IdentityOpError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("malformed sealed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn read_sealed(path: &Path) -> Result<SealedDocument, DocError> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

fn write_sealed(path: &Path, sealed: &SealedDocument) -> Result<(), DocError> {
    fs::write(path, serde_json::to_vec_pretty(sealed)?)?;
    Ok(())
}

#[async_trait::async_trait]
impl Op for Doc {
    type Error = DocError;
    type Output = String;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;

        match &self.command {
            DocCommand::Seal {
                file,
                recipients,
                out,
            } => {
                let (identity, secret) = unlock(&state).await?;
                let plaintext = fs::read(file)?;
                let sealed = SealedDocument::seal(&plaintext, &identity.handle, &secret, recipients)?;
                write_sealed(out, &sealed)?;
                Ok(format!(
                    "Sealed {} ({}) for {}",
                    file.display(),
                    sealed.content_hash(),
                    sealed.grant_handles().join(", ")
                ))
            }
            DocCommand::Open { sealed, out } => {
                let (identity, secret) = unlock(&state).await?;
                let plaintext = read_sealed(sealed)?.open(&identity.handle, &secret)?;
                match out {
                    Some(out) => {
                        fs::write(out, &plaintext)?;
                        Ok(format!("Wrote {} bytes to {}", plaintext.len(), out.display()))
                    }
                    None => Ok(String::from_utf8_lossy(&plaintext).into_owned()),
                }
            }
            DocCommand::Share { sealed, recipient } => {
                let (identity, secret) = unlock(&state).await?;
                let mut document = read_sealed(sealed)?;
                let (handle, public_key) = recipient;
                document.share_with(&identity.handle, &secret, handle, public_key)?;
                write_sealed(sealed, &document)?;
                Ok(format!("Shared {} with {}", sealed.display(), handle))
            }
            DocCommand::Forget { sealed, handle } => {
                let mut document = read_sealed(sealed)?;
                if !document.forget_grant(handle) {
                    return Err(DocumentError::GrantNotFound(handle.clone()).into());
                }
                write_sealed(sealed, &document)?;
                Ok(format!(
                    "Removed grant for {}. Anything they already decrypted stays readable to them",
                    handle
                ))
            }
            DocCommand::Grants { sealed } => Ok(read_sealed(sealed)?.grant_handles().join("\n")),
        }
    }
}

#[cfg(test)]
mod tests {
    use common::crypto::SecretKey;

    use super::*;

    #[test]
    fn test_parse_recipient() {
        let key = SecretKey::generate().unwrap().public();
        let (handle, parsed) = parse_recipient(&format!("bob={}", key.to_hex())).unwrap();
        assert_eq!(handle, "bob");
        assert_eq!(parsed, key);

        assert!(parse_recipient("bob").is_err());
        assert!(parse_recipient(&format!("={}", key.to_hex())).is_err());
        assert!(parse_recipient("bob=zz").is_err());
    }
}
