use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Args;

use common::crypto::{digest_reader, HashError};

#[derive(Args, Debug, Clone)]
pub struct Hash {
    /// File to fingerprint
    pub file: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum HashOpError {
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Hash {
    type Error = HashOpError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let file = File::open(&self.file)?;
        let hash = digest_reader(BufReader::new(file))?;
        Ok(hash.to_hex())
    }
}
