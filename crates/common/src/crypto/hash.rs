//! SHA-256 content fingerprints used as inscription commitments

use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CONTENT_HASH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid content hash: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SHA-256 digest of a document's plaintext
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; CONTENT_HASH_SIZE]);

impl ContentHash {
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let mut buff = [0; CONTENT_HASH_SIZE];
        hex::decode_to_slice(hex, &mut buff).map_err(|e| HashError::Invalid(e.to_string()))?;
        Ok(ContentHash(buff))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_HASH_SIZE] {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = HashError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentHash::from_hex(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

pub fn digest(data: &[u8]) -> ContentHash {
    ContentHash(Sha256::digest(data).into())
}

/// Hash a reader incrementally, for files too large to buffer
pub fn digest_reader<R: Read>(mut reader: R) -> Result<ContentHash, HashError> {
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(ContentHash(hasher.finalize().into()))
}
