use serde::{Deserialize, Serialize};

use crate::crypto::{
    digest, envelope, ContentHash, EncryptedDocument, EnvelopeKey, PublicKey, SecretError,
    SecretKey, SecretShareError, WrappedKeyGrant,
};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("encryption error: {0}")]
    Secret(#[from] SecretError),
    #[error("grant error: {0}")]
    Share(#[from] SecretShareError),
    #[error("'{0}' already holds a grant for this document")]
    DuplicateGrant(String),
    #[error("no grant for '{0}'")]
    GrantNotFound(String),
    #[error("decrypted content does not match the recorded hash")]
    HashMismatch,
}

/// One encrypted document plus an independent grant per reader
///
/// The author always holds a grant of their own, so they can keep adding
/// readers later without having kept the envelope key anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedDocument {
    content_hash: ContentHash,
    document: EncryptedDocument,
    grants: Vec<WrappedKeyGrant>,
}

impl SealedDocument {
    /// Encrypt `plaintext` once and grant it to the sender plus every recipient
    pub fn seal(
        plaintext: &[u8],
        sender_handle: &str,
        sender: &SecretKey,
        recipients: &[(String, PublicKey)],
    ) -> Result<Self, DocumentError> {
        let content_hash = digest(plaintext);
        let (document, key) = envelope::encrypt(plaintext)?;

        let mut sealed = Self {
            content_hash,
            document,
            grants: Vec::with_capacity(recipients.len() + 1),
        };
        sealed.add_grant(&key, sender_handle, sender, &sender.public())?;
        for (handle, public) in recipients {
            sealed.add_grant(&key, handle, sender, public)?;
        }

        tracing::info!(
            content_hash = %sealed.content_hash,
            grants = sealed.grants.len(),
            "sealed document"
        );
        Ok(sealed)
    }

    fn add_grant(
        &mut self,
        key: &EnvelopeKey,
        handle: &str,
        sender: &SecretKey,
        recipient: &PublicKey,
    ) -> Result<(), DocumentError> {
        if self.grant(handle).is_some() {
            return Err(DocumentError::DuplicateGrant(handle.to_string()));
        }
        self.grants
            .push(WrappedKeyGrant::new(handle, key, sender, recipient)?);
        Ok(())
    }

    fn grant(&self, handle: &str) -> Option<&WrappedKeyGrant> {
        self.grants.iter().find(|g| g.recipient_handle() == handle)
    }

    fn envelope_key(&self, handle: &str, secret: &SecretKey) -> Result<EnvelopeKey, DocumentError> {
        let grant = self
            .grant(handle)
            .ok_or_else(|| DocumentError::GrantNotFound(handle.to_string()))?;
        Ok(grant.recover(secret)?)
    }

    /// Add a reader, using `sharer`'s own grant to recover the envelope key
    ///
    /// The ciphertext and the existing grants are left untouched.
    pub fn share_with(
        &mut self,
        sharer_handle: &str,
        sharer: &SecretKey,
        handle: &str,
        recipient: &PublicKey,
    ) -> Result<(), DocumentError> {
        if self.grant(handle).is_some() {
            return Err(DocumentError::DuplicateGrant(handle.to_string()));
        }
        let key = self.envelope_key(sharer_handle, sharer)?;
        self.add_grant(&key, handle, sharer, recipient)?;
        tracing::info!(content_hash = %self.content_hash, recipient = handle, "shared document");
        Ok(())
    }

    /// Decrypt as `handle`, checking the plaintext against the recorded hash
    pub fn open(&self, handle: &str, secret: &SecretKey) -> Result<Vec<u8>, DocumentError> {
        let key = self.envelope_key(handle, secret)?;
        let plaintext = self.document.decrypt(&key)?;
        if digest(&plaintext) != self.content_hash {
            return Err(DocumentError::HashMismatch);
        }
        Ok(plaintext)
    }

    /// Drop one reader's grant. Returns whether one existed.
    ///
    /// This does not revoke anything the reader already recovered.
    pub fn forget_grant(&mut self, handle: &str) -> bool {
        let before = self.grants.len();
        self.grants.retain(|g| g.recipient_handle() != handle);
        before != self.grants.len()
    }

    pub fn grant_handles(&self) -> Vec<&str> {
        self.grants.iter().map(|g| g.recipient_handle()).collect()
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    pub fn document(&self) -> &EncryptedDocument {
        &self.document
    }
}
