//! Document encryption using ChaCha20-Poly1305
//!
//! Every document gets its own random [`EnvelopeKey`]. The key is never stored
//! next to the ciphertext; it only travels inside per-recipient
//! [`WrappedKeyGrant`](super::WrappedKeyGrant)s, which is what lets one
//! ciphertext be shared with any number of readers.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of an envelope key in bytes (256 bits)
pub const ENVELOPE_KEY_SIZE: usize = 32;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    /// The AEAD tag did not verify. Nothing about the cause is exposed.
    #[error("authentication failed")]
    AuthenticationFailed,
}

/// A 256-bit symmetric key protecting exactly one document
///
/// # Examples
///
/// ```ignore
/// let (document, key) = envelope::encrypt(b"contract v3")?;
/// let grant = WrappedKeyGrant::new("bob", &key, &alice_secret, &bob_public)?;
/// drop(key); // only grants keep it alive from here on
/// ```
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey([u8; ENVELOPE_KEY_SIZE]);

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnvelopeKey(..)")
    }
}

impl From<[u8; ENVELOPE_KEY_SIZE]> for EnvelopeKey {
    fn from(bytes: [u8; ENVELOPE_KEY_SIZE]) -> Self {
        EnvelopeKey(bytes)
    }
}

impl EnvelopeKey {
    /// Generate a fresh key from the OS RNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; ENVELOPE_KEY_SIZE];
        getrandom::getrandom(&mut buff)
            .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {}", e))?;
        Ok(Self(buff))
    }

    /// Create a key from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `ENVELOPE_KEY_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != ENVELOPE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid envelope key size, expected {}, got {}",
                ENVELOPE_KEY_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; ENVELOPE_KEY_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.bytes()))
    }

    /// Encrypt under this key with a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedDocument, SecretError> {
        let mut iv = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut iv)
            .map_err(|e| anyhow::anyhow!("failed to generate nonce: {}", e))?;

        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;

        Ok(EncryptedDocument { ciphertext, iv })
    }
}

/// Ciphertext (with trailing 16-byte tag) and the nonce it was sealed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedDocument {
    #[serde(with = "crate::encoding::b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::encoding::b64_array")]
    pub iv: [u8; NONCE_SIZE],
}

impl EncryptedDocument {
    /// Decrypt with the document's envelope key
    ///
    /// # Errors
    ///
    /// [`SecretError::AuthenticationFailed`] if the tag does not verify: wrong key,
    /// a flipped bit in the ciphertext or iv, or truncation. No partial
    /// plaintext is ever returned.
    pub fn decrypt(&self, key: &EnvelopeKey) -> Result<Vec<u8>, SecretError> {
        key.cipher()
            .decrypt(Nonce::from_slice(&self.iv), self.ciphertext.as_ref())
            .map_err(|_| SecretError::AuthenticationFailed)
    }
}

/// Encrypt a document under a brand new envelope key
///
/// The returned key must go straight to the key-wrapping engine; it is not
/// meant to be persisted in the clear.
pub fn encrypt(plaintext: &[u8]) -> Result<(EncryptedDocument, EnvelopeKey), SecretError> {
    let key = EnvelopeKey::generate()?;
    let document = key.seal(plaintext)?;
    Ok((document, key))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let data = b"hello world, this is a test message for encryption";

        let (document, key) = encrypt(data).unwrap();
        let decrypted = document.decrypt(&key).unwrap();

        assert_eq!(data.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_fresh_key_and_nonce_per_document() {
        let (first, first_key) = encrypt(b"same").unwrap();
        let (second, second_key) = encrypt(b"same").unwrap();
        assert_ne!(first_key, second_key);
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_key_size_validation() {
        assert!(EnvelopeKey::from_slice(&[1u8; 16]).is_err());
        assert!(EnvelopeKey::from_slice(&[1u8; 64]).is_err());
        assert!(EnvelopeKey::from_slice(&[1u8; ENVELOPE_KEY_SIZE]).is_ok());
    }

    #[test]
    fn test_every_ciphertext_bit_is_authenticated() {
        let (document, key) = encrypt(b"pay to the order of").unwrap();

        for byte in 0..document.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = document.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(
                    tampered.decrypt(&key),
                    Err(SecretError::AuthenticationFailed)
                ));
            }
        }
    }

    #[test]
    fn test_every_iv_bit_is_authenticated() {
        let (document, key) = encrypt(b"pay to the order of").unwrap();

        for byte in 0..NONCE_SIZE {
            for bit in 0..8 {
                let mut tampered = document.clone();
                tampered.iv[byte] ^= 1 << bit;
                assert!(matches!(
                    tampered.decrypt(&key),
                    Err(SecretError::AuthenticationFailed)
                ));
            }
        }
    }

    #[test]
    fn test_wrong_key_and_truncation_fail() {
        let (mut document, key) = encrypt(b"ledger").unwrap();
        let other = EnvelopeKey::generate().unwrap();
        assert!(matches!(
            document.decrypt(&other),
            Err(SecretError::AuthenticationFailed)
        ));

        document.ciphertext.truncate(4);
        assert!(matches!(
            document.decrypt(&key),
            Err(SecretError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_empty_document() {
        let (document, key) = encrypt(b"").unwrap();
        assert_eq!(document.ciphertext.len(), 16);
        assert!(document.decrypt(&key).unwrap().is_empty());
    }

    #[test]
    fn test_document_json_roundtrip() {
        let (document, key) = encrypt(b"json").unwrap();
        let json = serde_json::to_string(&document).unwrap();
        let parsed: EncryptedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.decrypt(&key).unwrap(), b"json");
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = EnvelopeKey::from([7u8; ENVELOPE_KEY_SIZE]);
        assert_eq!(format!("{:?}", key), "EnvelopeKey(..)");
    }
}
