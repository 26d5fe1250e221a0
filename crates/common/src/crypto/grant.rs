//! Per-recipient key grants using ECDH + HKDF + AES Key Wrap
//!
//! A grant hands one document's [`EnvelopeKey`] to one recipient without a
//! server ever seeing it:
//!
//! 1. **Agree**: X25519 between the sender's private key and the recipient's
//!    public key (both sharing identities converted from Ed25519)
//! 2. **Derive**: HKDF-SHA256 over the shared secret with a fixed salt and
//!    info string yields the key-encryption key
//! 3. **Wrap**: AES-256-KW (RFC 3394) wraps the 32-byte envelope key into 40 bytes
//!
//! The recipient repeats 1-2 with their private key and the sender's public key,
//! then unwraps. The static salt is fine here: the wrapped payload is a fresh
//! random envelope key for every document.
//!
//! Grants are independent of each other. Dropping one has no effect on any
//! other grant for the same document.

use std::fmt;

use aes_kw::KekAes256 as Kek;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::envelope::{EnvelopeKey, ENVELOPE_KEY_SIZE};
use super::keys::{KeyError, PublicKey, SecretKey};

/// AES Key Wrap integrity block size in bytes
pub const KW_BLOCK_SIZE: usize = 8;
/// Size of a wrapped envelope key: 32-byte key plus the 8-byte integrity block
pub const WRAPPED_KEY_SIZE: usize = ENVELOPE_KEY_SIZE + KW_BLOCK_SIZE;

const GRANT_SALT: &[u8] = b"vellum/grant-salt/v1";
const GRANT_INFO: &[u8] = b"vellum/grant-kek/v1";

/// Errors that can occur during grant creation or recovery
#[derive(Debug, thiserror::Error)]
pub enum SecretShareError {
    #[error("wrap failed: {0}")]
    WrapFailed(#[from] anyhow::Error),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    /// Wrong recipient, wrong sender key, or a tampered grant; deliberately
    /// indistinguishable.
    #[error("unwrap failed")]
    UnwrapFailed,
}

/// An envelope key wrapped for one recipient
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WrappedKey([u8; WRAPPED_KEY_SIZE]);

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappedKey({})", self.to_hex())
    }
}

impl From<[u8; WRAPPED_KEY_SIZE]> for WrappedKey {
    fn from(bytes: [u8; WRAPPED_KEY_SIZE]) -> Self {
        WrappedKey(bytes)
    }
}

impl TryFrom<&[u8]> for WrappedKey {
    type Error = SecretShareError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != WRAPPED_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid wrapped key size, expected {}, got {}",
                WRAPPED_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; WRAPPED_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(WrappedKey(buff))
    }
}

impl TryFrom<String> for WrappedKey {
    type Error = SecretShareError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        WrappedKey::from_hex(&value)
    }
}

impl From<WrappedKey> for String {
    fn from(key: WrappedKey) -> Self {
        key.to_hex()
    }
}

impl WrappedKey {
    /// Parse a wrapped key from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, SecretShareError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; WRAPPED_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("wrapped key hex decode error"))?;
        Ok(WrappedKey(buff))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Derive the key-encryption key shared by `own` and `other`
///
/// Returns `None` when the agreement is non-contributory (the peer key is a
/// low-order point), which would make the wrap key predictable.
fn key_encryption_key(own: &SecretKey, other: &PublicKey) -> Result<Option<Kek>, KeyError> {
    let shared = own.to_x25519().diffie_hellman(&other.to_x25519()?);
    if !shared.was_contributory() {
        return Ok(None);
    }

    let mut okm = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(Some(GRANT_SALT), shared.as_bytes())
        .expand(GRANT_INFO, &mut okm[..])
        .map_err(|_| anyhow::anyhow!("hkdf output length rejected"))?;

    Ok(Some(Kek::from(*okm)))
}

/// Wrap `envelope_key` so that only the holder of `recipient`'s private key can recover it
///
/// Returns the wrapped key plus the sender's public key, which the recipient
/// needs to repeat the agreement. Sharing with yourself is the same call with
/// your own public key as `recipient`.
pub fn wrap_for_recipient(
    envelope_key: &EnvelopeKey,
    sender: &SecretKey,
    recipient: &PublicKey,
) -> Result<(WrappedKey, PublicKey), SecretShareError> {
    let kek = key_encryption_key(sender, recipient)?
        .ok_or_else(|| anyhow::anyhow!("recipient key yields a non-contributory agreement"))?;

    let wrapped = kek
        .wrap_vec(envelope_key.bytes())
        .map_err(|_| anyhow::anyhow!("AES-KW wrap error"))?;

    Ok((WrappedKey::try_from(wrapped.as_slice())?, sender.public()))
}

/// Recover an envelope key wrapped by `sender` for `recipient`
///
/// # Errors
///
/// Always [`SecretShareError::UnwrapFailed`], whatever went wrong; a wrong key
/// never produces a plausible-looking envelope key because AES-KW checks its
/// integrity block.
pub fn unwrap(
    wrapped: &WrappedKey,
    recipient: &SecretKey,
    sender: &PublicKey,
) -> Result<EnvelopeKey, SecretShareError> {
    let kek = key_encryption_key(recipient, sender)
        .ok()
        .flatten()
        .ok_or(SecretShareError::UnwrapFailed)?;

    let unwrapped = Zeroizing::new(
        kek.unwrap_vec(wrapped.bytes())
            .map_err(|_| SecretShareError::UnwrapFailed)?,
    );

    EnvelopeKey::from_slice(&unwrapped).map_err(|_| SecretShareError::UnwrapFailed)
}

/// One recipient's access to one document
///
/// # Examples
///
/// ```ignore
/// let grant = WrappedKeyGrant::new("bob", &envelope_key, &alice_secret, &bob_public)?;
/// let recovered = grant.recover(&bob_secret)?;
/// assert_eq!(envelope_key, recovered);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKeyGrant {
    recipient_handle: String,
    wrapped_key: WrappedKey,
    sender_public_key: PublicKey,
}

impl WrappedKeyGrant {
    pub fn new(
        recipient_handle: impl Into<String>,
        envelope_key: &EnvelopeKey,
        sender: &SecretKey,
        recipient: &PublicKey,
    ) -> Result<Self, SecretShareError> {
        let (wrapped_key, sender_public_key) = wrap_for_recipient(envelope_key, sender, recipient)?;
        Ok(Self {
            recipient_handle: recipient_handle.into(),
            wrapped_key,
            sender_public_key,
        })
    }

    /// Recover the envelope key with the recipient's private key
    pub fn recover(&self, recipient: &SecretKey) -> Result<EnvelopeKey, SecretShareError> {
        unwrap(&self.wrapped_key, recipient, &self.sender_public_key)
    }

    pub fn recipient_handle(&self) -> &str {
        &self.recipient_handle
    }

    pub fn wrapped_key(&self) -> &WrappedKey {
        &self.wrapped_key
    }

    pub fn sender_public_key(&self) -> &PublicKey {
        &self.sender_public_key
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn keypair() -> (SecretKey, PublicKey) {
        let secret = SecretKey::generate().unwrap();
        let public = secret.public();
        (secret, public)
    }

    #[test]
    fn test_wrap_unwrap() {
        let envelope_key = EnvelopeKey::from([42u8; ENVELOPE_KEY_SIZE]);
        let (alice, _) = keypair();
        let (bob, bob_public) = keypair();

        let (wrapped, sender_public) = wrap_for_recipient(&envelope_key, &alice, &bob_public).unwrap();
        assert_eq!(sender_public, alice.public());

        let recovered = unwrap(&wrapped, &bob, &sender_public).unwrap();
        assert_eq!(envelope_key, recovered);
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let envelope_key = EnvelopeKey::generate().unwrap();
        let (alice, _) = keypair();
        let (_, bob_public) = keypair();
        let (mallory, _) = keypair();

        let grant = WrappedKeyGrant::new("bob", &envelope_key, &alice, &bob_public).unwrap();
        assert!(matches!(
            grant.recover(&mallory),
            Err(SecretShareError::UnwrapFailed)
        ));
    }

    #[test]
    fn test_wrong_sender_key_fails() {
        let envelope_key = EnvelopeKey::generate().unwrap();
        let (alice, _) = keypair();
        let (bob, bob_public) = keypair();
        let (_, mallory_public) = keypair();

        let (wrapped, _) = wrap_for_recipient(&envelope_key, &alice, &bob_public).unwrap();
        assert!(matches!(
            unwrap(&wrapped, &bob, &mallory_public),
            Err(SecretShareError::UnwrapFailed)
        ));
    }

    #[test]
    fn test_tampered_grant_fails() {
        let envelope_key = EnvelopeKey::generate().unwrap();
        let (alice, _) = keypair();
        let (bob, bob_public) = keypair();

        let (wrapped, sender_public) = wrap_for_recipient(&envelope_key, &alice, &bob_public).unwrap();
        for i in 0..WRAPPED_KEY_SIZE {
            let mut bytes = [0u8; WRAPPED_KEY_SIZE];
            bytes.copy_from_slice(wrapped.bytes());
            bytes[i] ^= 0x01;
            assert!(matches!(
                unwrap(&WrappedKey::from(bytes), &bob, &sender_public),
                Err(SecretShareError::UnwrapFailed)
            ));
        }
    }

    #[test]
    fn test_self_share_uses_same_path() {
        let envelope_key = EnvelopeKey::generate().unwrap();
        let (alice, alice_public) = keypair();

        let grant = WrappedKeyGrant::new("alice", &envelope_key, &alice, &alice_public).unwrap();
        assert_eq!(grant.sender_public_key(), &alice_public);
        assert_eq!(grant.recover(&alice).unwrap(), envelope_key);
    }

    #[test]
    fn test_wraps_are_deterministic_per_pair() {
        // AES-KW needs no nonce: same key, same parties, same output
        let envelope_key = EnvelopeKey::generate().unwrap();
        let (alice, _) = keypair();
        let (_, bob_public) = keypair();

        let (first, _) = wrap_for_recipient(&envelope_key, &alice, &bob_public).unwrap();
        let (second, _) = wrap_for_recipient(&envelope_key, &alice, &bob_public).unwrap();
        assert_eq!(first, second);

        let other_key = EnvelopeKey::generate().unwrap();
        let (third, _) = wrap_for_recipient(&other_key, &alice, &bob_public).unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn test_grant_json_roundtrip() {
        let envelope_key = EnvelopeKey::generate().unwrap();
        let (alice, _) = keypair();
        let (bob, bob_public) = keypair();
        let grant = WrappedKeyGrant::new("bob@vellum", &envelope_key, &alice, &bob_public).unwrap();

        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["recipientHandle"], "bob@vellum");
        assert_eq!(json["wrappedKey"].as_str().unwrap().len(), WRAPPED_KEY_SIZE * 2);
        assert_eq!(json["senderPublicKey"], alice.public().to_hex());

        let parsed: WrappedKeyGrant = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, grant);
        assert_eq!(parsed.recover(&bob).unwrap(), envelope_key);
    }

    #[test]
    fn test_wrapped_key_invalid_length() {
        assert!(WrappedKey::try_from([0u8; WRAPPED_KEY_SIZE - 1].as_slice()).is_err());
        assert!(WrappedKey::from_hex(&"00".repeat(WRAPPED_KEY_SIZE + 1)).is_err());
        assert!(WrappedKey::from_hex(&"00".repeat(WRAPPED_KEY_SIZE)).is_ok());
    }
}
