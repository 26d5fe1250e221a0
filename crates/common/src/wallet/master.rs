use std::fmt;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{self, ecdsa, Message, Secp256k1};
use bitcoin::{Address, Network};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

pub const MASTER_SECRET_SIZE: usize = 32;

/// The wallet's root key: one secp256k1 scalar per device profile
///
/// Only ever held in memory for the span of a single operation; the vault
/// hands out `&MasterSecret` inside a closure and the scalar is wiped on drop.
#[derive(Clone)]
pub struct MasterSecret(secp256k1::SecretKey);

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.0.non_secure_erase();
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

impl MasterSecret {
    /// Draw a fresh scalar from the OS RNG, retrying the (astronomically rare)
    /// draws that fall outside the curve order
    pub fn generate() -> Result<Self, getrandom::Error> {
        loop {
            let mut bytes = [0u8; MASTER_SECRET_SIZE];
            getrandom::getrandom(&mut bytes)?;
            if let Some(secret) = Self::from_bytes(bytes) {
                return Ok(secret);
            }
        }
    }

    /// Accepts only valid non-zero scalars below the curve order
    pub fn from_bytes(mut bytes: [u8; MASTER_SECRET_SIZE]) -> Option<Self> {
        let secret = secp256k1::SecretKey::from_slice(&bytes).ok().map(MasterSecret);
        bytes.zeroize();
        secret
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; MASTER_SECRET_SIZE] = bytes.try_into().ok()?;
        Self::from_bytes(bytes)
    }

    /// Raw scalar bytes, wiped when the returned buffer drops
    pub fn to_bytes(&self) -> Zeroizing<[u8; MASTER_SECRET_SIZE]> {
        Zeroizing::new(self.0.secret_bytes())
    }

    pub(crate) fn public_key(&self) -> secp256k1::PublicKey {
        secp256k1::PublicKey::from_secret_key(&Secp256k1::signing_only(), &self.0)
    }

    /// Deterministic (RFC 6979) signature over the signed-message digest of `message`
    ///
    /// Signing the same message twice yields the same signature, which lets
    /// the master key act as a login authenticator.
    pub fn sign_message(&self, message: &str) -> ecdsa::Signature {
        let digest = bitcoin::sign_message::signed_msg_hash(message);
        let msg = Message::from_digest(digest.to_byte_array());
        Secp256k1::signing_only().sign_ecdsa(&msg, &self.0)
    }

    /// Public identity of the master key on `network`
    pub fn info(&self, network: Network) -> MasterKeyInfo {
        let public_key = self.public_key();
        MasterKeyInfo {
            address: p2pkh_address(&public_key, network).to_string(),
            public_key: public_key.to_string(),
        }
    }
}

/// Public half of the master key, safe to display or export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyInfo {
    pub address: String,
    /// Compressed SEC1 public key, hex
    pub public_key: String,
}

pub(crate) fn p2pkh_address(public_key: &secp256k1::PublicKey, network: Network) -> Address {
    Address::p2pkh(bitcoin::PublicKey::new(*public_key), network)
}

/// Parse the network names used in configuration files
pub fn network_from_name(name: &str) -> Option<Network> {
    match name {
        "mainnet" | "bitcoin" | "main" => Some(Network::Bitcoin),
        "testnet" | "test" => Some(Network::Testnet),
        "signet" => Some(Network::Signet),
        "regtest" => Some(Network::Regtest),
        _ => None,
    }
}
