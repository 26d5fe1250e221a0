//! Purpose-scoped child keys
//!
//! A child is `HMAC-SHA256(master, "vellum-derive-v1:" + protocol + "/" + slug)`
//! reduced into the secp256k1 scalar field. The function is pure: the same
//! master and purpose always give the same child, and children for different
//! purposes share nothing an observer can link without the master.

use std::fmt;

use bitcoin::hashes::{hmac, sha256, Hash, HashEngine};
use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::{Address, Network};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::master::{p2pkh_address, MasterSecret};

pub const DERIVATION_PREFIX: &str = "vellum-derive-v1";
pub const MANIFEST_PROTOCOL: &str = "vellum-manifest";
pub const MANIFEST_VERSION: u32 = 1;

// 2^255 as a big-endian scalar
const HIGH_BIT: [u8; 32] = {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x80;
    bytes
};

#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    #[error("invalid purpose: {0}")]
    InvalidPurpose(String),
    #[error("derived scalar is not a valid private key")]
    InvalidScalar,
}

/// A key bound to one `(protocol, slug)` purpose
///
/// Never persisted; recompute it from the vault when needed. The private
/// scalar is erased when the child drops.
pub struct DerivedChild {
    protocol: String,
    slug: String,
    private_key: secp256k1::SecretKey,
    public_key: secp256k1::PublicKey,
    address: Address,
}

impl Drop for DerivedChild {
    fn drop(&mut self) {
        self.private_key.non_secure_erase();
    }
}

impl fmt::Debug for DerivedChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedChild")
            .field("protocol", &self.protocol)
            .field("slug", &self.slug)
            .field("public_key", &self.public_key)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl DerivedChild {
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// `protocol/slug`, the derivation path recorded in receipts
    pub fn purpose_path(&self) -> String {
        format!("{}/{}", self.protocol, self.slug)
    }

    pub fn private_key(&self) -> &secp256k1::SecretKey {
        &self.private_key
    }

    pub fn public_key(&self) -> &secp256k1::PublicKey {
        &self.public_key
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

fn check_purpose(protocol: &str, slug: &str) -> Result<(), DerivationError> {
    if protocol.is_empty() || slug.is_empty() {
        return Err(DerivationError::InvalidPurpose(
            "protocol and slug must be non-empty".into(),
        ));
    }
    // the first '/' separates protocol from slug, so it must be unambiguous
    if protocol.contains('/') {
        return Err(DerivationError::InvalidPurpose(format!(
            "protocol '{}' must not contain '/'",
            protocol
        )));
    }
    Ok(())
}

/// Turn an HMAC tag into a private key, reducing it modulo the curve order
///
/// A tag at or above the order has its top bit set, so it splits into
/// `2^255 + low` with both parts below the order and secp256k1 adds them.
fn scalar_from_tag(tag: &[u8; 32]) -> Result<secp256k1::SecretKey, DerivationError> {
    if let Ok(key) = secp256k1::SecretKey::from_slice(tag) {
        return Ok(key);
    }
    let mut low = Zeroizing::new(*tag);
    low[0] &= 0x7f;
    let high =
        secp256k1::Scalar::from_be_bytes(HIGH_BIT).map_err(|_| DerivationError::InvalidScalar)?;
    secp256k1::SecretKey::from_slice(&low[..])
        .and_then(|low| low.add_tweak(&high))
        .map_err(|_| DerivationError::InvalidScalar)
}

/// Derive the child key for `(protocol, slug)`
pub fn derive(
    master: &MasterSecret,
    protocol: &str,
    slug: &str,
    network: Network,
) -> Result<DerivedChild, DerivationError> {
    check_purpose(protocol, slug)?;

    let key = master.to_bytes();
    let mut engine = hmac::HmacEngine::<sha256::Hash>::new(key.as_slice());
    engine.input(DERIVATION_PREFIX.as_bytes());
    engine.input(b":");
    engine.input(protocol.as_bytes());
    engine.input(b"/");
    engine.input(slug.as_bytes());
    let mut tag = hmac::Hmac::<sha256::Hash>::from_engine(engine).to_byte_array();

    let private_key = scalar_from_tag(&tag);
    tag.zeroize();
    let private_key = private_key?;

    let public_key = secp256k1::PublicKey::from_secret_key(&Secp256k1::signing_only(), &private_key);
    let address = p2pkh_address(&public_key, network);
    tracing::debug!(protocol, slug, %address, "derived child key");

    Ok(DerivedChild {
        protocol: protocol.to_string(),
        slug: slug.to_string(),
        private_key,
        public_key,
        address,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestChild {
    pub protocol: String,
    pub slug: String,
    pub address: String,
    pub public_key: String,
}

/// Public address book for a declared set of purposes. Holds no private material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: u32,
    pub protocol: String,
    pub master_address: String,
    pub master_public_key: String,
    pub children: Vec<ManifestChild>,
    pub exported_at: DateTime<Utc>,
}

impl Manifest {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

pub fn build_manifest<P, S>(
    master: &MasterSecret,
    purposes: &[(P, S)],
    network: Network,
) -> Result<Manifest, DerivationError>
where
    P: AsRef<str>,
    S: AsRef<str>,
{
    let info = master.info(network);
    let children = purposes
        .iter()
        .map(|(protocol, slug)| {
            let child = derive(master, protocol.as_ref(), slug.as_ref(), network)?;
            Ok(ManifestChild {
                protocol: child.protocol.clone(),
                slug: child.slug.clone(),
                address: child.address.to_string(),
                public_key: child.public_key.to_string(),
            })
        })
        .collect::<Result<Vec<_>, DerivationError>>()?;

    Ok(Manifest {
        version: MANIFEST_VERSION,
        protocol: MANIFEST_PROTOCOL.to_string(),
        master_address: info.address,
        master_public_key: info.public_key,
        children,
        exported_at: Utc::now(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn master() -> MasterSecret {
        MasterSecret::from_bytes([0x42u8; 32]).unwrap()
    }

    #[test]
    fn test_deterministic() {
        let master = master();
        let first = derive(&master, "stamp", "INV-001", Network::Bitcoin).unwrap();
        let second = derive(&master, "stamp", "INV-001", Network::Bitcoin).unwrap();
        assert_eq!(first.address(), second.address());
        assert_eq!(first.public_key(), second.public_key());
        assert_eq!(first.private_key(), second.private_key());
    }

    #[test]
    fn test_distinct_purposes() {
        let master = master();
        let purposes = [
            ("stamp", "INV-001"),
            ("stamp", "INV-002"),
            ("token", "INV-001"),
            ("stamp", "INV-0011"),
            ("stam", "pINV-001"),
        ];
        let mut addresses: Vec<String> = purposes
            .iter()
            .map(|(p, s)| derive(&master, p, s, Network::Bitcoin).unwrap().address().to_string())
            .collect();
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), purposes.len());
    }

    #[test]
    fn test_child_differs_from_master() {
        let master = master();
        let child = derive(&master, "stamp", "a", Network::Bitcoin).unwrap();
        assert_ne!(child.private_key().secret_bytes(), *master.to_bytes());
        assert_ne!(
            child.address().to_string(),
            master.info(Network::Bitcoin).address
        );
    }

    #[test]
    fn test_different_masters_differ() {
        let other = MasterSecret::from_bytes([0x43u8; 32]).unwrap();
        let a = derive(&master(), "stamp", "x", Network::Bitcoin).unwrap();
        let b = derive(&other, "stamp", "x", Network::Bitcoin).unwrap();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_rejects_ambiguous_purposes() {
        let master = master();
        assert!(matches!(
            derive(&master, "", "slug", Network::Bitcoin),
            Err(DerivationError::InvalidPurpose(_))
        ));
        assert!(matches!(
            derive(&master, "stamp", "", Network::Bitcoin),
            Err(DerivationError::InvalidPurpose(_))
        ));
        assert!(matches!(
            derive(&master, "a/b", "c", Network::Bitcoin),
            Err(DerivationError::InvalidPurpose(_))
        ));
        // slugs may carry their own hierarchy
        assert!(derive(&master, "stamp", "2024/q1/INV-7", Network::Bitcoin).is_ok());
    }

    // secp256k1 group order, big endian
    const CURVE_ORDER: [u8; 32] = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xfe, 0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36,
        0x41, 0x41,
    ];

    #[test]
    fn test_scalar_from_tag() {
        let mut below = CURVE_ORDER;
        below[31] -= 1;
        assert_eq!(scalar_from_tag(&below).unwrap().secret_bytes(), below);

        assert!(matches!(
            scalar_from_tag(&CURVE_ORDER),
            Err(DerivationError::InvalidScalar)
        ));
        assert!(matches!(
            scalar_from_tag(&[0u8; 32]),
            Err(DerivationError::InvalidScalar)
        ));

        let mut above = CURVE_ORDER;
        above[31] += 1;
        let mut one = [0u8; 32];
        one[31] = 1;
        assert_eq!(scalar_from_tag(&above).unwrap().secret_bytes(), one);

        // 2^256 - 1 - n
        let mut expected = [0u8; 32];
        expected[15] = 0x01;
        expected[16..].copy_from_slice(&[
            0x45, 0x51, 0x23, 0x19, 0x50, 0xb7, 0x5f, 0xc4, 0x40, 0x2d, 0xa1, 0x73, 0x2f, 0xc9,
            0xbe, 0xbe,
        ]);
        assert_eq!(scalar_from_tag(&[0xffu8; 32]).unwrap().secret_bytes(), expected);
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let child = derive(&master(), "stamp", "a", Network::Bitcoin).unwrap();
        let debug = format!("{:?}", child);
        assert!(!debug.contains(&hex::encode(child.private_key().secret_bytes())));
        assert_eq!(child.purpose_path(), "stamp/a");
    }

    #[test]
    fn test_manifest() {
        let master = master();
        let manifest = build_manifest(
            &master,
            &[("stamp", "INV-001"), ("token", "GOLD")],
            Network::Bitcoin,
        )
        .unwrap();

        assert_eq!(manifest.children.len(), 2);
        assert_eq!(manifest.master_address, master.info(Network::Bitcoin).address);
        assert_eq!(
            manifest.children[1].address,
            derive(&master, "token", "GOLD", Network::Bitcoin)
                .unwrap()
                .address()
                .to_string()
        );

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["protocol"], MANIFEST_PROTOCOL);
        assert!(json["masterPublicKey"].is_string());
        assert!(json["exportedAt"].is_string());
        assert!(json["children"][0]["publicKey"].is_string());

        let text = manifest.to_json_pretty().unwrap();
        assert!(!text.contains(&hex::encode(*master.to_bytes())));
    }
}
