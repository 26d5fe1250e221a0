//! Serde helpers for the base64 fields used by every persisted layout
//! (vault record, backup blob, protected keys, encrypted documents).

use base64::{engine::general_purpose::STANDARD, Engine};

pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

pub fn decode(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(value)
}

/// `#[serde(with = "crate::encoding::b64")]` for `Vec<u8>` fields
pub mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        super::decode(&value).map_err(serde::de::Error::custom)
    }
}

/// `#[serde(with = "crate::encoding::b64_array")]` for fixed-size fields
pub mod b64_array {
    use serde::{Deserialize, Deserializer};

    pub use super::b64::serialize;

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let bytes = super::decode(&value).map_err(serde::de::Error::custom)?;
        <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| {
            serde::de::Error::invalid_length(bytes.len(), &format!("{} bytes", N).as_str())
        })
    }
}

#[cfg(test)]
mod test {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Fixture {
        #[serde(with = "super::b64")]
        data: Vec<u8>,
        #[serde(with = "super::b64_array")]
        iv: [u8; 4],
    }

    #[test]
    fn test_fixed_size_field_rejects_wrong_length() {
        let json = r#"{"data":"AAE=","iv":"AAECAwQ="}"#;
        assert!(serde_json::from_str::<Fixture>(json).is_err());

        let json = r#"{"data":"AAE=","iv":"AAECAw=="}"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        assert_eq!(fixture.data, vec![0, 1]);
        assert_eq!(fixture.iv, [0, 1, 2, 3]);
    }
}
