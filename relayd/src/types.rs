use std::fmt;
use std::str::FromStr;

use ethers_core::types::{Address, H256};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub type EVMAddress = Address;
pub type Hash = H256;
/// Network identifier used by the attestation service.
pub type Domain = u32;

const TX_HASH_HEX_LEN: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("tx hash must be 0x followed by 64 hex characters, got {0:?}")]
    TxHash(String),
}

/// Hash of the burn transaction on the source domain, always `0x` + 64 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(H256);

impl TxHash {
    pub fn as_h256(&self) -> &H256 {
        &self.0
    }
}

impl From<H256> for TxHash {
    fn from(hash: H256) -> Self {
        Self(hash)
    }
}

impl FromStr for TxHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::TxHash(s.to_string());

        let digits = s.strip_prefix("0x").ok_or_else(invalid)?;
        if digits.len() != TX_HASH_HEX_LEN || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| invalid())?;

        Ok(Self(H256(bytes)))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for TxHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(D::Error::custom)
    }
}

/// Identifies a purchase by the burn it was paid with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub domain: Domain,
    pub tx_hash: TxHash,
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.tx_hash)
    }
}

/// Serializes a U256 as a decimal string, since JSON numbers cannot hold 256-bit values.
pub mod u256_decimal {
    use ethers_core::types::U256;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        U256::from_dec_str(&value).map_err(|err| D::Error::custom(err.to_string()))
    }
}
