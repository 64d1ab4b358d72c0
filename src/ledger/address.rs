use std::{fmt, str::FromStr};

use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// 20-byte account identifier, shown as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; Address::LEN]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("invalid address hex: {0}")]
    Hex(String),
    #[error("address must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

impl Address {
    pub const LEN: usize = 20;

    pub const fn from_bytes(bytes: [u8; Address::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Address::LEN] {
        &self.0
    }

    /// Truncated `sha256(domain || material)`.
    pub fn derive(domain: &[u8], material: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(material);
        let digest: [u8; 32] = hasher.finalize().into();
        let mut bytes = [0u8; Address::LEN];
        bytes.copy_from_slice(&digest[..Address::LEN]);
        Self(bytes)
    }

    /// Address of a contract created by `deployer` at its `nonce`-th deployment.
    pub fn contract(deployer: &Address, nonce: u64) -> Self {
        let mut material = Vec::with_capacity(Address::LEN + 8);
        material.extend_from_slice(deployer.as_bytes());
        material.extend_from_slice(&nonce.to_le_bytes());
        Self::derive(b"contract", &material)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AddressParseError::Hex(e.to_string()))?;
        let bytes: [u8; Address::LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| AddressParseError::Length {
                    expected: Address::LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
