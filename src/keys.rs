use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chain::{Transaction, TxHash};
use crate::ledger::Address;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid secret key hex: {0}")]
    SecretHex(String),
    #[error("secret key must be 32 bytes, got {0}")]
    SecretLength(usize),
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not match transaction")]
    InvalidSignature,
}

pub fn account_address(key: &VerifyingKey) -> Address {
    Address::derive(b"account", key.as_bytes())
}

pub struct Keypair {
    signing: SigningKey,
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl Keypair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let bytes =
            hex::decode(secret_hex.trim()).map_err(|e| KeyError::SecretHex(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::SecretLength(bytes.len()))?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().as_bytes())
    }

    pub fn address(&self) -> Address {
        account_address(&self.signing.verifying_key())
    }

    pub fn sign(&self, tx: Transaction, nonce: u64) -> SignedTransaction {
        let signature = self.signing.sign(&signing_payload(nonce, &tx));
        SignedTransaction {
            tx,
            nonce,
            public_key: self.signing.verifying_key().as_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

/// A transaction together with the key that authorises it. The sender is
/// the account derived from `public_key`, never a field the client picks.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub nonce: u64,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    pub fn hash(&self) -> TxHash {
        let mut hasher = Sha256::new();
        hasher.update(b"signed");
        hasher.update(&self.public_key);
        hasher.update(signing_payload(self.nonce, &self.tx));
        TxHash(hasher.finalize().into())
    }

    /// Checks the signature and returns the sender's address.
    pub fn verify(&self) -> Result<Address, KeyError> {
        let public_key: [u8; 32] = self
            .public_key
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::MalformedPublicKey)?;
        let key =
            VerifyingKey::from_bytes(&public_key).map_err(|_| KeyError::MalformedPublicKey)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| KeyError::MalformedSignature)?;
        key.verify_strict(&signing_payload(self.nonce, &self.tx), &signature)
            .map_err(|_| KeyError::InvalidSignature)?;
        Ok(account_address(&key))
    }
}

fn signing_payload(nonce: u64, tx: &Transaction) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"tokensale-tx");
    buf.extend_from_slice(&nonce.to_le_bytes());
    buf.extend(tx.commitment());
    buf
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
