use std::{fmt, str::FromStr};

use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

use crate::contracts::SaleEvent;
use crate::ledger::{Address, Amount, TransferRecord};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for TxHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(s).map_err(|e| format!("{e}"))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| format!("hash must be 32 bytes, got {}", bytes.len()))?;
        Ok(Self(bytes))
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
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

/// Everything an indexer can observe.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    Transfer {
        from: Option<Address>,
        to: Option<Address>,
        value: Amount,
    },
    Sale(SaleEvent),
}

impl From<TransferRecord> for Event {
    fn from(record: TransferRecord) -> Self {
        Event::Transfer {
            from: record.from,
            to: record.to,
            value: record.value,
        }
    }
}

impl From<SaleEvent> for Event {
    fn from(event: SaleEvent) -> Self {
        Event::Sale(event)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub emitter: Address,
    pub event: Event,
}

impl LogEntry {
    pub fn new(emitter: Address, event: impl Into<Event>) -> Self {
        Self {
            emitter,
            event: event.into(),
        }
    }
}

/// Record of one successful transaction. Failed transactions leave none.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub index: u64,
    pub tx_hash: TxHash,
    pub sender: Address,
    pub timestamp: u64,
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    /// Purchaser plus referrer credit issued by this transaction.
    pub fn credited(&self) -> Amount {
        self.logs
            .iter()
            .map(|log| match &log.event {
                Event::Sale(SaleEvent::TokensPurchased { amount, .. }) => *amount,
                Event::Sale(SaleEvent::ReferrerEarned { value, .. }) => *value,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChainMeta {
    pub height: u64,
    pub timestamp: u64,
    pub previous_receipt: Option<TxHash>,
}
