//! Deployment configuration and JSON persistence helpers.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::contracts::{SaleError, SaleParams};
use crate::ledger::{Address, Amount, MAX_SUPPLY};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything needed to stand up a sale on a fresh chain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleConfig {
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    pub treasury: Address,
    #[serde(default = "default_rate_numerator")]
    pub rate_numerator: u128,
    #[serde(default = "default_rate_denominator")]
    pub rate_denominator: u128,
    #[serde(default = "default_referral_bonus")]
    pub referral_bonus_percent: u8,
    #[serde(default = "default_max_supply")]
    pub max_supply: Amount,
    /// Native currency handed out at genesis.
    #[serde(default)]
    pub allocations: BTreeMap<Address, Amount>,
}

fn default_rate_numerator() -> u128 {
    3
}

fn default_rate_denominator() -> u128 {
    10 // 0.3 units per unit of value
}

fn default_referral_bonus() -> u8 {
    10 // percent of the purchaser's credit
}

fn default_max_supply() -> Amount {
    MAX_SUPPLY
}

impl SaleConfig {
    pub fn new(start_timestamp: u64, end_timestamp: u64, treasury: Address) -> Self {
        Self {
            start_timestamp,
            end_timestamp,
            treasury,
            rate_numerator: default_rate_numerator(),
            rate_denominator: default_rate_denominator(),
            referral_bonus_percent: default_referral_bonus(),
            max_supply: default_max_supply(),
            allocations: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> Result<SaleParams, SaleError> {
        let params = SaleParams {
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
            rate_numerator: self.rate_numerator,
            rate_denominator: self.rate_denominator,
            referral_bonus_percent: self.referral_bonus_percent,
            treasury: self.treasury,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(path, self)
    }
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
