//! Fixed-supply ledger asset sold through a timed sale with referral bonuses.

pub mod chain;
pub mod config;
pub mod contracts;
pub mod deploy;
pub mod keys;
pub mod ledger;
pub mod telemetry;
pub mod units;

pub use chain::{Chain, Receipt, SharedChain, Transaction, TxError};
pub use config::{ConfigError, SaleConfig};
pub use contracts::{SaleContract, SaleError, SaleParams};
pub use deploy::{deploy, Deployment};
pub use keys::{Keypair, SignedTransaction};
pub use ledger::{Address, Amount, TokenLedger};
