mod native;
mod receipt;
pub mod shared;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{load_json, save_json, ConfigError};
use crate::contracts::{SaleContract, SaleError, SaleParams};
use crate::keys::{KeyError, SignedTransaction};
use crate::ledger::{build_merkle, Address, Amount, LedgerError, TokenLedger, TransferRecord};

pub use native::{NativeBank, NativeTransfer, StagedTransfers};
pub use receipt::{ChainMeta, Event, LogEntry, Receipt, TxHash};
pub use shared::{Clock, ManualClock, SharedChain, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error(transparent)]
    Sale(#[from] SaleError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("insufficient funds in {account}: balance {balance}, needed {needed}")]
    InsufficientFunds {
        account: Address,
        balance: Amount,
        needed: Amount,
    },
    #[error("value transfer to {to} failed")]
    ForwardFailed { to: Address },
    #[error("no {0} contract deployed")]
    NotDeployed(&'static str),
    #[error("{0} contract already deployed")]
    AlreadyDeployed(&'static str),
    #[error("{0} is not the deployed ledger asset")]
    UnknownToken(Address),
    #[error("transaction {0} already applied")]
    DuplicateTransaction(TxHash),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Transaction {
    BindToken {
        token: Address,
    },
    Purchase {
        value: Amount,
        referrer: Option<Address>,
    },
    BurnRemaining,
    TokenTransfer {
        to: Address,
        amount: Amount,
    },
    TokenBurn {
        amount: Amount,
    },
}

impl Transaction {
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::BindToken { .. } => "bind_token",
            Transaction::Purchase { .. } => "purchase",
            Transaction::BurnRemaining => "burn_remaining",
            Transaction::TokenTransfer { .. } => "token_transfer",
            Transaction::TokenBurn { .. } => "token_burn",
        }
    }

    /// Canonical byte encoding, signed and hashed.
    pub fn commitment(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Transaction::BindToken { token } => {
                buf.push(0);
                buf.extend_from_slice(token.as_bytes());
            }
            Transaction::Purchase { value, referrer } => {
                buf.push(1);
                buf.extend_from_slice(&value.to_le_bytes());
                match referrer {
                    Some(referrer) => {
                        buf.push(1);
                        buf.extend_from_slice(referrer.as_bytes());
                    }
                    None => buf.push(0),
                }
            }
            Transaction::BurnRemaining => buf.push(2),
            Transaction::TokenTransfer { to, amount } => {
                buf.push(3);
                buf.extend_from_slice(to.as_bytes());
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Transaction::TokenBurn { amount } => {
                buf.push(4);
                buf.extend_from_slice(&amount.to_le_bytes());
            }
        }
        buf
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployedToken {
    pub address: Address,
    pub ledger: TokenLedger,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Chain {
    meta: ChainMeta,
    native: NativeBank,
    sale: Option<SaleContract>,
    token: Option<DeployedToken>,
    nonces: BTreeMap<Address, u64>,
    applied: BTreeSet<TxHash>,
    receipts: Vec<Receipt>,
}

impl Chain {
    pub fn new(native: NativeBank) -> Self {
        Self {
            native,
            ..Self::default()
        }
    }

    pub fn genesis(allocations: impl IntoIterator<Item = (Address, Amount)>) -> Self {
        Self::new(NativeBank::with_allocations(allocations))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(path, self)
    }

    pub fn meta(&self) -> &ChainMeta {
        &self.meta
    }

    pub fn sale(&self) -> Option<&SaleContract> {
        self.sale.as_ref()
    }

    pub fn token(&self) -> Option<&DeployedToken> {
        self.token.as_ref()
    }

    pub fn native_balance(&self, account: &Address) -> Amount {
        self.native.balance_of(account)
    }

    pub fn token_balance(&self, account: &Address) -> Amount {
        self.token
            .as_ref()
            .map_or(0, |token| token.ledger.balance_of(account))
    }

    pub fn native_total(&self) -> Amount {
        self.native.total()
    }

    pub fn set_refuses_deposits(&mut self, account: Address, refuses: bool) {
        self.native.set_refuses_deposits(account, refuses);
    }

    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.receipts.iter().flat_map(|receipt| receipt.logs.iter())
    }

    pub fn deploy_sale(
        &mut self,
        deployer: Address,
        params: SaleParams,
        now: u64,
    ) -> Result<Address, TxError> {
        if self.sale.is_some() {
            return Err(TxError::AlreadyDeployed("sale"));
        }
        let (address, tx_hash) = self.next_contract_address(deployer);
        self.sale = Some(SaleContract::new(address, deployer, params)?);
        self.bump_nonce(deployer);
        self.record(deployer, tx_hash, now, Vec::new());
        Ok(address)
    }

    /// Deploys the ledger asset, minting `max_supply` to `holder`.
    pub fn deploy_token(
        &mut self,
        deployer: Address,
        holder: Address,
        max_supply: Amount,
        now: u64,
    ) -> Result<Address, TxError> {
        if self.token.is_some() {
            return Err(TxError::AlreadyDeployed("token"));
        }
        let (address, tx_hash) = self.next_contract_address(deployer);
        let (ledger, minted) = TokenLedger::new(holder, max_supply);
        self.token = Some(DeployedToken { address, ledger });
        self.bump_nonce(deployer);
        self.record(deployer, tx_hash, now, vec![LogEntry::new(address, minted)]);
        Ok(address)
    }

    /// Runs `tx` on behalf of an already-authenticated `sender`.
    pub fn execute(
        &mut self,
        sender: Address,
        tx: Transaction,
        now: u64,
    ) -> Result<Receipt, TxError> {
        let mut hasher = Sha256::new();
        hasher.update(b"exec");
        hasher.update(sender.as_bytes());
        hasher.update(self.meta.height.to_le_bytes());
        hasher.update(tx.commitment());
        let tx_hash = TxHash(hasher.finalize().into());
        self.run(sender, &tx, tx_hash, now)
    }

    /// Verifies the signature, rejects replays, then executes.
    pub fn submit(&mut self, signed: &SignedTransaction, now: u64) -> Result<Receipt, TxError> {
        let sender = signed.verify()?;
        let tx_hash = signed.hash();
        if self.applied.contains(&tx_hash) {
            return Err(TxError::DuplicateTransaction(tx_hash));
        }
        self.run(sender, &signed.tx, tx_hash, now)
    }

    fn run(
        &mut self,
        sender: Address,
        tx: &Transaction,
        tx_hash: TxHash,
        now: u64,
    ) -> Result<Receipt, TxError> {
        let result = match tx {
            Transaction::BindToken { token } => self.bind_token(sender, *token),
            Transaction::Purchase { value, referrer } => {
                self.purchase(sender, *value, *referrer, now)
            }
            Transaction::BurnRemaining => self.burn_remaining(now),
            Transaction::TokenTransfer { to, amount } => self.with_token(|ledger| {
                ledger.transfer(sender, *to, *amount)
            }),
            Transaction::TokenBurn { amount } => {
                self.with_token(|ledger| ledger.burn(sender, *amount))
            }
        };

        let status = if result.is_ok() { "success" } else { "failed" };
        counter!("sale.transactions.total", "kind" => tx.kind(), "status" => status)
            .increment(1);

        let logs = result?;
        Ok(self.record(sender, tx_hash, now, logs))
    }

    fn with_token<F>(&mut self, op: F) -> Result<Vec<LogEntry>, TxError>
    where
        F: FnOnce(&mut TokenLedger) -> Result<TransferRecord, LedgerError>,
    {
        let token = self.token.as_mut().ok_or(TxError::NotDeployed("token"))?;
        let record = op(&mut token.ledger)?;
        Ok(vec![LogEntry::new(token.address, record)])
    }

    fn bind_token(&mut self, sender: Address, token: Address) -> Result<Vec<LogEntry>, TxError> {
        let deployed = self.token.as_ref().map(|deployed| deployed.address);
        let sale = self.sale.as_mut().ok_or(TxError::NotDeployed("sale"))?;
        if sale.token().is_none() && deployed != Some(token) {
            return Err(TxError::UnknownToken(token));
        }
        let event = sale.bind_token(sender, token)?;
        Ok(vec![LogEntry::new(sale.address(), event)])
    }

    fn purchase(
        &mut self,
        sender: Address,
        value: Amount,
        referrer: Option<Address>,
        now: u64,
    ) -> Result<Vec<LogEntry>, TxError> {
        let sale = self.sale.as_mut().ok_or(TxError::NotDeployed("sale"))?;
        let sale_address = sale.address();
        let available = self
            .token
            .as_ref()
            .map_or(0, |token| token.ledger.balance_of(&sale_address));
        let plan = sale.plan_purchase(sender, value, referrer, now, available)?;
        let token = self.token.as_mut().ok_or(TxError::NotDeployed("token"))?;

        // The attached value lands on the sale and is forwarded in the same batch.
        let staged_tokens = token.ledger.stage(&plan.mutations)?;
        let staged_native = self.native.stage(&[
            NativeTransfer {
                from: sender,
                to: sale_address,
                amount: value,
            },
            NativeTransfer {
                from: sale_address,
                to: plan.forward.to,
                amount: plan.forward.value,
            },
        ])?;

        self.native.commit(staged_native);
        let token_address = token.address;
        let mut logs: Vec<LogEntry> = token
            .ledger
            .commit(staged_tokens)
            .into_iter()
            .map(|record| LogEntry::new(token_address, record))
            .collect();
        sale.record_purchase(&plan);

        counter!("sale.purchases.total").increment(1);
        histogram!("sale.purchase.credited").record(plan.quote.total() as f64);

        logs.extend(
            plan.events
                .into_iter()
                .map(|event| LogEntry::new(sale_address, event)),
        );
        Ok(logs)
    }

    fn burn_remaining(&mut self, now: u64) -> Result<Vec<LogEntry>, TxError> {
        let sale = self.sale.as_mut().ok_or(TxError::NotDeployed("sale"))?;
        let sale_address = sale.address();
        let own_balance = self
            .token
            .as_ref()
            .map_or(0, |token| token.ledger.balance_of(&sale_address));
        let amount = sale.plan_burn(now, own_balance)?;
        let token = self.token.as_mut().ok_or(TxError::NotDeployed("token"))?;
        let record = token.ledger.burn(sale_address, amount)?;
        sale.record_burn();

        counter!("sale.burns.total").increment(1);
        histogram!("sale.burn.amount").record(amount as f64);

        Ok(vec![LogEntry::new(token.address, record)])
    }

    fn next_contract_address(&self, deployer: Address) -> (Address, TxHash) {
        let nonce = self.nonces.get(&deployer).copied().unwrap_or(0);
        let address = Address::contract(&deployer, nonce);
        let mut hasher = Sha256::new();
        hasher.update(b"deploy");
        hasher.update(deployer.as_bytes());
        hasher.update(nonce.to_le_bytes());
        (address, TxHash(hasher.finalize().into()))
    }

    fn bump_nonce(&mut self, deployer: Address) {
        *self.nonces.entry(deployer).or_insert(0) += 1;
    }

    fn record(
        &mut self,
        sender: Address,
        tx_hash: TxHash,
        now: u64,
        logs: Vec<LogEntry>,
    ) -> Receipt {
        let receipt = Receipt {
            index: self.meta.height,
            tx_hash,
            sender,
            timestamp: now,
            logs,
        };
        self.meta.height += 1;
        self.meta.timestamp = self.meta.timestamp.max(now);
        self.meta.previous_receipt = Some(tx_hash);
        self.applied.insert(tx_hash);
        self.receipts.push(receipt.clone());
        receipt
    }

    /// Commitment to native balances, the ledger asset and the sale's counters.
    pub fn state_root(&self) -> [u8; 32] {
        let mut leaves = vec![self.native.state_root()];
        if let Some(token) = &self.token {
            leaves.push(token.ledger.state_root());
        }
        if let Some(sale) = &self.sale {
            let mut hasher = Sha256::new();
            hasher.update(b"sale");
            hasher.update(sale.address().as_bytes());
            hasher.update(sale.token_amount_raised().to_le_bytes());
            hasher.update([u8::from(sale.is_burned())]);
            if let Some(token) = sale.token() {
                hasher.update(token.as_bytes());
            }
            leaves.push(hasher.finalize().into());
        }
        build_merkle(leaves)
    }
}
