mod address;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use address::{Address, AddressParseError};

pub type Amount = u128;

pub const DECIMALS: u32 = 18;
pub const UNIT: Amount = 1_000_000_000_000_000_000; // 1 token = 1e18 base units
pub const MAX_SUPPLY: Amount = 15_000 * UNIT;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ERC20: {operation} amount exceeds balance of {account} (balance {balance}, needed {needed})")]
    InsufficientBalance {
        operation: &'static str,
        account: Address,
        balance: Amount,
        needed: Amount,
    },
}

/// A movement of value. `from: None` is a mint, `to: None` is a burn.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRecord {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LedgerMutation {
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    Burn {
        from: Address,
        amount: Amount,
    },
}

impl LedgerMutation {
    fn operation(&self) -> &'static str {
        match self {
            LedgerMutation::Transfer { .. } => "transfer",
            LedgerMutation::Burn { .. } => "burn",
        }
    }
}

/// Post-state of a batch of mutations that has passed every balance check.
///
/// Produced by [`TokenLedger::stage`] and consumed by [`TokenLedger::commit`].
/// A staged batch holds absolute balances, so it must be committed to the
/// ledger it was staged from with no other writes in between.
#[derive(Debug)]
pub struct StagedBatch {
    balances: BTreeMap<Address, Amount>,
    total_supply: Amount,
    records: Vec<TransferRecord>,
}

impl StagedBatch {
    pub fn records(&self) -> &[TransferRecord] {
        &self.records
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenLedger {
    total_supply: Amount,
    balances: BTreeMap<Address, Amount>,
}

impl TokenLedger {
    /// Mints `max_supply` to `holder`.
    pub fn new(holder: Address, max_supply: Amount) -> (Self, TransferRecord) {
        let mut balances = BTreeMap::new();
        if max_supply > 0 {
            balances.insert(holder, max_supply);
        }
        let ledger = Self {
            total_supply: max_supply,
            balances,
        };
        let minted = TransferRecord {
            from: None,
            to: Some(holder),
            value: max_supply,
        };
        (ledger, minted)
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn holders(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }

    pub fn transfer(
        &mut self,
        caller: Address,
        to: Address,
        amount: Amount,
    ) -> Result<TransferRecord, LedgerError> {
        let mut records = self.apply_mutations(&[LedgerMutation::Transfer {
            from: caller,
            to,
            amount,
        }])?;
        Ok(records.remove(0))
    }

    pub fn burn(&mut self, caller: Address, amount: Amount) -> Result<TransferRecord, LedgerError> {
        let mut records = self.apply_mutations(&[LedgerMutation::Burn {
            from: caller,
            amount,
        }])?;
        Ok(records.remove(0))
    }

    /// Applies the batch in full or not at all.
    pub fn apply_mutations(
        &mut self,
        mutations: &[LedgerMutation],
    ) -> Result<Vec<TransferRecord>, LedgerError> {
        let staged = self.stage(mutations)?;
        Ok(self.commit(staged))
    }

    /// Runs the batch against a copy of the touched balances.
    pub fn stage(&self, mutations: &[LedgerMutation]) -> Result<StagedBatch, LedgerError> {
        let mut balances: BTreeMap<Address, Amount> = BTreeMap::new();
        let mut total_supply = self.total_supply;
        let mut records = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            let (from, amount) = match mutation {
                LedgerMutation::Transfer { from, amount, .. }
                | LedgerMutation::Burn { from, amount } => (*from, *amount),
            };
            let balance = *balances
                .entry(from)
                .or_insert_with(|| self.balance_of(&from));
            if balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    operation: mutation.operation(),
                    account: from,
                    balance,
                    needed: amount,
                });
            }
            balances.insert(from, balance - amount);

            match mutation {
                LedgerMutation::Transfer { to, .. } => {
                    // every credit is bounded by the total supply
                    let entry = balances.entry(*to).or_insert_with(|| self.balance_of(to));
                    *entry += amount;
                    records.push(TransferRecord {
                        from: Some(from),
                        to: Some(*to),
                        value: amount,
                    });
                }
                LedgerMutation::Burn { .. } => {
                    total_supply -= amount;
                    records.push(TransferRecord {
                        from: Some(from),
                        to: None,
                        value: amount,
                    });
                }
            }
        }

        Ok(StagedBatch {
            balances,
            total_supply,
            records,
        })
    }

    pub fn commit(&mut self, staged: StagedBatch) -> Vec<TransferRecord> {
        for (account, balance) in staged.balances {
            if balance == 0 {
                self.balances.remove(&account);
            } else {
                self.balances.insert(account, balance);
            }
        }
        self.total_supply = staged.total_supply;
        staged.records
    }

    pub fn circulating(&self) -> Amount {
        self.balances.values().sum()
    }

    /// Deterministic root over every non-zero balance and the total supply.
    pub fn state_root(&self) -> [u8; 32] {
        let mut leaves: Vec<[u8; 32]> = self
            .balances
            .iter()
            .map(|(account, balance)| balance_leaf(b"token", account, *balance))
            .collect();
        let mut hasher = Sha256::new();
        hasher.update(b"supply");
        hasher.update(self.total_supply.to_le_bytes());
        leaves.push(hasher.finalize().into());
        build_merkle(leaves)
    }
}

pub(crate) fn balance_leaf(domain: &[u8], account: &Address, balance: Amount) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(account.as_bytes());
    hasher.update(balance.to_le_bytes());
    hasher.finalize().into()
}

pub(crate) fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"tokensale-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
