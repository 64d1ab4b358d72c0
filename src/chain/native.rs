use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ledger::{balance_leaf, build_merkle, Address, Amount};

use super::TxError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NativeTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
}

/// Balances after a batch of native transfers, not yet written back.
#[derive(Debug)]
pub struct StagedTransfers {
    balances: BTreeMap<Address, Amount>,
}

/// Balances of the host's payment currency.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NativeBank {
    balances: BTreeMap<Address, Amount>,
    #[serde(default)]
    refuses_deposits: BTreeSet<Address>,
}

impl NativeBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocations(allocations: impl IntoIterator<Item = (Address, Amount)>) -> Self {
        let mut bank = Self::new();
        for (account, amount) in allocations {
            let balance = bank.balances.entry(account).or_insert(0);
            *balance = balance.saturating_add(amount);
        }
        bank.balances.retain(|_, balance| *balance > 0);
        bank
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Marks `account` as a contract that rejects inbound value.
    pub fn set_refuses_deposits(&mut self, account: Address, refuses: bool) {
        if refuses {
            self.refuses_deposits.insert(account);
        } else {
            self.refuses_deposits.remove(&account);
        }
    }

    pub fn stage(&self, transfers: &[NativeTransfer]) -> Result<StagedTransfers, TxError> {
        let mut balances: BTreeMap<Address, Amount> = BTreeMap::new();
        for transfer in transfers {
            let from = balances
                .entry(transfer.from)
                .or_insert_with(|| self.balance_of(&transfer.from));
            if *from < transfer.amount {
                return Err(TxError::InsufficientFunds {
                    account: transfer.from,
                    balance: *from,
                    needed: transfer.amount,
                });
            }
            *from -= transfer.amount;

            if self.refuses_deposits.contains(&transfer.to) {
                return Err(TxError::ForwardFailed { to: transfer.to });
            }
            let to = balances
                .entry(transfer.to)
                .or_insert_with(|| self.balance_of(&transfer.to));
            *to = to
                .checked_add(transfer.amount)
                .ok_or(TxError::ForwardFailed { to: transfer.to })?;
        }
        Ok(StagedTransfers { balances })
    }

    pub fn commit(&mut self, staged: StagedTransfers) {
        for (account, balance) in staged.balances {
            if balance == 0 {
                self.balances.remove(&account);
            } else {
                self.balances.insert(account, balance);
            }
        }
    }

    pub fn apply(&mut self, transfers: &[NativeTransfer]) -> Result<(), TxError> {
        let staged = self.stage(transfers)?;
        self.commit(staged);
        Ok(())
    }

    pub fn total(&self) -> Amount {
        self.balances.values().sum()
    }

    pub fn state_root(&self) -> [u8; 32] {
        build_merkle(
            self.balances
                .iter()
                .map(|(account, balance)| balance_leaf(b"native", account, *balance))
                .collect(),
        )
    }
}
