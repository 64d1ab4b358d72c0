mod referral;

use serde::{Deserialize, Serialize};

use crate::ledger::{Address, Amount, LedgerMutation};

pub use referral::{ReferralBonus, ReferralPayout};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaleError {
    #[error("the token presale has not started yet")]
    SaleNotStarted,
    #[error("the token presale has ended")]
    SaleEnded,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("the token sold out")]
    SoldOut,
    #[error("the token has already been set for sale")]
    AlreadyBound,
    #[error("no token has been set for sale")]
    NotBound,
    #[error("caller is not the owner")]
    Unauthorized,
    #[error("the token presale has not ended yet")]
    SaleNotEnded,
    #[error("nothing to burn")]
    NothingToBurn,
    #[error("arithmetic overflow")]
    ArithmeticOverflow,
    #[error("invalid sale configuration: {0}")]
    InvalidConfig(String),
}

/// Immutable sale parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleParams {
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    pub rate_numerator: u128,
    pub rate_denominator: u128,
    pub referral_bonus_percent: u8,
    pub treasury: Address,
}

impl SaleParams {
    pub fn validate(&self) -> Result<(), SaleError> {
        if self.rate_numerator == 0 || self.rate_denominator == 0 {
            return Err(SaleError::InvalidConfig(format!(
                "rate {}/{} must be a positive rational",
                self.rate_numerator, self.rate_denominator
            )));
        }
        if self.start_timestamp >= self.end_timestamp {
            return Err(SaleError::InvalidConfig(format!(
                "sale window [{}, {}) is empty",
                self.start_timestamp, self.end_timestamp
            )));
        }
        ReferralBonus::new(self.referral_bonus_percent)?;
        Ok(())
    }
}

/// The owner exists only until the token is bound.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Binding {
    Unbound { owner: Address },
    Bound { token: Address },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SalePhase {
    Pending,
    Open,
    Closed,
    Finalized,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SaleEvent {
    TokensPurchased {
        purchaser: Address,
        beneficiary: Address,
        value: Amount,
        amount: Amount,
    },
    ReferrerEarned {
        purchaser: Address,
        referrer: Address,
        value: Amount,
    },
    OwnershipTransferred {
        previous_owner: Option<Address>,
        new_owner: Option<Address>,
    },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quote {
    pub purchaser_credit: Amount,
    pub referrer_credit: Amount,
}

impl Quote {
    pub fn total(&self) -> Amount {
        self.purchaser_credit.saturating_add(self.referrer_credit)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Forward {
    pub to: Address,
    pub value: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurchasePlan {
    pub purchaser: Address,
    pub quote: Quote,
    pub mutations: Vec<LedgerMutation>,
    pub forward: Forward,
    pub events: Vec<SaleEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleContract {
    address: Address,
    params: SaleParams,
    referral: ReferralBonus,
    binding: Binding,
    amount_raised: Amount,
    burned: bool,
}

impl SaleContract {
    pub fn new(address: Address, owner: Address, params: SaleParams) -> Result<Self, SaleError> {
        params.validate()?;
        Ok(Self {
            address,
            referral: ReferralBonus::new(params.referral_bonus_percent)?,
            params,
            binding: Binding::Unbound { owner },
            amount_raised: 0,
            burned: false,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn params(&self) -> &SaleParams {
        &self.params
    }

    pub fn starting_timestamp(&self) -> u64 {
        self.params.start_timestamp
    }

    pub fn ending_timestamp(&self) -> u64 {
        self.params.end_timestamp
    }

    pub fn rate_price_numerator(&self) -> u128 {
        self.params.rate_numerator
    }

    pub fn rate_price_denominator(&self) -> u128 {
        self.params.rate_denominator
    }

    pub fn referral_bonus(&self) -> u8 {
        self.referral.percent()
    }

    pub fn treasury(&self) -> Address {
        self.params.treasury
    }

    pub fn token_amount_raised(&self) -> Amount {
        self.amount_raised
    }

    pub fn is_burned(&self) -> bool {
        self.burned
    }

    pub fn owner(&self) -> Option<Address> {
        match &self.binding {
            Binding::Unbound { owner } => Some(*owner),
            Binding::Bound { .. } => None,
        }
    }

    pub fn token(&self) -> Option<Address> {
        match &self.binding {
            Binding::Bound { token } => Some(*token),
            Binding::Unbound { .. } => None,
        }
    }

    pub fn phase(&self, now: u64) -> SalePhase {
        if self.burned {
            SalePhase::Finalized
        } else if now < self.params.start_timestamp {
            SalePhase::Pending
        } else if now < self.params.end_timestamp {
            SalePhase::Open
        } else {
            SalePhase::Closed
        }
    }

    /// Binds the ledger asset and renounces ownership in the same step.
    pub fn bind_token(&mut self, caller: Address, token: Address) -> Result<SaleEvent, SaleError> {
        let owner = match &self.binding {
            Binding::Bound { .. } => return Err(SaleError::AlreadyBound),
            Binding::Unbound { owner } => *owner,
        };
        if caller != owner {
            return Err(SaleError::Unauthorized);
        }
        self.binding = Binding::Bound { token };
        Ok(SaleEvent::OwnershipTransferred {
            previous_owner: Some(owner),
            new_owner: None,
        })
    }

    /// Credits for `value`, rounded down, whether or not a referrer is named.
    pub fn quote(&self, value: Amount, with_referrer: bool) -> Result<Quote, SaleError> {
        let purchaser_credit = value
            .checked_mul(self.params.rate_numerator)
            .ok_or(SaleError::ArithmeticOverflow)?
            / self.params.rate_denominator;
        let referrer_credit = if with_referrer {
            self.referral.bonus_on(purchaser_credit)?
        } else {
            0
        };
        Ok(Quote {
            purchaser_credit,
            referrer_credit,
        })
    }

    /// `available` is the contract's own ledger-asset balance.
    pub fn plan_purchase(
        &self,
        purchaser: Address,
        value: Amount,
        referrer: Option<Address>,
        now: u64,
        available: Amount,
    ) -> Result<PurchasePlan, SaleError> {
        if self.token().is_none() {
            return Err(SaleError::NotBound);
        }
        match self.phase(now) {
            SalePhase::Pending => return Err(SaleError::SaleNotStarted),
            SalePhase::Closed | SalePhase::Finalized => return Err(SaleError::SaleEnded),
            SalePhase::Open => {}
        }
        if value == 0 {
            return Err(SaleError::InvalidAmount);
        }

        let purchaser_credit = self.quote(value, false)?.purchaser_credit;
        let payout = self
            .referral
            .payout(referrer.as_ref(), purchaser_credit)?
            .filter(|payout| payout.amount > 0);
        let quote = Quote {
            purchaser_credit,
            referrer_credit: payout.as_ref().map_or(0, |p| p.amount),
        };
        if quote.total() > available {
            return Err(SaleError::SoldOut);
        }

        let mut mutations = vec![LedgerMutation::Transfer {
            from: self.address,
            to: purchaser,
            amount: purchaser_credit,
        }];
        let mut events = vec![SaleEvent::TokensPurchased {
            purchaser,
            beneficiary: purchaser,
            value,
            amount: purchaser_credit,
        }];
        if let Some(payout) = payout {
            mutations.push(LedgerMutation::Transfer {
                from: self.address,
                to: payout.recipient,
                amount: payout.amount,
            });
            events.push(SaleEvent::ReferrerEarned {
                purchaser,
                referrer: payout.recipient,
                value: payout.amount,
            });
        }

        Ok(PurchasePlan {
            purchaser,
            quote,
            mutations,
            forward: Forward {
                to: self.params.treasury,
                value,
            },
            events,
        })
    }

    /// Records a committed purchase. The total never exceeds the initial
    /// supply, since every credit leaves the contract's own balance.
    pub fn record_purchase(&mut self, plan: &PurchasePlan) {
        self.amount_raised += plan.quote.total();
    }

    /// Amount to burn: the whole remaining balance, zero included.
    pub fn plan_burn(&self, now: u64, own_balance: Amount) -> Result<Amount, SaleError> {
        if self.token().is_none() {
            return Err(SaleError::NotBound);
        }
        if now < self.params.end_timestamp {
            return Err(SaleError::SaleNotEnded);
        }
        if self.burned {
            return Err(SaleError::NothingToBurn);
        }
        Ok(own_balance)
    }

    pub fn record_burn(&mut self) {
        self.burned = true;
    }
}
