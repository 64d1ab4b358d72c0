use serde::{Deserialize, Serialize};

use crate::ledger::{Address, Amount};

use super::SaleError;

/// Single-level referral bonus, a whole percentage of the purchaser's credit.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralBonus {
    percent: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferralPayout {
    pub recipient: Address,
    pub amount: Amount,
}

impl ReferralBonus {
    pub const MAX_PERCENT: u8 = 100;

    pub fn new(percent: u8) -> Result<Self, SaleError> {
        if percent > Self::MAX_PERCENT {
            return Err(SaleError::InvalidConfig(format!(
                "referral bonus {percent}% exceeds {}%",
                Self::MAX_PERCENT
            )));
        }
        Ok(Self { percent })
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Bonus owed on `credit`, rounded down.
    pub fn bonus_on(&self, credit: Amount) -> Result<Amount, SaleError> {
        credit
            .checked_mul(Amount::from(self.percent))
            .map(|scaled| scaled / 100)
            .ok_or(SaleError::ArithmeticOverflow)
    }

    /// `None` when there is no referrer. A zero bonus still yields a payout
    /// so callers can tell "referred, nothing earned" from "not referred".
    pub fn payout(
        &self,
        referrer: Option<&Address>,
        credit: Amount,
    ) -> Result<Option<ReferralPayout>, SaleError> {
        let Some(referrer) = referrer else {
            return Ok(None);
        };
        Ok(Some(ReferralPayout {
            recipient: *referrer,
            amount: self.bonus_on(credit)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::UNIT;

    fn addr(tag: &str) -> Address {
        Address::derive(b"account", tag.as_bytes())
    }

    #[test]
    fn bonus_truncates_toward_zero() {
        let bonus = ReferralBonus::new(10).unwrap();
        assert_eq!(bonus.bonus_on(3 * UNIT / 10).unwrap(), 3 * UNIT / 100);
        assert_eq!(bonus.bonus_on(9).unwrap(), 0);
        assert_eq!(bonus.bonus_on(19).unwrap(), 1);
    }

    #[test]
    fn payout_only_when_a_referrer_is_named() {
        let bonus = ReferralBonus::new(10).unwrap();
        let bob = addr("bob");
        assert_eq!(bonus.payout(None, 1_000).unwrap(), None);
        assert_eq!(
            bonus.payout(Some(&bob), 1_000).unwrap(),
            Some(ReferralPayout {
                recipient: bob,
                amount: 100
            })
        );
        assert_eq!(
            bonus.payout(Some(&bob), 9).unwrap(),
            Some(ReferralPayout {
                recipient: bob,
                amount: 0
            })
        );
    }

    #[test]
    fn rejects_percentages_over_one_hundred() {
        assert!(ReferralBonus::new(100).is_ok());
        assert!(matches!(
            ReferralBonus::new(101).unwrap_err(),
            SaleError::InvalidConfig(_)
        ));
    }

    #[test]
    fn overflow_is_reported() {
        let bonus = ReferralBonus::new(50).unwrap();
        assert_eq!(
            bonus.bonus_on(Amount::MAX).unwrap_err(),
            SaleError::ArithmeticOverflow
        );
    }
}
