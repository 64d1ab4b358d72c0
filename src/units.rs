//! Conversion between decimal display strings and base units.

use crate::ledger::Amount;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount {0:?}")]
    InvalidDigit(String),
    #[error("amount {input:?} has more than {decimals} decimals")]
    TooManyDecimals { input: String, decimals: u32 },
    #[error("amount {0:?} does not fit in 128 bits")]
    Overflow(String),
}

/// `parse_units("0.3", 18) == 300_000_000_000_000_000`.
pub fn parse_units(input: &str, decimals: u32) -> Result<Amount, UnitsError> {
    let trimmed = input.trim().replace('_', "");
    if trimmed.is_empty() {
        return Err(UnitsError::Empty);
    }
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed.as_str(), ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(UnitsError::InvalidDigit(input.to_string()));
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        return Err(UnitsError::InvalidDigit(input.to_string()));
    }
    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals as usize {
        return Err(UnitsError::TooManyDecimals {
            input: input.to_string(),
            decimals,
        });
    }

    let overflow = || UnitsError::Overflow(input.to_string());
    let scale = 10u128.checked_pow(decimals).ok_or_else(overflow)?;
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let fraction_units: Amount = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<width$}", width = decimals as usize);
        padded.parse().map_err(|_| overflow())?
    };
    whole
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(overflow)
}

/// Inverse of [`parse_units`], without trailing zeros.
pub fn format_units(amount: Amount, decimals: u32) -> String {
    let Some(scale) = 10u128.checked_pow(decimals) else {
        return amount.to_string();
    };
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{fraction:0>width$}", width = decimals as usize);
    format!("{whole}.{}", fraction.trim_end_matches('0'))
}
