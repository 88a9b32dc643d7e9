//! Conversion between human-readable decimal amounts and token minor units.

use ethers::types::U256;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("invalid decimal amount: {0:?}")]
    InvalidFormat(String),

    #[error("negative amount is not allowed: {0}")]
    Negative(String),

    #[error("amount {amount} has {scale} decimal places, token supports {decimals}")]
    TooPrecise {
        amount: String,
        scale: u32,
        decimals: u32,
    },
}

/// Parses a non-negative decimal amount such as `"0.001"`.
pub fn parse_amount(amount: &str) -> Result<Decimal, AmountError> {
    let trimmed = amount.trim();
    let parsed = Decimal::from_str(trimmed)
        .map_err(|_| AmountError::InvalidFormat(amount.to_string()))?;

    if parsed.is_sign_negative() && !parsed.is_zero() {
        return Err(AmountError::Negative(amount.to_string()));
    }

    Ok(parsed.normalize())
}

/// Converts a human-unit amount into the token's smallest unit.
///
/// `"0.001"` with 6 decimals becomes `1000`. Inputs carrying more precision
/// than the token supports are rejected rather than truncated.
pub fn to_minor_units(amount: &str, decimals: u32) -> Result<U256, AmountError> {
    let parsed = parse_amount(amount)?;
    let scale = parsed.scale();
    if scale > decimals {
        return Err(AmountError::TooPrecise {
            amount: amount.to_string(),
            scale,
            decimals,
        });
    }

    let mantissa = U256::from(parsed.mantissa().unsigned_abs());
    Ok(mantissa * U256::exp10((decimals - scale) as usize))
}
