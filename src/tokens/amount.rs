use alloy::primitives::U256;
use bigdecimal::{BigDecimal, Signed};
use serde::Serializer;
use std::str::FromStr;

/// Fixed-point decimals of the USR token.
pub const USR_DECIMALS: u8 = 18;

/// Convert an on-chain `U256` into a raw integer `BigDecimal` (scale 0).
pub fn raw_from_u256(value: U256) -> eyre::Result<BigDecimal> {
    BigDecimal::from_str(&value.to_string())
        .map_err(|e| eyre::eyre!("Failed to convert {} to decimal: {}", value, e))
}

/// Scale a raw fixed-point amount down by `10^decimals`.
///
/// The result is exact: only the exponent is shifted, no division happens.
/// It is normalized so `1000 * 10^18` becomes `1000`, not
/// `1000.000000000000000000`.
pub fn scale_down(raw: &BigDecimal, decimals: u8) -> BigDecimal {
    let (digits, exponent) = raw.as_bigint_and_exponent();
    BigDecimal::new(digits, exponent + decimals as i64).normalized()
}

/// Whether a raw amount is below zero.
pub fn is_negative(raw: &BigDecimal) -> bool {
    raw.is_negative()
}

/// serde helper: serialize a decimal as a plain decimal string.
pub fn serialize_plain<S: Serializer>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.normalized().to_plain_string())
}
