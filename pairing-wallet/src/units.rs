//! Amount conversion between decimal strings and base units.
//!
//! Amounts are held as `U256` base units (wei). Parsing is exact decimal
//! arithmetic; no floating point is involved, so formatting a value and
//! parsing it back always yields the original.

use primitive_types::U256;
use thiserror::Error;

/// Decimals of the native asset (1 ether = 10^18 wei).
pub const ETHER_DECIMALS: usize = 18;

/// Decimals of gwei relative to wei.
pub const GWEI_DECIMALS: usize = 9;

/// Fractional digits shown for balances.
pub const DISPLAY_DECIMALS: usize = 4;

/// Failure to parse a decimal or hex amount.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,

    #[error("amount cannot be negative")]
    Negative,

    #[error("malformed amount: {0}")]
    Malformed(String),

    #[error("too many fractional digits (max {0})")]
    TooPrecise(usize),

    #[error("amount overflows 256 bits")]
    Overflow,
}

/// Parse a decimal string into base units with the given number of decimals.
pub fn parse_units(amount: &str, decimals: usize) -> Result<U256, UnitsError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(UnitsError::Empty);
    }
    if amount.starts_with('-') {
        return Err(UnitsError::Negative);
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(UnitsError::Malformed(amount.to_string()));
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(UnitsError::Malformed(amount.to_string()));
    }
    if frac_part.len() > decimals {
        return Err(UnitsError::TooPrecise(decimals));
    }

    let int_value = if int_part.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(int_part).map_err(|_| UnitsError::Overflow)?
    };

    let mut frac_digits = frac_part.to_string();
    frac_digits.extend(std::iter::repeat('0').take(decimals - frac_part.len()));
    let frac_value = if frac_digits.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(&frac_digits).map_err(|_| UnitsError::Overflow)?
    };

    int_value
        .checked_mul(U256::exp10(decimals))
        .and_then(|v| v.checked_add(frac_value))
        .ok_or(UnitsError::Overflow)
}

/// Format base units as an exact decimal string.
///
/// Trailing fractional zeros are trimmed, keeping at least one digit
/// (`"1.0"`, `"0.5"`, `"0.000000000000000001"`).
pub fn format_units(value: U256, decimals: usize) -> String {
    if decimals == 0 {
        return value.to_string();
    }

    let scale = U256::exp10(decimals);
    let int_part = value / scale;
    let frac_part = value % scale;

    let frac = format!("{:0>width$}", frac_part.to_string(), width = decimals);
    let frac = frac.trim_end_matches('0');
    let frac = if frac.is_empty() { "0" } else { frac };

    format!("{}.{}", int_part, frac)
}

/// Format base units rounded half-up to `places` fractional digits.
pub fn format_units_rounded(value: U256, decimals: usize, places: usize) -> String {
    let places = places.min(decimals);
    let divisor = U256::exp10(decimals - places);
    let half = divisor / 2;

    let rounded = match value.checked_add(half) {
        Some(v) => v / divisor,
        None => value / divisor,
    };

    if places == 0 {
        return rounded.to_string();
    }

    let scale = U256::exp10(places);
    format!(
        "{}.{:0>width$}",
        rounded / scale,
        (rounded % scale).to_string(),
        width = places
    )
}

/// Parse an ether amount (`"1.5"`) into wei.
pub fn parse_ether(amount: &str) -> Result<U256, UnitsError> {
    parse_units(amount, ETHER_DECIMALS)
}

/// Format wei as an exact ether amount.
pub fn format_ether(wei: U256) -> String {
    format_units(wei, ETHER_DECIMALS)
}

/// Format wei as ether with four fractional digits, for display.
pub fn format_ether_display(wei: U256) -> String {
    format_units_rounded(wei, ETHER_DECIMALS, DISPLAY_DECIMALS)
}

/// Format wei as gwei (gas prices).
pub fn format_gwei(wei: U256) -> String {
    format_units(wei, GWEI_DECIMALS)
}

/// Encode a value as a JSON-RPC quantity (`0x`-prefixed, no leading zeros).
pub fn to_hex_quantity(value: U256) -> String {
    format!("{:#x}", value)
}

/// Decode a JSON-RPC quantity.
pub fn from_hex_quantity(quantity: &str) -> Result<U256, UnitsError> {
    let digits = quantity
        .strip_prefix("0x")
        .or_else(|| quantity.strip_prefix("0X"))
        .ok_or_else(|| UnitsError::Malformed(quantity.to_string()))?;

    if digits.is_empty() {
        return Err(UnitsError::Empty);
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(UnitsError::Malformed(quantity.to_string()));
    }

    let significant = digits.trim_start_matches('0');
    if significant.len() > 64 {
        return Err(UnitsError::Overflow);
    }
    if significant.is_empty() {
        return Ok(U256::zero());
    }

    U256::from_str_radix(significant, 16).map_err(|_| UnitsError::Malformed(quantity.to_string()))
}
