//! Fixed-point amount handling and feed-cursor ordering.
//!
//! Amounts travel as integer minor units (six decimals, matching the
//! settlement token). Conversion truncates toward zero so a claim can never
//! move more than the sender authorized. Feed message ids are decimal
//! strings that may exceed the signed 64-bit range, so the watermark is
//! ordered by digit-string magnitude rather than native integers.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Decimal places of the settlement token (USDC).
pub const MINOR_UNIT_SCALE: u32 = 6;

/// Convert a decimal token amount to minor units, truncating toward zero.
///
/// Returns `None` for non-positive amounts or values that overflow i64.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    if amount <= Decimal::ZERO {
        return None;
    }
    let truncated = amount.trunc_with_scale(MINOR_UNIT_SCALE);
    let shifted = truncated * Decimal::from(10i64.pow(MINOR_UNIT_SCALE));
    let minor = shifted.to_i64()?;
    (minor > 0).then_some(minor)
}

/// Render minor units back as a display amount string (e.g. `3000000` → `"3.000000"`).
pub fn display_amount(minor: i64) -> String {
    let d = Decimal::new(minor, MINOR_UNIT_SCALE);
    d.to_string()
}

/// Compare two feed message ids by numeric magnitude without a width limit.
///
/// Ids are non-negative decimal strings; leading zeros are ignored. Anything
/// non-numeric sorts before all numeric ids (so a malformed id can never
/// advance the watermark past real ones).
pub fn cursor_cmp(a: &str, b: &str) -> Ordering {
    let a = a.trim().trim_start_matches('0');
    let b = b.trim().trim_start_matches('0');
    let a_num = !a.is_empty() && a.bytes().all(|c| c.is_ascii_digit());
    let b_num = !b.is_empty() && b.bytes().all(|c| c.is_ascii_digit());
    match (a_num, b_num) {
        (false, false) => Ordering::Equal,
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

/// The greater of an optional current watermark and a newly observed id.
pub fn cursor_max(current: Option<&str>, observed: &str) -> String {
    match current {
        Some(cur) if cursor_cmp(cur, observed) != Ordering::Less => cur.to_string(),
        _ => observed.to_string(),
    }
}
