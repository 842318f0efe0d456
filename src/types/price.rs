//! Fixed-point money utilities.
//!
//! ## Overview
//!
//! Prices, budgets, revenues and trade costs are stored as `u64` scaled by
//! 10^8. Quantities are whole units and are never scaled.
//!
//! ## Why Fixed-Point?
//!
//! A buyer's `spent + budget` must equal the starting budget after every
//! commit. With integer money that holds exactly, and two runs on different
//! machines produce bit-identical trade logs.
//!
//! ## Examples
//!
//! ```
//! use flower_exchange::types::price::{to_fixed, from_fixed_trimmed, cost, affordable_units};
//!
//! let ask = to_fixed("2.5").unwrap();
//! assert_eq!(cost(4, ask), Some(to_fixed("10").unwrap()));
//! assert_eq!(affordable_units(to_fixed("9.99").unwrap(), ask), 3);
//! assert_eq!(from_fixed_trimmed(ask), "2.5");
//! ```

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Scaling factor for fixed-point arithmetic: 10^8
pub const SCALE: u64 = 100_000_000;

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert a decimal string to fixed-point u64
///
/// Returns `None` for negative values, unparsable input, or overflow.
///
/// ```
/// use flower_exchange::types::price::to_fixed;
///
/// assert_eq!(to_fixed("1.0"), Some(100_000_000));
/// assert_eq!(to_fixed("0.2"), Some(20_000_000));
/// assert_eq!(to_fixed("-1"), None);
/// ```
pub fn to_fixed(s: &str) -> Option<u64> {
    let decimal = Decimal::from_str(s).ok()?;
    decimal_to_fixed(decimal)
}

/// Convert a float coming from configuration or scenario files.
///
/// The float is first turned into its shortest decimal form, so `4.5`
/// becomes exactly `450_000_000` rather than a binary approximation.
pub fn from_f64(value: f64) -> Option<u64> {
    if !value.is_finite() {
        return None;
    }
    let decimal = Decimal::from_f64(value)?;
    decimal_to_fixed(decimal)
}

/// Convert a Decimal to fixed-point u64 (rounded to 8 places)
pub fn decimal_to_fixed(d: Decimal) -> Option<u64> {
    if d.is_sign_negative() && !d.is_zero() {
        return None;
    }

    let scaled = d.checked_mul(Decimal::from(SCALE))?;
    scaled.round_dp(0).to_u64()
}

/// Convert fixed-point u64 to a Decimal
pub fn fixed_to_decimal(value: u64) -> Decimal {
    Decimal::from(value) / Decimal::from(SCALE)
}

/// Convert fixed-point u64 to a string with trailing zeros trimmed
///
/// ```
/// use flower_exchange::types::price::from_fixed_trimmed;
///
/// assert_eq!(from_fixed_trimmed(100_000_000), "1");
/// assert_eq!(from_fixed_trimmed(450_000_000), "4.5");
/// ```
pub fn from_fixed_trimmed(value: u64) -> String {
    format!("{}", fixed_to_decimal(value).normalize())
}

// ============================================================================
// Trade Arithmetic
// ============================================================================

/// Total cost of `quantity` whole units at `unit_price`.
///
/// Exact: a fixed-point price times an unscaled count stays at scale 10^8.
/// `None` on overflow.
#[inline]
pub fn cost(quantity: u64, unit_price: u64) -> Option<u64> {
    quantity.checked_mul(unit_price)
}

/// Checked sum of money or unit amounts. `None` on overflow.
///
/// ```
/// use flower_exchange::types::price::total;
///
/// assert_eq!(total([1, 2, 3]), Some(6));
/// assert_eq!(total([u64::MAX, 1]), None);
/// ```
pub fn total(amounts: impl IntoIterator<Item = u64>) -> Option<u64> {
    amounts.into_iter().try_fold(0u64, u64::checked_add)
}

/// How many whole units `budget` buys at `unit_price` (floor division).
///
/// A zero price makes any quantity affordable; the caller's demand and
/// stock caps bound it.
#[inline]
pub fn affordable_units(budget: u64, unit_price: u64) -> u64 {
    if unit_price == 0 {
        u64::MAX
    } else {
        budget / unit_price
    }
}

/// One decay step: `max(floor, price - step)`.
///
/// A price already at or below the floor is left untouched, so decay never
/// raises a price.
#[inline]
pub fn decay(price: u64, step: u64, floor: u64) -> u64 {
    if price <= floor {
        return price;
    }
    price.saturating_sub(step).max(floor)
}

/// `part / whole` as a percentage; 0.0 when `whole` is zero.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
