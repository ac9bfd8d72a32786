//! Signed-position accounting primitives.
//!
//! Pure and deterministic, no I/O. All monetary values and token quantities
//! are fixed-point integers to keep the replay bit-identical across runs.
//!
//! # Invariants
//!
//! 1. A trade that crosses zero is two phases: close-to-zero at the tracked
//!    average, then open in the opposite direction at the trade price.
//! 2. Closing a long of average `a` at price `p` realizes `(p - a) * qty`;
//!    closing a short of average `s` at `p` realizes `(s - p) * qty`.
//! 3. For any finite buy/sell sequence,
//!    `realized + amount * mark - total_cost == sum(cash flows) + amount * mark`
//!    within fixed-point rounding of the proportional closes.

pub mod position;

pub use position::{LedgerPosition, Lineage, SellFill};

/// Fixed-point amount with 6 decimal places (USDC and share quantities).
pub type Amount = i128;

/// Conversion factor: 1 USDC = 1_000_000 units.
pub const AMOUNT_SCALE: i128 = 1_000_000;

/// Convert f64 to fixed-point Amount.
#[inline]
pub fn to_amount(value: f64) -> Amount {
    (value * AMOUNT_SCALE as f64).round() as Amount
}

/// Convert fixed-point Amount to f64.
#[inline]
pub fn from_amount(amount: Amount) -> f64 {
    amount as f64 / AMOUNT_SCALE as f64
}

/// Multiply a quantity by a price, both at `AMOUNT_SCALE`, rounding half
/// away from zero.
#[inline]
pub fn mul_scaled(qty: Amount, price: Amount) -> Amount {
    let prod = qty * price;
    if prod >= 0 {
        (prod + AMOUNT_SCALE / 2) / AMOUNT_SCALE
    } else {
        (prod - AMOUNT_SCALE / 2) / AMOUNT_SCALE
    }
}
