//! Fixed-point price type.
//!
//! # Motivation
//!
//! Persisted instrument prices use a 1e-8 fixed-point representation stored
//! as `i64`. Storing floats directly makes change detection unstable (two
//! fetches of "the same" price can differ in the last ulp), so every price
//! crossing into storage is rounded once, here.
//!
//! `ScaledPrice` wraps the raw `i64` so the type system prevents:
//! - Implicit construction from raw `i64` (no `From<i64>` impl).
//! - Construction of a non-positive persisted price.
//!
//! # Scale
//!
//! 1.00 (in the instrument's currency) = `ScaledPrice(100_000_000)`.

use std::fmt;

/// Price scale: 1e-8.
pub const PRICE_SCALE: i64 = 100_000_000;

/// Round a float price to the 1e-8 grid.
///
/// Returns `None` for NaN / infinite input or when the scaled value does not
/// fit in `i64`. Zero and negative results are returned as-is; rejecting them
/// is the caller's decision (see [`ScaledPrice::new_positive`]).
pub fn scale_price(price: f64) -> Option<i64> {
    if !price.is_finite() {
        return None;
    }
    let scaled = (price * PRICE_SCALE as f64).round();
    if scaled >= i64::MAX as f64 || scaled <= i64::MIN as f64 {
        return None;
    }
    Some(scaled as i64)
}

/// Error returned when a raw value cannot be a persisted price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonPositivePrice(pub i64);

impl fmt::Display for NonPositivePrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scaled price must be > 0, got {}", self.0)
    }
}

impl std::error::Error for NonPositivePrice {}

/// A strictly positive price at 1e-8 scale.
///
/// # Construction
///
/// Use [`ScaledPrice::new_positive`] for raw integers and
/// [`ScaledPrice::from_f64`] for provider prices. There is intentionally no
/// `From<i64>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScaledPrice(i64);

impl ScaledPrice {
    /// Construct from a raw scaled integer; rejects `raw <= 0`.
    #[inline]
    pub const fn new_positive(raw: i64) -> Result<Self, NonPositivePrice> {
        if raw <= 0 {
            return Err(NonPositivePrice(raw));
        }
        Ok(ScaledPrice(raw))
    }

    /// Round a float price and validate positivity in one step.
    ///
    /// Non-finite input maps to `NonPositivePrice(0)`.
    pub fn from_f64(price: f64) -> Result<Self, NonPositivePrice> {
        match scale_price(price) {
            Some(raw) => Self::new_positive(raw),
            None => Err(NonPositivePrice(0)),
        }
    }

    /// Extract the underlying raw `i64`.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Convert back to a float for valuation arithmetic.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / PRICE_SCALE as f64
    }

    /// Value of `quantity` units at this price.
    #[inline]
    pub fn value_of(self, quantity: f64) -> f64 {
        self.to_f64() * quantity
    }
}

impl fmt::Display for ScaledPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / PRICE_SCALE;
        let frac = self.0 % PRICE_SCALE;
        write!(f, "{whole}.{frac:08}")
    }
}
