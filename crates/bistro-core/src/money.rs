//! # Money Module
//!
//! Provides the `Money` type for every amount on an order or refund.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  A table of four splits a 100.00 bill:                                  │
//! │                                                                         │
//! │    floats:   25.0 + 25.0 + 25.0 + 25.000000000000004  ❌               │
//! │    cents:    2500 + 2500 + 2500 + 2500 = 10000        ✅               │
//! │                                                                         │
//! │  Paid/due/refunded comparisons must be exact, so every amount is an    │
//! │  i64 count of minor units and every rate is basis points.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use bistro_core::money::Money;
//!
//! let price = Money::from_cents(2450);
//! let line = price * 2;
//! assert_eq!(line, Money::from_major_minor(49, 0));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit.
///
/// ## Where Money Flows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  Product.price ──► OrderItem.unit_price (+ selection deltas) × qty     │
/// │                          │                                              │
/// │                          ▼                                              │
/// │  OrderAmount.subtotal − discount + tax + fee = total                   │
/// │                          │                                              │
/// │                          ▼                                              │
/// │  OrderPayment.amount ──► paid ──► due ──► RefundOrder.amount           │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use bistro_core::money::Money;
    ///
    /// let price = Money::from_cents(2450);
    /// assert_eq!(price.cents(), 2450);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Clamps negative values to zero.
    #[inline]
    pub const fn non_negative(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            *self
        }
    }

    /// Calculates tax at `rate`, rounding half up.
    ///
    /// ## Implementation
    /// Integer math: `(amount * bps + 5000) / 10000`. The +5000 is the
    /// half-unit that makes truncation round to nearest.
    ///
    /// ## Example
    /// ```rust
    /// use bistro_core::money::Money;
    /// use bistro_core::types::TaxRate;
    ///
    /// let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
    /// // 10.00 × 8.25% = 0.825 → 0.83
    /// assert_eq!(tax.cents(), 83);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        self.percentage(rate.bps())
    }

    /// Returns `bps` basis points of this amount, rounding half up.
    ///
    /// ## Example
    /// ```rust
    /// use bistro_core::money::Money;
    ///
    /// // 10% service charge on 49.00
    /// assert_eq!(Money::from_cents(4900).percentage(1000).cents(), 490);
    /// ```
    pub fn percentage(&self, bps: u32) -> Money {
        // i128 keeps large orders from overflowing before the division
        let cents = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money::from_cents(cents as i64)
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use bistro_core::money::Money;
    ///
    /// let line = Money::from_cents(2450).multiply_quantity(2);
    /// assert_eq!(line.cents(), 4900);
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Scales an amount by `part / whole`, rounding half up.
    ///
    /// Used to prorate a line's discount and tax onto a partial refund.
    /// Returns zero when `whole` is zero.
    pub fn prorate(&self, part: i64, whole: i64) -> Money {
        if whole == 0 {
            return Money::zero();
        }
        let scaled = (self.0 as i128 * part as i128 * 2 + whole as i128) / (whole as i128 * 2);
        Money::from_cents(scaled as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering (`49.00`, `-5.50`); currency symbols are a
/// presentation concern of the register.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by i64 (quantities).
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
