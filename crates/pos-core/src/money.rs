//! # Money Module
//!
//! Monetary values as integer centavos (the smallest currency unit).
//!
//! ## Why Integer Money?
//! ```text
//! In floating point:   0.1 + 0.2 = 0.30000000000000004
//! In integer centavos: 10 + 20 = 30
//! ```
//! Splitting R$ 10,00 three ways gives 333 + 333 + 333 = 999 centavos;
//! we KNOW one centavo is left over and hand it out explicitly via
//! [`Money::allocate`] instead of letting rounding drift eat it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in centavos.
///
/// Signed so differences (shift reconciliation) and refunds can be negative.
/// Every monetary value in the system flows through this type; only the UI
/// converts to a display string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from centavos.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in centavos.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Multiplies by a quantity (line total = unit price × quantity).
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Computes a percentage of this amount, given in basis points
    /// (1 bps = 0.01%, so 1000 bps = 10%), rounding half up.
    ///
    /// i128 intermediate prevents overflow on large amounts.
    pub fn percentage(&self, bps: u32) -> Money {
        let part = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money::from_cents(part as i64)
    }

    /// Splits `self` across `weights` pro rata, exactly.
    ///
    /// Uses the largest-remainder method: each share starts at
    /// `floor(total × wᵢ / W)` and the leftover centavos go to the shares
    /// with the largest truncated remainders (ties broken by position).
    ///
    /// Guarantees, for non-negative `self` and weights with a positive sum:
    /// - the returned shares sum to `self.cents()` exactly
    /// - no share is negative
    /// - a zero weight receives a zero share
    ///
    /// Returns an empty vec for empty weights; if all weights are zero the
    /// whole amount lands on the first share (callers validate against this).
    pub fn allocate(&self, weights: &[i64]) -> Vec<Money> {
        if weights.is_empty() {
            return Vec::new();
        }

        let total = self.0 as i128;
        let weight_sum: i128 = weights.iter().map(|w| *w as i128).sum();

        if weight_sum <= 0 {
            let mut shares = vec![Money::zero(); weights.len()];
            shares[0] = *self;
            return shares;
        }

        // Base shares plus remainders for the second pass.
        let mut shares: Vec<i64> = Vec::with_capacity(weights.len());
        let mut remainders: Vec<(usize, i128)> = Vec::with_capacity(weights.len());
        let mut allocated: i128 = 0;

        for (idx, w) in weights.iter().enumerate() {
            let scaled = total * (*w as i128);
            let base = scaled.div_euclid(weight_sum);
            shares.push(base as i64);
            remainders.push((idx, scaled.rem_euclid(weight_sum)));
            allocated += base;
        }

        // Hand out the leftover centavos, largest remainder first.
        let mut leftover = (total - allocated) as i64;
        remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (idx, _) in remainders {
            if leftover == 0 {
                break;
            }
            shares[idx] += 1;
            leftover -= 1;
        }

        shares.into_iter().map(Money::from_cents).collect()
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-friendly display ("R$ 10,99"). UI formatting happens elsewhere.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}R$ {},{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
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

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
