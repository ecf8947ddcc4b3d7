//! # Loyalty Ledger (pure part)
//!
//! Point balance rules: redemption reservation/commit and accrual math.
//! The durable balance lives in pos-db; this module owns the arithmetic and
//! the `points_balance >= 0` invariant.
//!
//! Rate: 10 points = R$ 1,00, so 1 point = 10 centavos.
//!
//! Accrual is 1 point per whole currency unit of the grand total and is
//! credited only after the backend-of-record confirms the sale, so points
//! are never granted for a sale the fiscal authority later rejects.
//! Redemption debits happen at finalize (the goods leave the store).

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;

/// Points per currency unit for redemption (10 points = R$ 1,00).
pub const POINTS_PER_CURRENCY_UNIT: i64 = 10;

/// Centavo value of a single point (100 / POINTS_PER_CURRENCY_UNIT).
pub const CENTS_PER_POINT: i64 = 100 / POINTS_PER_CURRENCY_UNIT;

/// Currency value of a point count.
pub fn points_value(points: i64) -> Money {
    Money::from_cents(points * CENTS_PER_POINT)
}

/// Points earned for a confirmed sale: 1 point per whole currency unit.
pub fn accrual_for(grand_total: Money) -> i64 {
    if grand_total.is_negative() {
        return 0;
    }
    grand_total.cents() / 100
}

// =============================================================================
// Loyalty Account
// =============================================================================

/// A customer's point balance with reserve/commit/release semantics.
///
/// `reserve` checks the balance at reservation time; `commit` re-validates
/// it, because the same customer may be transacting on two terminals and
/// the balance can shrink between the two calls. On an
/// [`CoreError::InsufficientPoints`] the caller re-prices the sale with the
/// reduced or zero redemption instead of failing the checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyAccount {
    pub customer_id: String,
    pub points_balance: i64,
}

/// A validated-but-uncommitted redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub points: i64,
}

impl LoyaltyAccount {
    pub fn new(customer_id: impl Into<String>, points_balance: i64) -> Self {
        LoyaltyAccount {
            customer_id: customer_id.into(),
            points_balance,
        }
    }

    /// Validates a redemption against the current balance.
    pub fn reserve(&self, points: i64) -> CoreResult<Reservation> {
        if points < 0 {
            return Err(ValidationError::NegativePoints { points }.into());
        }
        if points > self.points_balance {
            return Err(CoreError::InsufficientPoints {
                customer_id: self.customer_id.clone(),
                balance: self.points_balance,
                requested: points,
            });
        }
        Ok(Reservation { points })
    }

    /// Debits a reservation, re-validating the (possibly refreshed) balance.
    pub fn commit(&mut self, reservation: Reservation) -> CoreResult<()> {
        if reservation.points > self.points_balance {
            return Err(CoreError::InsufficientPoints {
                customer_id: self.customer_id.clone(),
                balance: self.points_balance,
                requested: reservation.points,
            });
        }
        self.points_balance -= reservation.points;
        debug_assert!(self.points_balance >= 0);
        Ok(())
    }

    /// Credits accrued points (post-sync reward for a confirmed sale).
    pub fn credit(&mut self, points: i64) -> CoreResult<()> {
        if points < 0 {
            return Err(ValidationError::NegativePoints { points }.into());
        }
        self.points_balance += points;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
