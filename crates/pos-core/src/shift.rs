//! # Cash Shift
//!
//! Cash-drawer shift lifecycle: `Closed(initial) → Open → Closed(terminal)`.
//!
//! One operator is accountable for the drawer between open and close.
//! While open, the shift accumulates per-payment-method totals from posted
//! sales and an append-only list of cash movements (supplies and
//! withdrawals). Close computes the reconciliation once; the result is
//! immutable afterwards.
//!
//! ```text
//! expected_cash = opening_float + payment_totals[Cash]
//!               + Σ supplies − Σ withdrawals
//! difference    = counted_cash − expected_cash
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreResult, ShiftStateError, ValidationError};
use crate::money::Money;
use crate::types::{PaymentMethod, Sale};

// =============================================================================
// Types
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Open,
    Closed,
}

/// Direction of a manual cash movement.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Cash added to the drawer (suprimento).
    Supply,
    /// Cash removed from the drawer (sangria).
    Withdrawal,
}

/// One cash movement. Append-only: never edited or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftMovement {
    pub kind: MovementKind,
    pub amount: Money,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Reconciliation produced exactly once, at close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftClose {
    pub counted_cash: Money,
    pub expected_cash: Money,
    /// counted − expected; negative means the drawer is short.
    pub difference: Money,
    pub closed_at: DateTime<Utc>,
    /// Who performed the close. Differs from `operator_id` on an
    /// administrative force-close, which is the audit trail for it.
    pub closed_by: String,
}

/// A cash-drawer shift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashShift {
    pub id: String,
    /// Sequential shift number.
    pub number: i64,
    pub operator_id: String,
    pub status: ShiftStatus,
    pub opening_float: Money,
    pub movements: Vec<ShiftMovement>,
    pub payment_totals: BTreeMap<PaymentMethod, Money>,
    pub opened_at: DateTime<Utc>,
    pub closing: Option<ShiftClose>,
}

// =============================================================================
// Lifecycle
// =============================================================================

impl CashShift {
    /// Opens a shift. The one-open-shift-per-operator rule is enforced by
    /// the repository (partial unique index); this constructor only shapes
    /// the entity.
    pub fn open(
        id: impl Into<String>,
        number: i64,
        operator_id: impl Into<String>,
        opening_float: Money,
        opened_at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        if opening_float.is_negative() {
            return Err(ValidationError::MustBePositive {
                field: "opening_float",
                value: opening_float.cents(),
            }
            .into());
        }

        Ok(CashShift {
            id: id.into(),
            number,
            operator_id: operator_id.into(),
            status: ShiftStatus::Open,
            opening_float,
            movements: Vec::new(),
            payment_totals: BTreeMap::new(),
            opened_at,
            closing: None,
        })
    }

    fn ensure_open(&self) -> Result<(), ShiftStateError> {
        match self.status {
            ShiftStatus::Open => Ok(()),
            ShiftStatus::Closed => Err(ShiftStateError::AlreadyClosed {
                shift_id: self.id.clone(),
            }),
        }
    }

    /// Accumulates a finalized sale's payment legs into the per-method
    /// totals. A split tender contributes each leg under its own method.
    pub fn post_sale(&mut self, sale: &Sale) -> CoreResult<()> {
        self.ensure_open()?;

        for leg in &sale.payments {
            let total = self
                .payment_totals
                .entry(leg.method)
                .or_insert_with(Money::zero);
            *total += leg.amount;
        }

        Ok(())
    }

    /// Appends a cash movement. Amount must be strictly positive.
    pub fn record_movement(
        &mut self,
        kind: MovementKind,
        amount: Money,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.ensure_open()?;

        if !amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "movement_amount",
                value: amount.cents(),
            }
            .into());
        }

        self.movements.push(ShiftMovement {
            kind,
            amount,
            reason: reason.into(),
            at,
        });

        Ok(())
    }

    /// Cash the drawer should contain right now.
    pub fn expected_cash(&self) -> Money {
        let cash_sales = self
            .payment_totals
            .get(&PaymentMethod::Cash)
            .copied()
            .unwrap_or_default();

        let movements: Money = self
            .movements
            .iter()
            .map(|m| match m.kind {
                MovementKind::Supply => m.amount,
                MovementKind::Withdrawal => Money::zero() - m.amount,
            })
            .sum();

        self.opening_float + cash_sales + movements
    }

    /// Closes the shift and computes the reconciliation. Terminal: a second
    /// close fails and leaves the stored reconciliation untouched.
    ///
    /// `closed_by` is the acting operator; pass the shift owner's id for a
    /// normal close, or the administrator's id for a force-close.
    pub fn close(
        &mut self,
        counted_cash: Money,
        closed_by: impl Into<String>,
        closed_at: DateTime<Utc>,
    ) -> CoreResult<&ShiftClose> {
        self.ensure_open()?;

        let expected_cash = self.expected_cash();
        let close = ShiftClose {
            counted_cash,
            expected_cash,
            difference: counted_cash - expected_cash,
            closed_at,
            closed_by: closed_by.into(),
        };
        self.status = ShiftStatus::Closed;

        Ok(&*self.closing.insert(close))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::{PaymentLeg, SaleStatus};

    fn cash_sale(amount: i64) -> Sale {
        Sale {
            local_id: uuid::Uuid::new_v4().to_string(),
            number: 1,
            customer_id: None,
            shift_id: "shift-1".into(),
            items: vec![],
            subtotal: Money::from_cents(amount),
            item_discount_total: Money::zero(),
            total_discount: Money::zero(),
            loyalty_discount: Money::zero(),
            loyalty_points_redeemed: 0,
            grand_total: Money::from_cents(amount),
            payments: vec![PaymentLeg {
                method: PaymentMethod::Cash,
                amount: Money::from_cents(amount),
            }],
            status: SaleStatus::Finalized,
            created_at: Utc::now(),
            finalized_at: Some(Utc::now()),
        }
    }

    fn open_shift() -> CashShift {
        CashShift::open("shift-1", 1, "op-1", Money::from_cents(10_000), Utc::now()).unwrap()
    }

    #[test]
    fn test_reconciliation_example() {
        // Float 100.00, cash sales 250.00, supply 50.00, withdrawal 30.00
        // → expected 370.00; counted 365.00 → difference -5.00.
        let mut shift = open_shift();
        shift.post_sale(&cash_sale(25_000)).unwrap();
        shift
            .record_movement(MovementKind::Supply, Money::from_cents(5_000), "troco", Utc::now())
            .unwrap();
        shift
            .record_movement(
                MovementKind::Withdrawal,
                Money::from_cents(3_000),
                "sangria",
                Utc::now(),
            )
            .unwrap();

        assert_eq!(shift.expected_cash().cents(), 37_000);

        let close = shift
            .close(Money::from_cents(36_500), "op-1", Utc::now())
            .unwrap();
        assert_eq!(close.expected_cash.cents(), 37_000);
        assert_eq!(close.difference.cents(), -500);
        assert_eq!(shift.status, ShiftStatus::Closed);
    }

    #[test]
    fn test_double_close_fails_and_preserves_reconciliation() {
        let mut shift = open_shift();
        shift
            .close(Money::from_cents(10_000), "op-1", Utc::now())
            .unwrap();
        let first = shift.closing.clone().unwrap();

        let err = shift
            .close(Money::from_cents(99_999), "op-1", Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ShiftState(ShiftStateError::AlreadyClosed { .. })
        ));
        assert_eq!(shift.closing.unwrap(), first);
    }

    #[test]
    fn test_post_to_closed_shift_fails() {
        let mut shift = open_shift();
        shift.close(Money::zero(), "op-1", Utc::now()).unwrap();

        assert!(shift.post_sale(&cash_sale(100)).is_err());
        assert!(shift
            .record_movement(MovementKind::Supply, Money::from_cents(100), "x", Utc::now())
            .is_err());
    }

    #[test]
    fn test_non_cash_legs_do_not_affect_drawer() {
        let mut shift = open_shift();
        let mut sale = cash_sale(1_000);
        sale.payments = vec![
            PaymentLeg {
                method: PaymentMethod::Cash,
                amount: Money::from_cents(400),
            },
            PaymentLeg {
                method: PaymentMethod::Pix,
                amount: Money::from_cents(600),
            },
        ];
        shift.post_sale(&sale).unwrap();

        assert_eq!(shift.expected_cash().cents(), 10_400);
        assert_eq!(
            shift.payment_totals[&PaymentMethod::Pix].cents(),
            600
        );
    }

    #[test]
    fn test_movement_amount_must_be_positive() {
        let mut shift = open_shift();
        assert!(shift
            .record_movement(MovementKind::Supply, Money::zero(), "x", Utc::now())
            .is_err());
        assert!(shift
            .record_movement(
                MovementKind::Withdrawal,
                Money::from_cents(-100),
                "x",
                Utc::now()
            )
            .is_err());
        assert!(shift.movements.is_empty());
    }

    #[test]
    fn test_force_close_records_acting_operator() {
        let mut shift = open_shift();
        let close = shift
            .close(Money::from_cents(10_000), "admin-9", Utc::now())
            .unwrap();
        assert_eq!(close.closed_by, "admin-9");
        assert_eq!(shift.operator_id, "op-1");
    }
}
