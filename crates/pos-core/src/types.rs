//! # Domain Types
//!
//! Core domain types shared across the workspace.
//!
//! ## Identity Pattern
//! A sale carries two identifiers:
//! - `local_id`: client-generated UUID v4, minted at the terminal. This is
//!   the idempotency key for everything downstream (queue dedupe, the
//!   backend-of-record accept endpoint, fiscal document linkage).
//! - `number`: sequential human-readable sale number, per terminal.
//!
//! The fiscal sequence number is a third, legally mandated counter owned by
//! [`crate::fiscal`], never derived from either of these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Payment Method
// =============================================================================

/// Closed set of payment methods, validated at the pricing boundary.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash. The only method that affects drawer reconciliation.
    Cash,
    /// Debit card on an external terminal.
    Debit,
    /// Credit card on an external terminal.
    Credit,
    /// Instant payment via PIX charge (QR code).
    Pix,
}

/// One leg of a (possibly split) tender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLeg {
    pub method: PaymentMethod,
    pub amount: Money,
}

// =============================================================================
// Discounts
// =============================================================================

/// A discount request, either fixed centavos or a percentage in basis points.
///
/// Attached to a cart line (item-level) or to the whole cart (total-level,
/// which the pricing engine distributes across lines pro rata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discount {
    Fixed { amount: Money },
    Percentage { bps: u32 },
}

impl Discount {
    /// Resolves the discount against the value it applies to.
    pub fn amount_against(&self, applied_to: Money) -> Money {
        match self {
            Discount::Fixed { amount } => *amount,
            Discount::Percentage { bps } => applied_to.percentage(*bps),
        }
    }
}

// =============================================================================
// Cart
// =============================================================================

/// A line in the in-progress cart. Owned exclusively by the sale being
/// built; converted to [`SaleItem`] on finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub unit_price: Money,
    pub quantity: i64,
    pub line_discount: Option<Discount>,
}

// =============================================================================
// Sale
// =============================================================================

/// The status of a sale as it moves through the offline-first pipeline.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Being built at the terminal.
    #[default]
    Draft,
    /// Priced and paid; immutable except for status transitions.
    Finalized,
    /// Appended to the submission queue, awaiting the backend-of-record.
    Queued,
    /// A submission attempt is in flight.
    Syncing,
    /// Accepted by the backend-of-record.
    Synced,
    /// Retry budget exhausted; requires operator or admin intervention.
    SyncFailed,
}

/// A line item frozen at finalize time (snapshot pattern: later product
/// edits never change what was sold).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleItem {
    pub product_id: String,
    /// Unit price at time of sale (frozen).
    pub unit_price: Money,
    pub quantity: i64,
    /// unit_price × quantity, before discounts.
    pub line_total: Money,
    /// Item-level discount resolved to centavos.
    pub item_discount: Money,
    /// This line's exact share of the cart-level discount.
    pub allocated_discount: Money,
}

impl SaleItem {
    /// Line value after both discount layers.
    pub fn net_total(&self) -> Money {
        self.line_total - self.item_discount - self.allocated_discount
    }
}

/// A finalized (or in-flight) sale.
///
/// Immutable once `Finalized` except for `status`; destroyed only by
/// archival, never by the sync path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    /// Client-generated UUID v4 - the idempotency key.
    pub local_id: String,
    /// Sequential sale number at this terminal.
    pub number: i64,
    pub customer_id: Option<String>,
    pub shift_id: String,
    pub items: Vec<SaleItem>,
    pub subtotal: Money,
    pub item_discount_total: Money,
    pub total_discount: Money,
    pub loyalty_discount: Money,
    /// Points debited for `loyalty_discount` (0 when no redemption).
    pub loyalty_points_redeemed: i64,
    pub grand_total: Money,
    pub payments: Vec<PaymentLeg>,
    pub status: SaleStatus,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Sum paid with a given method (a sale may split across methods).
    pub fn paid_with(&self, method: PaymentMethod) -> Money {
        self.payments
            .iter()
            .filter(|leg| leg.method == method)
            .map(|leg| leg.amount)
            .sum()
    }
}

// =============================================================================
// Submission Queue Entry
// =============================================================================

/// A durable queue entry for one unsent sale. Exactly one entry exists per
/// sale with status in {Queued, Syncing, SyncFailed}; removed on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The sale's `local_id` - also the dedupe key.
    pub local_id: String,
    /// Number of submission attempts so far.
    pub attempts: i64,
    /// Earliest time the next attempt may run (backoff schedule).
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Last failure, for diagnostics and the manual-intervention screen.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discount_resolution() {
        let applied_to = Money::from_cents(10000);
        let fixed = Discount::Fixed {
            amount: Money::from_cents(1500),
        };
        let pct = Discount::Percentage { bps: 1000 };

        assert_eq!(fixed.amount_against(applied_to).cents(), 1500);
        assert_eq!(pct.amount_against(applied_to).cents(), 1000);
    }

    #[test]
    fn test_paid_with_sums_split_tender() {
        let sale = Sale {
            local_id: "00000000-0000-0000-0000-000000000001".into(),
            number: 1,
            customer_id: None,
            shift_id: "shift-1".into(),
            items: vec![],
            subtotal: Money::from_cents(3000),
            item_discount_total: Money::zero(),
            total_discount: Money::zero(),
            loyalty_discount: Money::zero(),
            loyalty_points_redeemed: 0,
            grand_total: Money::from_cents(3000),
            payments: vec![
                PaymentLeg {
                    method: PaymentMethod::Cash,
                    amount: Money::from_cents(1000),
                },
                PaymentLeg {
                    method: PaymentMethod::Pix,
                    amount: Money::from_cents(1500),
                },
                PaymentLeg {
                    method: PaymentMethod::Cash,
                    amount: Money::from_cents(500),
                },
            ],
            status: SaleStatus::Finalized,
            created_at: Utc::now(),
            finalized_at: Some(Utc::now()),
        };

        assert_eq!(sale.paid_with(PaymentMethod::Cash).cents(), 1500);
        assert_eq!(sale.paid_with(PaymentMethod::Pix).cents(), 1500);
        assert_eq!(sale.paid_with(PaymentMethod::Debit).cents(), 0);
    }

    #[test]
    fn test_sale_status_default_is_draft() {
        assert_eq!(SaleStatus::default(), SaleStatus::Draft);
    }
}
