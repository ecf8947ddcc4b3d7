//! # Pricing Engine
//!
//! Pure function from a cart (plus optional total-level discount and loyalty
//! redemption) to an exactly-priced result. No I/O, no clocks: identical
//! input always yields identical output.
//!
//! ## Pipeline
//! ```text
//! lines ──► subtotal = Σ unit_price × qty
//!   │
//!   ├─► item discounts reduce each line independently
//!   │
//!   ├─► total-level discount distributed pro rata across lines
//!   │   by post-item-discount value (largest remainder - exact)
//!   │
//!   ├─► loyalty redemption capped by request, balance and remaining total
//!   │
//!   └─► grand_total = subtotal − item − total − loyalty   (rejected if < 0)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, ValidationError};
use crate::loyalty::CENTS_PER_POINT;
use crate::money::Money;
use crate::types::{CartLine, Discount, SaleItem};

// =============================================================================
// Request / Result Types
// =============================================================================

/// A loyalty redemption request attached to a checkout.
///
/// `requested_points` must be a non-negative integer; the engine caps it at
/// the customer's balance and at what the remaining total can absorb, so a
/// stale balance shrinks the discount instead of failing the sale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub requested_points: i64,
    /// Customer balance as known at pricing time; re-validated at commit.
    pub customer_points: i64,
}

/// Everything the engine needs to price one checkout.
#[derive(Debug, Clone)]
pub struct PricingRequest {
    pub lines: Vec<CartLine>,
    pub total_discount: Option<Discount>,
    pub redemption: Option<RedemptionRequest>,
}

/// The priced outcome: per-line breakdown plus cart-level totals.
///
/// Invariants (enforced, and asserted by tests):
/// - `Σ items[i].allocated_discount == total_discount` exactly
/// - no discount exceeds the value it applies to
/// - `grand_total >= 0` (negative outcomes are rejected, not clamped)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricedCart {
    pub items: Vec<SaleItem>,
    pub subtotal: Money,
    pub item_discount_total: Money,
    pub total_discount: Money,
    pub loyalty_discount: Money,
    pub loyalty_points_redeemed: i64,
    pub grand_total: Money,
}

// =============================================================================
// Engine
// =============================================================================

/// Prices a cart. See the module docs for the pipeline.
pub fn price_cart(request: &PricingRequest) -> CoreResult<PricedCart> {
    if request.lines.is_empty() {
        return Err(ValidationError::Required { field: "lines" }.into());
    }

    // Pass 1: line totals and item-level discounts.
    let mut items: Vec<SaleItem> = Vec::with_capacity(request.lines.len());
    let mut subtotal = Money::zero();
    let mut item_discount_total = Money::zero();

    for line in &request.lines {
        if line.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity",
                value: line.quantity,
            }
            .into());
        }
        if line.unit_price.is_negative() {
            return Err(ValidationError::MustBePositive {
                field: "unit_price",
                value: line.unit_price.cents(),
            }
            .into());
        }

        let line_total = line.unit_price.multiply_quantity(line.quantity);
        let item_discount = match &line.line_discount {
            Some(d) => resolve_discount(d, line_total)?,
            None => Money::zero(),
        };

        subtotal += line_total;
        item_discount_total += item_discount;

        items.push(SaleItem {
            product_id: line.product_id.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
            line_total,
            item_discount,
            allocated_discount: Money::zero(),
        });
    }

    // Pass 2: total-level discount, distributed pro rata by each line's
    // post-item-discount value so the allocated shares sum exactly.
    let discounted_subtotal = subtotal - item_discount_total;
    let total_discount = match &request.total_discount {
        Some(d) => {
            let amount = match d {
                Discount::Fixed { amount } => {
                    if amount.is_negative() {
                        return Err(ValidationError::MustBePositive {
                            field: "total_discount",
                            value: amount.cents(),
                        }
                        .into());
                    }
                    *amount
                }
                // Percentage of the subtotal, per the discount contract.
                Discount::Percentage { bps } => {
                    if *bps > 10_000 {
                        return Err(ValidationError::InvalidPercentage { bps: *bps }.into());
                    }
                    subtotal.percentage(*bps)
                }
            };

            if amount > discounted_subtotal {
                return Err(ValidationError::NegativeTotal {
                    discounts: item_discount_total + amount,
                    cart_value: subtotal,
                }
                .into());
            }

            let weights: Vec<i64> = items
                .iter()
                .map(|item| (item.line_total - item.item_discount).cents())
                .collect();
            let shares = amount.allocate(&weights);
            for (item, share) in items.iter_mut().zip(shares) {
                item.allocated_discount = share;
            }

            amount
        }
        None => Money::zero(),
    };

    // Pass 3: loyalty redemption against what is left.
    let remaining = discounted_subtotal - total_discount;
    let (loyalty_discount, points_redeemed) = match &request.redemption {
        Some(redemption) => {
            if redemption.requested_points < 0 {
                return Err(ValidationError::NegativePoints {
                    points: redemption.requested_points,
                }
                .into());
            }
            let cap_for_cart = remaining.cents() / CENTS_PER_POINT;
            let points = redemption
                .requested_points
                .min(redemption.customer_points.max(0))
                .min(cap_for_cart);
            (Money::from_cents(points * CENTS_PER_POINT), points)
        }
        None => (Money::zero(), 0),
    };

    let grand_total = remaining - loyalty_discount;
    debug_assert!(!grand_total.is_negative());

    Ok(PricedCart {
        items,
        subtotal,
        item_discount_total,
        total_discount,
        loyalty_discount,
        loyalty_points_redeemed: points_redeemed,
        grand_total,
    })
}

/// Resolves an item-level discount, rejecting anything that would push the
/// line negative.
fn resolve_discount(discount: &Discount, line_total: Money) -> CoreResult<Money> {
    let amount = match discount {
        Discount::Fixed { amount } => {
            if amount.is_negative() {
                return Err(ValidationError::MustBePositive {
                    field: "line_discount",
                    value: amount.cents(),
                }
                .into());
            }
            *amount
        }
        Discount::Percentage { bps } => {
            if *bps > 10_000 {
                return Err(ValidationError::InvalidPercentage { bps: *bps }.into());
            }
            line_total.percentage(*bps)
        }
    };

    if amount > line_total {
        return Err(ValidationError::DiscountExceedsValue {
            discount: amount,
            applied_to: line_total,
        }
        .into());
    }

    Ok(amount)
}

// =============================================================================
// Unit Tests
// =============================================================================
