//! # Error Types
//!
//! Domain errors for the transaction core.
//!
//! ## Design Principles
//! 1. `thiserror` derive macros, never manual impls
//! 2. Context in messages (shift id, points, amounts)
//! 3. Errors are enum variants, never bare Strings
//! 4. Validation and state errors are raised before any state mutation

use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations raised by the transaction core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input validation failed; nothing was mutated.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Customer balance dropped below the requested redemption between
    /// reservation and commit (e.g. the same customer on two terminals).
    /// Callers must re-price with the reduced/zero redemption.
    #[error("insufficient loyalty points for customer {customer_id}: balance {balance}, requested {requested}")]
    InsufficientPoints {
        customer_id: String,
        balance: i64,
        requested: i64,
    },

    /// Shift lifecycle violation (double-open, double-close, post to closed).
    #[error("shift state error: {0}")]
    ShiftState(#[from] ShiftStateError),

    /// A PIX charge was confirmed after its expiry; a new charge must be
    /// requested, never an extension of the old one.
    #[error("PIX charge {tx_id} expired at {expired_at}")]
    ChargeExpired { tx_id: String, expired_at: String },
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation failures, checked before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: &'static str },

    /// Value must be strictly positive.
    #[error("{field} must be positive, got {value}")]
    MustBePositive { field: &'static str, value: i64 },

    /// Value exceeds the field's maximum length.
    #[error("{field} must be at most {max} chars, got {len}")]
    TooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },

    /// Percentage discount outside 0..=10000 bps.
    #[error("percentage discount must be between 0 and 10000 bps, got {bps}")]
    InvalidPercentage { bps: u32 },

    /// A discount larger than the value it applies to.
    #[error("discount {discount} exceeds the value it applies to ({applied_to})")]
    DiscountExceedsValue { discount: Money, applied_to: Money },

    /// Combined discounts would push the grand total below zero. Rejected
    /// rather than clamped so the condition stays auditable.
    #[error("discounts ({discounts}) exceed cart value ({cart_value}); total would be negative")]
    NegativeTotal { discounts: Money, cart_value: Money },

    /// Loyalty redemption request with a negative point count.
    #[error("redemption points must be a non-negative integer, got {points}")]
    NegativePoints { points: i64 },

    /// Payment legs do not sum to the grand total.
    #[error("payment legs sum to {paid} but the grand total is {expected}")]
    PaymentMismatch { paid: Money, expected: Money },
}

// =============================================================================
// Shift State Error
// =============================================================================

/// Violations of the shift lifecycle: Closed(initial) → Open → Closed(terminal).
#[derive(Debug, Error)]
pub enum ShiftStateError {
    /// The operator already has an open shift.
    #[error("operator {operator_id} already has an open shift (#{shift_number})")]
    AlreadyOpen {
        operator_id: String,
        shift_number: i64,
    },

    /// Close is terminal; the stored reconciliation is immutable.
    #[error("shift {shift_id} is already closed")]
    AlreadyClosed { shift_id: String },

    /// Operation requires an open shift.
    #[error("shift {shift_id} is not open")]
    NotOpen { shift_id: String },
}

/// Convenience alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = CoreError::InsufficientPoints {
            customer_id: "cust-1".into(),
            balance: 40,
            requested: 100,
        };
        assert_eq!(
            err.to_string(),
            "insufficient loyalty points for customer cust-1: balance 40, requested 100"
        );

        let err = ValidationError::PaymentMismatch {
            paid: Money::from_cents(900),
            expected: Money::from_cents(1000),
        };
        assert!(err.to_string().contains("R$ 9,00"));
        assert!(err.to_string().contains("R$ 10,00"));
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::NegativePoints { points: -3 }.into();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_shift_state_converts_to_core_error() {
        let err: CoreError = ShiftStateError::AlreadyClosed {
            shift_id: "shift-1".into(),
        }
        .into();
        assert!(matches!(err, CoreError::ShiftState(_)));
    }
}
