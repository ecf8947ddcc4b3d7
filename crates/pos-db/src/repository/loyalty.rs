//! # Loyalty Repository
//!
//! Durable point balances. Debits are conditional updates guarded on the
//! current balance, so the `points_balance >= 0` invariant holds even when
//! another terminal spent the points between pricing and finalize; a
//! zero-row debit surfaces as [`DbError::PreconditionFailed`] and the
//! caller re-prices.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use pos_core::loyalty::LoyaltyAccount;

/// Repository for loyalty accounts.
#[derive(Debug, Clone)]
pub struct LoyaltyRepository {
    pool: SqlitePool,
}

impl LoyaltyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LoyaltyRepository { pool }
    }

    /// The customer's account, created at zero on first touch.
    pub async fn get_or_create(&self, customer_id: &str) -> DbResult<LoyaltyAccount> {
        sqlx::query(
            "INSERT OR IGNORE INTO loyalty_accounts (customer_id, points_balance) VALUES (?1, 0)",
        )
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        let balance: i64 = sqlx::query_scalar(
            "SELECT points_balance FROM loyalty_accounts WHERE customer_id = ?1",
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(LoyaltyAccount::new(customer_id, balance))
    }

    /// Debits redeemed points. The balance guard in the WHERE clause is the
    /// last line of defense against concurrent spends.
    pub async fn debit(&self, customer_id: &str, points: i64) -> DbResult<i64> {
        debug!(customer_id, points, "Debiting loyalty points");

        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE loyalty_accounts
            SET points_balance = points_balance - ?1
            WHERE customer_id = ?2 AND points_balance >= ?1
            RETURNING points_balance
            "#,
        )
        .bind(points)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        balance.ok_or_else(|| {
            DbError::PreconditionFailed(format!(
                "insufficient points for customer {customer_id}: requested {points}"
            ))
        })
    }

    /// Credits accrued points, creating the account if needed.
    pub async fn credit(&self, customer_id: &str, points: i64) -> DbResult<i64> {
        debug!(customer_id, points, "Crediting loyalty points");

        let balance: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO loyalty_accounts (customer_id, points_balance)
            VALUES (?1, ?2)
            ON CONFLICT(customer_id)
            DO UPDATE SET points_balance = points_balance + excluded.points_balance
            RETURNING points_balance
            "#,
        )
        .bind(customer_id)
        .bind(points)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
