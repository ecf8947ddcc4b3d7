//! # PIX Charge Repository
//!
//! Durable charge state. The expiry sweep is one guarded UPDATE so a
//! charge confirmed between the read and the write is never downgraded.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use pos_core::money::Money;
use pos_core::pix::{ChargeStatus, PaymentConfirmation, PixCharge};

#[derive(Debug, FromRow)]
struct ChargeRow {
    tx_id: String,
    sale_local_id: String,
    amount_cents: i64,
    payload: String,
    status: ChargeStatus,
    confirmation: Option<PaymentConfirmation>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<ChargeRow> for PixCharge {
    fn from(row: ChargeRow) -> Self {
        PixCharge {
            tx_id: row.tx_id,
            sale_local_id: row.sale_local_id,
            amount: Money::from_cents(row.amount_cents),
            payload: row.payload,
            status: row.status,
            confirmation: row.confirmation,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

/// Repository for PIX charges.
#[derive(Debug, Clone)]
pub struct PixChargeRepository {
    pool: SqlitePool,
}

impl PixChargeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PixChargeRepository { pool }
    }

    pub async fn insert(&self, charge: &PixCharge) -> DbResult<()> {
        debug!(tx_id = %charge.tx_id, sale = %charge.sale_local_id, "Storing PIX charge");

        sqlx::query(
            r#"
            INSERT INTO pix_charges (
                tx_id, sale_local_id, amount_cents, payload,
                status, confirmation, created_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&charge.tx_id)
        .bind(&charge.sale_local_id)
        .bind(charge.amount.cents())
        .bind(&charge.payload)
        .bind(charge.status)
        .bind(charge.confirmation)
        .bind(charge.created_at)
        .bind(charge.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, tx_id: &str) -> DbResult<Option<PixCharge>> {
        let row: Option<ChargeRow> = sqlx::query_as("SELECT * FROM pix_charges WHERE tx_id = ?1")
            .bind(tx_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(PixCharge::from))
    }

    /// Persists a status transition decided by the core lifecycle.
    pub async fn set_status(
        &self,
        tx_id: &str,
        status: ChargeStatus,
        confirmation: Option<PaymentConfirmation>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE pix_charges SET status = ?1, confirmation = ?2 WHERE tx_id = ?3",
        )
        .bind(status)
        .bind(confirmation)
        .bind(tx_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PixCharge", tx_id));
        }
        Ok(())
    }

    /// Expires every pending charge past its TTL. Returns how many
    /// transitioned. Paid charges are untouched by the guard.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE pix_charges SET status = 'expired' WHERE status = 'pending' AND expires_at <= ?1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
