//! # Shift Repository
//!
//! Durable cash-shift state. The one-open-shift-per-operator rule is a
//! partial unique index, so it holds even across processes; the repository
//! translates that violation into a typed error the checkout layer can
//! show to the operator.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{DbError, DbResult};
use pos_core::money::Money;
use pos_core::shift::{CashShift, MovementKind, ShiftClose, ShiftMovement, ShiftStatus};
use pos_core::types::PaymentMethod;

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct ShiftRow {
    id: String,
    number: i64,
    operator_id: String,
    status: ShiftStatus,
    opening_float_cents: i64,
    counted_cash_cents: Option<i64>,
    expected_cash_cents: Option<i64>,
    difference_cents: Option<i64>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<String>,
}

#[derive(Debug, FromRow)]
struct MovementRow {
    kind: MovementKind,
    amount_cents: i64,
    reason: String,
    at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct MethodTotalRow {
    method: PaymentMethod,
    total_cents: i64,
}

impl ShiftRow {
    fn into_shift(
        self,
        movements: Vec<MovementRow>,
        totals: Vec<MethodTotalRow>,
    ) -> CashShift {
        let closing = match (self.counted_cash_cents, self.expected_cash_cents) {
            (Some(counted), Some(expected)) => Some(ShiftClose {
                counted_cash: Money::from_cents(counted),
                expected_cash: Money::from_cents(expected),
                difference: Money::from_cents(self.difference_cents.unwrap_or(counted - expected)),
                closed_at: self.closed_at.unwrap_or(self.opened_at),
                closed_by: self.closed_by.unwrap_or_default(),
            }),
            _ => None,
        };

        let mut payment_totals = BTreeMap::new();
        for t in totals {
            payment_totals.insert(t.method, Money::from_cents(t.total_cents));
        }

        CashShift {
            id: self.id,
            number: self.number,
            operator_id: self.operator_id,
            status: self.status,
            opening_float: Money::from_cents(self.opening_float_cents),
            movements: movements
                .into_iter()
                .map(|m| ShiftMovement {
                    kind: m.kind,
                    amount: Money::from_cents(m.amount_cents),
                    reason: m.reason,
                    at: m.at,
                })
                .collect(),
            payment_totals,
            opened_at: self.opened_at,
            closing,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for shift database operations.
#[derive(Debug, Clone)]
pub struct ShiftRepository {
    pool: SqlitePool,
}

impl ShiftRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShiftRepository { pool }
    }

    /// Allocates the next sequential shift number.
    pub async fn next_shift_number(&self) -> DbResult<i64> {
        let number: i64 = sqlx::query_scalar(
            r#"
            UPDATE terminal_counters
            SET next_value = next_value + 1
            WHERE name = 'shift_number'
            RETURNING next_value - 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(number)
    }

    /// Inserts a freshly opened shift. Fails with a unique violation when
    /// the operator already has an open shift.
    pub async fn insert_open(&self, shift: &CashShift) -> DbResult<()> {
        debug!(id = %shift.id, operator = %shift.operator_id, "Opening shift");

        sqlx::query(
            r#"
            INSERT INTO shifts (id, number, operator_id, status, opening_float_cents, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&shift.id)
        .bind(shift.number)
        .bind(&shift.operator_id)
        .bind(ShiftStatus::Open)
        .bind(shift.opening_float.cents())
        .bind(shift.opened_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The operator's open shift, fully assembled, or `None`.
    pub async fn find_open(&self, operator_id: &str) -> DbResult<Option<CashShift>> {
        let row: Option<ShiftRow> = sqlx::query_as(
            "SELECT * FROM shifts WHERE operator_id = ?1 AND status = 'open'",
        )
        .bind(operator_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    /// Fetches a shift by id.
    pub async fn get(&self, shift_id: &str) -> DbResult<Option<CashShift>> {
        let row: Option<ShiftRow> = sqlx::query_as("SELECT * FROM shifts WHERE id = ?1")
            .bind(shift_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    async fn assemble(&self, row: ShiftRow) -> DbResult<CashShift> {
        let movements: Vec<MovementRow> = sqlx::query_as(
            "SELECT kind, amount_cents, reason, at FROM shift_movements WHERE shift_id = ?1 ORDER BY id",
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        // Per-method totals come from the actual payment rows, never from a
        // denormalized column, so the drawer math always matches the sales.
        let totals: Vec<MethodTotalRow> = sqlx::query_as(
            r#"
            SELECT p.method AS method, SUM(p.amount_cents) AS total_cents
            FROM payments p
            JOIN sales s ON s.local_id = p.sale_local_id
            WHERE s.shift_id = ?1
            GROUP BY p.method
            "#,
        )
        .bind(&row.id)
        .fetch_all(&self.pool)
        .await?;

        Ok(row.into_shift(movements, totals))
    }

    /// Appends a cash movement.
    pub async fn insert_movement(
        &self,
        shift_id: &str,
        movement: &ShiftMovement,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO shift_movements (shift_id, kind, amount_cents, reason, at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(shift_id)
        .bind(movement.kind)
        .bind(movement.amount.cents())
        .bind(&movement.reason)
        .bind(movement.at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persists a close. Guarded on `status = 'open'`: a concurrent close
    /// loses and surfaces as a precondition failure, never a second
    /// reconciliation.
    pub async fn close(&self, shift_id: &str, close: &ShiftClose) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE shifts
            SET status = 'closed',
                counted_cash_cents = ?1,
                expected_cash_cents = ?2,
                difference_cents = ?3,
                closed_at = ?4,
                closed_by = ?5
            WHERE id = ?6 AND status = 'open'
            "#,
        )
        .bind(close.counted_cash.cents())
        .bind(close.expected_cash.cents())
        .bind(close.difference.cents())
        .bind(close.closed_at)
        .bind(&close.closed_by)
        .bind(shift_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::PreconditionFailed(format!(
                "shift {shift_id} is not open"
            )));
        }
        Ok(())
    }

    /// Closed shifts that have not reached the backend-of-record yet (the
    /// sync agent replays these on reconnect), oldest close first.
    pub async fn list_unreported_closed(&self) -> DbResult<Vec<CashShift>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM shifts WHERE status = 'closed' AND reported_at IS NULL ORDER BY closed_at",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut shifts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(shift) = self.get(&id).await? {
                shifts.push(shift);
            }
        }
        Ok(shifts)
    }

    /// Marks a closed shift as reported to the backend-of-record.
    pub async fn mark_reported(&self, shift_id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE shifts SET reported_at = ?1 WHERE id = ?2 AND status = 'closed'",
        )
        .bind(at)
        .bind(shift_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Shift", shift_id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::sale::tests::sample_sale;

    /// Opens a shift for "op-1" and returns its id. Shared by the sale and
    /// queue tests, which need a shift to hang sales off.
    pub(crate) async fn open_test_shift(db: &Database) -> String {
        let number = db.shifts().next_shift_number().await.unwrap();
        let shift = CashShift::open(
            uuid::Uuid::new_v4().to_string(),
            number,
            "op-1",
            Money::from_cents(10_000),
            Utc::now(),
        )
        .unwrap();
        db.shifts().insert_open(&shift).await.unwrap();
        shift.id
    }

    #[tokio::test]
    async fn test_one_open_shift_per_operator() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let _first = open_test_shift(&db).await;

        let shift = CashShift::open("shift-2", 99, "op-1", Money::zero(), Utc::now()).unwrap();
        let err = db.shifts().insert_open(&shift).await.unwrap_err();
        assert!(err.is_unique_violation_on("shifts.operator_id"));

        // A different operator is unaffected.
        let other = CashShift::open("shift-3", 98, "op-2", Money::zero(), Utc::now()).unwrap();
        db.shifts().insert_open(&other).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_open_assembles_totals_and_movements() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shift_id = open_test_shift(&db).await;

        db.sales()
            .insert_finalized(&sample_sale("sale-1", 1, &shift_id))
            .await
            .unwrap();
        db.shifts()
            .insert_movement(
                &shift_id,
                &ShiftMovement {
                    kind: MovementKind::Withdrawal,
                    amount: Money::from_cents(2_000),
                    reason: "sangria".into(),
                    at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let shift = db.shifts().find_open("op-1").await.unwrap().unwrap();
        // sample_sale pays 400 cash + 600 pix.
        assert_eq!(shift.payment_totals[&PaymentMethod::Cash].cents(), 400);
        assert_eq!(shift.payment_totals[&PaymentMethod::Pix].cents(), 600);
        assert_eq!(shift.movements.len(), 1);
        // float 100.00 + cash 4.00 - withdrawal 20.00
        assert_eq!(shift.expected_cash().cents(), 8_400);
    }

    #[tokio::test]
    async fn test_close_is_terminal_in_storage() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shift_id = open_test_shift(&db).await;

        let mut shift = db.shifts().get(&shift_id).await.unwrap().unwrap();
        let close = shift
            .close(Money::from_cents(10_000), "op-1", Utc::now())
            .unwrap()
            .clone();
        db.shifts().close(&shift_id, &close).await.unwrap();

        // Second close hits the status guard.
        let err = db.shifts().close(&shift_id, &close).await.unwrap_err();
        assert!(matches!(err, DbError::PreconditionFailed(_)));

        assert!(db.shifts().find_open("op-1").await.unwrap().is_none());
        let stored = db.shifts().get(&shift_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ShiftStatus::Closed);
        assert_eq!(stored.closing.unwrap().difference.cents(), 0);

        // Operator can open a new shift once the old one is closed.
        let _second = open_test_shift(&db).await;
    }
}
