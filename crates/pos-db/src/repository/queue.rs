//! # Submission Queue Repository
//!
//! The durable FIFO of unsent sales. One row per sale, keyed by the sale's
//! `local_id`; the row is removed only after the backend-of-record accepts
//! the sale. Retry scheduling lives in the `next_retry_at` column; the
//! policy that computes it lives in pos-sync.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use pos_core::types::QueueEntry;

#[derive(Debug, FromRow)]
struct QueueRow {
    local_id: String,
    attempts: i64,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<QueueRow> for QueueEntry {
    fn from(row: QueueRow) -> Self {
        QueueEntry {
            local_id: row.local_id,
            attempts: row.attempts,
            next_retry_at: row.next_retry_at,
            last_error: row.last_error,
            created_at: row.created_at,
        }
    }
}

/// Repository for the submission queue.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

impl QueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        QueueRepository { pool }
    }

    /// Enqueues a sale. Returns `false` when the sale was already queued
    /// (OR IGNORE dedupe on the primary key).
    pub async fn enqueue(&self, local_id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO submission_queue (local_id, created_at) VALUES (?1, ?2)",
        )
        .bind(local_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Entries eligible for a submission attempt, in arrival order.
    /// An entry is due when it has no scheduled retry or the schedule has
    /// passed.
    pub async fn list_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<QueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT local_id, attempts, next_retry_at, last_error, created_at
            FROM submission_queue
            WHERE next_retry_at IS NULL OR next_retry_at <= ?1
            ORDER BY created_at, local_id
            LIMIT ?2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(QueueEntry::from).collect())
    }

    /// Records a failed attempt: bumps the counter, stores the error and
    /// the time before which the entry must not be retried.
    pub async fn record_failure(
        &self,
        local_id: &str,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> DbResult<i64> {
        let attempts: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE submission_queue
            SET attempts = attempts + 1, next_retry_at = ?1, last_error = ?2
            WHERE local_id = ?3
            RETURNING attempts
            "#,
        )
        .bind(next_retry_at)
        .bind(error)
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or_else(|| DbError::not_found("QueueEntry", local_id))
    }

    /// Removes an entry after the backend-of-record accepted the sale (or
    /// reported it already had it).
    pub async fn remove(&self, local_id: &str) -> DbResult<()> {
        debug!(local_id, "Removing queue entry");
        sqlx::query("DELETE FROM submission_queue WHERE local_id = ?1")
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of sales still waiting to reach the backend-of-record.
    pub async fn depth(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submission_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::sale::tests::sample_sale;
    use crate::repository::shift::tests::open_test_shift;
    use chrono::Duration;

    async fn seeded_db() -> (Database, String) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shift_id = open_test_shift(&db).await;
        (db, shift_id)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let (db, shift_id) = seeded_db().await;
        db.sales()
            .insert_finalized(&sample_sale("sale-1", 1, &shift_id))
            .await
            .unwrap();

        // Finalize already enqueued; a second explicit enqueue is ignored.
        assert!(!db.queue().enqueue("sale-1", Utc::now()).await.unwrap());
        assert_eq!(db.queue().depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fifo_order_and_due_filter() {
        let (db, shift_id) = seeded_db().await;
        let now = Utc::now();

        for (i, id) in ["sale-a", "sale-b", "sale-c"].iter().enumerate() {
            db.sales()
                .insert_finalized(&sample_sale(id, i as i64 + 1, &shift_id))
                .await
                .unwrap();
        }

        // Push sale-a into the future; it must drop out of the due set.
        db.queue()
            .record_failure("sale-a", now + Duration::minutes(5), "timeout")
            .await
            .unwrap();

        let due = db.queue().list_due(now, 10).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|e| e.local_id.as_str()).collect();
        assert_eq!(ids, vec!["sale-b", "sale-c"]);

        // Once its schedule passes it is due again, in arrival order.
        let due = db
            .queue()
            .list_due(now + Duration::minutes(6), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 3);
        assert_eq!(due[0].local_id, "sale-a");
        assert_eq!(due[0].attempts, 1);
        assert_eq!(due[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_remove_clears_entry() {
        let (db, shift_id) = seeded_db().await;
        db.sales()
            .insert_finalized(&sample_sale("sale-1", 1, &shift_id))
            .await
            .unwrap();

        db.queue().remove("sale-1").await.unwrap();
        assert_eq!(db.queue().depth().await.unwrap(), 0);
        // Removing again is harmless.
        db.queue().remove("sale-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_record_failure_on_missing_entry() {
        let (db, _) = seeded_db().await;
        let err = db
            .queue()
            .record_failure("ghost", Utc::now(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
