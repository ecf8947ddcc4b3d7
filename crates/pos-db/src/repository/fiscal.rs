//! # Fiscal Repository
//!
//! Durable fiscal documents and the contingency number pool.
//!
//! The pool is a pre-allocated `[next_number, range_end]` range per series,
//! handed out by the fiscal authority while the terminal was online.
//! Reservation is a single guarded UPDATE: concurrent reservations each
//! get a distinct number, and a number is never handed out twice even
//! across restarts because the counter row is durable.

use sqlx::{FromRow, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use pos_core::fiscal::{EmissionKind, FiscalDocument, FiscalStatus};

#[derive(Debug, FromRow)]
struct DocumentRow {
    series: i64,
    sequence_number: i64,
    access_key: String,
    sale_local_id: String,
    emission: EmissionKind,
    status: FiscalStatus,
    authority_protocol: Option<String>,
    issued_at: DateTime<Utc>,
}

impl From<DocumentRow> for FiscalDocument {
    fn from(row: DocumentRow) -> Self {
        FiscalDocument {
            sequence_number: row.sequence_number,
            series: row.series,
            access_key: row.access_key,
            sale_local_id: row.sale_local_id,
            emission: row.emission,
            status: row.status,
            authority_protocol: row.authority_protocol,
            issued_at: row.issued_at,
        }
    }
}

/// Repository for fiscal documents and contingency counters.
#[derive(Debug, Clone)]
pub struct FiscalRepository {
    pool: SqlitePool,
}

impl FiscalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        FiscalRepository { pool }
    }

    // =========================================================================
    // Contingency number pool
    // =========================================================================

    /// Installs or extends the pre-allocated contingency range for a
    /// series. The range only ever grows; shrinking would risk reuse.
    pub async fn seed_contingency_range(
        &self,
        series: i64,
        start: i64,
        end: i64,
    ) -> DbResult<()> {
        debug!(series, start, end, "Seeding contingency range");

        sqlx::query(
            r#"
            INSERT INTO contingency_counters (series, next_number, range_end)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(series)
            DO UPDATE SET range_end = MAX(range_end, excluded.range_end)
            "#,
        )
        .bind(series)
        .bind(start)
        .bind(end)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reserves the next contingency number for a series. One guarded
    /// UPDATE; exhaustion is a typed error the issuer reports to the
    /// operator instead of inventing a number.
    pub async fn reserve_contingency_number(&self, series: i64) -> DbResult<i64> {
        let number: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE contingency_counters
            SET next_number = next_number + 1
            WHERE series = ?1 AND next_number <= range_end
            RETURNING next_number - 1
            "#,
        )
        .bind(series)
        .fetch_optional(&self.pool)
        .await?;

        match number {
            Some(n) => Ok(n),
            None => {
                warn!(series, "Contingency number pool exhausted");
                Err(DbError::ContingencyPoolExhausted { series })
            }
        }
    }

    /// Numbers remaining in the pool, for the low-pool warning.
    pub async fn contingency_remaining(&self, series: i64) -> DbResult<i64> {
        let remaining: Option<i64> = sqlx::query_scalar(
            "SELECT range_end - next_number + 1 FROM contingency_counters WHERE series = ?1",
        )
        .bind(series)
        .fetch_optional(&self.pool)
        .await?;

        Ok(remaining.unwrap_or(0).max(0))
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Inserts a document. The (series, sequence_number) primary key and
    /// the unique access key both reject any reuse.
    pub async fn insert(&self, doc: &FiscalDocument) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fiscal_documents (
                series, sequence_number, access_key, sale_local_id,
                emission, status, authority_protocol, issued_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(doc.series)
        .bind(doc.sequence_number)
        .bind(&doc.access_key)
        .bind(&doc.sale_local_id)
        .bind(doc.emission)
        .bind(doc.status)
        .bind(&doc.authority_protocol)
        .bind(doc.issued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records the authority's verdict for a document.
    pub async fn set_status(
        &self,
        access_key: &str,
        status: FiscalStatus,
        authority_protocol: Option<&str>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE fiscal_documents SET status = ?1, authority_protocol = ?2 WHERE access_key = ?3",
        )
        .bind(status)
        .bind(authority_protocol)
        .bind(access_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("FiscalDocument", access_key));
        }
        Ok(())
    }

    /// The latest document issued for a sale, if any (a rejected document
    /// may be followed by a reissue under a new number).
    pub async fn get_by_sale(&self, sale_local_id: &str) -> DbResult<Option<FiscalDocument>> {
        let row: Option<DocumentRow> = sqlx::query_as(
            r#"
            SELECT * FROM fiscal_documents
            WHERE sale_local_id = ?1
            ORDER BY issued_at DESC, sequence_number DESC
            LIMIT 1
            "#,
        )
        .bind(sale_local_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FiscalDocument::from))
    }

    /// Contingency documents still awaiting authorization, in issuance
    /// order - the replay set after reconnect.
    pub async fn list_pending_contingency(&self) -> DbResult<Vec<FiscalDocument>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            r#"
            SELECT * FROM fiscal_documents
            WHERE status = 'contingency_issued'
            ORDER BY series, sequence_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FiscalDocument::from).collect())
    }

    /// Every document still waiting on the authority's verdict: the
    /// contingency backlog plus online submissions whose response was
    /// lost. In issuance order.
    pub async fn list_awaiting_authority(&self) -> DbResult<Vec<FiscalDocument>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            r#"
            SELECT * FROM fiscal_documents
            WHERE status IN ('contingency_issued', 'submitted')
            ORDER BY series, sequence_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FiscalDocument::from).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
