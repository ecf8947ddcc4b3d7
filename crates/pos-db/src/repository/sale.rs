//! # Sale Repository
//!
//! Durable sales and the atomic finalize step.
//!
//! ## Finalize is one transaction
//! ```text
//! BEGIN
//!   UPDATE terminal_counters          (allocate sale number)
//!   INSERT INTO sales                 (status = 'queued')
//!   INSERT INTO sale_items  × n
//!   INSERT INTO payments    × n
//!   INSERT OR IGNORE INTO submission_queue
//! COMMIT
//! ```
//! A crash between payment capture and commit leaves nothing half-written:
//! either the sale exists with its queue entry or it does not exist at all.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use pos_core::money::Money;
use pos_core::types::{PaymentLeg, PaymentMethod, Sale, SaleItem, SaleStatus};

// =============================================================================
// Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct SaleRow {
    local_id: String,
    number: i64,
    customer_id: Option<String>,
    shift_id: String,
    subtotal_cents: i64,
    item_discount_cents: i64,
    total_discount_cents: i64,
    loyalty_discount_cents: i64,
    loyalty_points_redeemed: i64,
    grand_total_cents: i64,
    status: SaleStatus,
    created_at: DateTime<Utc>,
    finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct SaleItemRow {
    product_id: String,
    unit_price_cents: i64,
    quantity: i64,
    line_total_cents: i64,
    item_discount_cents: i64,
    allocated_discount_cents: i64,
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    method: PaymentMethod,
    amount_cents: i64,
}

fn assemble(row: SaleRow, items: Vec<SaleItemRow>, payments: Vec<PaymentRow>) -> Sale {
    Sale {
        local_id: row.local_id,
        number: row.number,
        customer_id: row.customer_id,
        shift_id: row.shift_id,
        items: items
            .into_iter()
            .map(|i| SaleItem {
                product_id: i.product_id,
                unit_price: Money::from_cents(i.unit_price_cents),
                quantity: i.quantity,
                line_total: Money::from_cents(i.line_total_cents),
                item_discount: Money::from_cents(i.item_discount_cents),
                allocated_discount: Money::from_cents(i.allocated_discount_cents),
            })
            .collect(),
        subtotal: Money::from_cents(row.subtotal_cents),
        item_discount_total: Money::from_cents(row.item_discount_cents),
        total_discount: Money::from_cents(row.total_discount_cents),
        loyalty_discount: Money::from_cents(row.loyalty_discount_cents),
        loyalty_points_redeemed: row.loyalty_points_redeemed,
        grand_total: Money::from_cents(row.grand_total_cents),
        payments: payments
            .into_iter()
            .map(|p| PaymentLeg {
                method: p.method,
                amount: Money::from_cents(p.amount_cents),
            })
            .collect(),
        status: row.status,
        created_at: row.created_at,
        finalized_at: row.finalized_at,
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Allocates the next sequential sale number. Single guarded UPDATE, so
    /// two concurrent finalizes can never share a number.
    pub async fn next_sale_number(&self) -> DbResult<i64> {
        let number: i64 = sqlx::query_scalar(
            r#"
            UPDATE terminal_counters
            SET next_value = next_value + 1
            WHERE name = 'sale_number'
            RETURNING next_value - 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(number)
    }

    /// Persists a finalized sale and its queue entry in one transaction.
    ///
    /// The sale is stored with status `Queued`. Re-running with the same
    /// `local_id` fails on the primary key, which is the idempotency
    /// barrier for a double-tapped finalize.
    pub async fn insert_finalized(&self, sale: &Sale) -> DbResult<()> {
        debug!(local_id = %sale.local_id, number = sale.number, "Inserting finalized sale");

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sales (
                local_id, number, customer_id, shift_id,
                subtotal_cents, item_discount_cents, total_discount_cents,
                loyalty_discount_cents, loyalty_points_redeemed,
                grand_total_cents, status, created_at, finalized_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&sale.local_id)
        .bind(sale.number)
        .bind(&sale.customer_id)
        .bind(&sale.shift_id)
        .bind(sale.subtotal.cents())
        .bind(sale.item_discount_total.cents())
        .bind(sale.total_discount.cents())
        .bind(sale.loyalty_discount.cents())
        .bind(sale.loyalty_points_redeemed)
        .bind(sale.grand_total.cents())
        .bind(SaleStatus::Queued)
        .bind(sale.created_at)
        .bind(sale.finalized_at)
        .execute(&mut *tx)
        .await?;

        for item in &sale.items {
            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    sale_local_id, product_id, unit_price_cents, quantity,
                    line_total_cents, item_discount_cents, allocated_discount_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&sale.local_id)
            .bind(&item.product_id)
            .bind(item.unit_price.cents())
            .bind(item.quantity)
            .bind(item.line_total.cents())
            .bind(item.item_discount.cents())
            .bind(item.allocated_discount.cents())
            .execute(&mut *tx)
            .await?;
        }

        for leg in &sale.payments {
            sqlx::query(
                "INSERT INTO payments (sale_local_id, method, amount_cents) VALUES (?1, ?2, ?3)",
            )
            .bind(&sale.local_id)
            .bind(leg.method)
            .bind(leg.amount.cents())
            .execute(&mut *tx)
            .await?;
        }

        // OR IGNORE: enqueueing the same sale twice is a no-op.
        sqlx::query(
            "INSERT OR IGNORE INTO submission_queue (local_id, created_at) VALUES (?1, ?2)",
        )
        .bind(&sale.local_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Fetches a sale with its items and payment legs.
    pub async fn get(&self, local_id: &str) -> DbResult<Option<Sale>> {
        let row: Option<SaleRow> = sqlx::query_as("SELECT * FROM sales WHERE local_id = ?1")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items: Vec<SaleItemRow> = sqlx::query_as(
            r#"
            SELECT product_id, unit_price_cents, quantity, line_total_cents,
                   item_discount_cents, allocated_discount_cents
            FROM sale_items WHERE sale_local_id = ?1 ORDER BY id
            "#,
        )
        .bind(local_id)
        .fetch_all(&self.pool)
        .await?;

        let payments: Vec<PaymentRow> = sqlx::query_as(
            "SELECT method, amount_cents FROM payments WHERE sale_local_id = ?1 ORDER BY id",
        )
        .bind(local_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(assemble(row, items, payments)))
    }

    /// Updates only the status column. The rest of a finalized sale is
    /// immutable.
    pub async fn update_status(&self, local_id: &str, status: SaleStatus) -> DbResult<()> {
        let result = sqlx::query("UPDATE sales SET status = ?1 WHERE local_id = ?2")
            .bind(status)
            .bind(local_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", local_id));
        }
        Ok(())
    }

    /// Sales in a given status, oldest first.
    pub async fn list_by_status(&self, status: SaleStatus) -> DbResult<Vec<Sale>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT local_id FROM sales WHERE status = ?1 ORDER BY created_at",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        let mut sales = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(sale) = self.get(&id).await? {
                sales.push(sale);
            }
        }
        Ok(sales)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::shift::tests::open_test_shift;

    pub(crate) fn sample_sale(local_id: &str, number: i64, shift_id: &str) -> Sale {
        Sale {
            local_id: local_id.into(),
            number,
            customer_id: Some("cust-1".into()),
            shift_id: shift_id.into(),
            items: vec![SaleItem {
                product_id: "prod-1".into(),
                unit_price: Money::from_cents(500),
                quantity: 2,
                line_total: Money::from_cents(1000),
                item_discount: Money::zero(),
                allocated_discount: Money::zero(),
            }],
            subtotal: Money::from_cents(1000),
            item_discount_total: Money::zero(),
            total_discount: Money::zero(),
            loyalty_discount: Money::zero(),
            loyalty_points_redeemed: 0,
            grand_total: Money::from_cents(1000),
            payments: vec![
                PaymentLeg {
                    method: PaymentMethod::Cash,
                    amount: Money::from_cents(400),
                },
                PaymentLeg {
                    method: PaymentMethod::Pix,
                    amount: Money::from_cents(600),
                },
            ],
            status: SaleStatus::Finalized,
            created_at: Utc::now(),
            finalized_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_round_trip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shift_id = open_test_shift(&db).await;

        let sale = sample_sale("sale-1", 1, &shift_id);
        db.sales().insert_finalized(&sale).await.unwrap();

        let loaded = db.sales().get("sale-1").await.unwrap().unwrap();
        assert_eq!(loaded.number, 1);
        assert_eq!(loaded.status, SaleStatus::Queued);
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.payments.len(), 2);
        assert_eq!(loaded.grand_total.cents(), 1000);
        assert_eq!(loaded.paid_with(PaymentMethod::Pix).cents(), 600);
    }

    #[tokio::test]
    async fn test_finalize_also_enqueues() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shift_id = open_test_shift(&db).await;

        db.sales()
            .insert_finalized(&sample_sale("sale-1", 1, &shift_id))
            .await
            .unwrap();

        assert_eq!(db.queue().depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_local_id_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let shift_id = open_test_shift(&db).await;

        let sale = sample_sale("sale-1", 1, &shift_id);
        db.sales().insert_finalized(&sale).await.unwrap();

        let mut dup = sample_sale("sale-1", 2, &shift_id);
        dup.number = 2;
        let err = db.sales().insert_finalized(&dup).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // First write untouched, still exactly one queue entry.
        assert_eq!(db.queue().depth().await.unwrap(), 1);
        assert_eq!(db.sales().get("sale-1").await.unwrap().unwrap().number, 1);
    }

    #[tokio::test]
    async fn test_sale_numbers_strictly_increase() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let a = db.sales().next_sale_number().await.unwrap();
        let b = db.sales().next_sale_number().await.unwrap();
        let c = db.sales().next_sale_number().await.unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_update_status_unknown_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db
            .sales()
            .update_status("nope", SaleStatus::Synced)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
