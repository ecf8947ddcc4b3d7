//! # Checkout Service
//!
//! The terminal-facing front door: shift lifecycle, cart pricing and the
//! finalize pipeline.
//!
//! ```text
//! finalize(request)
//!   │
//!   ├─► shift must be open
//!   ├─► price_cart (pure, deterministic)
//!   ├─► payment legs must sum to the grand total exactly
//!   ├─► loyalty debit (guarded; a lost race re-prices, never overdrafts)
//!   ├─► persist sale + queue entry in ONE transaction, status Queued
//!   ├─► kick the submission worker
//!   ├─► issue the fiscal document (online or contingency)
//!   └─► create PIX charges for the PIX legs
//! ```
//!
//! Everything after the persist step works against a durable sale: a crash
//! between persist and fiscal issuance leaves a queued sale that the
//! reconnect sequence finishes, never a half-sale.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pos_core::error::{CoreError, ShiftStateError, ValidationError};
use pos_core::fiscal::FiscalDocument;
use pos_core::money::Money;
use pos_core::pix::PixCharge;
use pos_core::pricing::{price_cart, PricedCart, PricingRequest, RedemptionRequest};
use pos_core::shift::{CashShift, MovementKind, ShiftClose, ShiftMovement, ShiftStatus};
use pos_core::types::{PaymentLeg, PaymentMethod, Sale, SaleStatus};
use pos_db::{Database, DbError};

use crate::error::{SyncError, SyncResult};
use crate::fiscal::FiscalIssuer;
use crate::pix::PixChargeManager;
use crate::queue::{SubmissionHandle, SubmissionProcessor};

// =============================================================================
// Request / Result Types
// =============================================================================

/// Everything the terminal hands over when the operator hits "finish sale".
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub shift_id: String,
    pub customer_id: Option<String>,
    pub pricing: PricingRequest,
    pub payments: Vec<PaymentLeg>,
}

/// The finalized sale plus the artifacts the terminal shows the customer.
#[derive(Debug, Clone)]
pub struct FinalizedSale {
    pub sale: Sale,
    pub document: FiscalDocument,
    /// One charge per PIX payment leg; the payloads feed the QR codes.
    pub pix_charges: Vec<PixCharge>,
}

// =============================================================================
// Service
// =============================================================================

/// Coordinates one terminal's checkout and shift operations.
pub struct CheckoutService {
    db: Arc<Database>,
    issuer: Arc<FiscalIssuer>,
    pix: Arc<PixChargeManager>,
    queue: SubmissionHandle,
    connectivity_rx: watch::Receiver<bool>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<Database>,
        issuer: Arc<FiscalIssuer>,
        pix: Arc<PixChargeManager>,
        queue: SubmissionHandle,
        connectivity_rx: watch::Receiver<bool>,
    ) -> Self {
        CheckoutService {
            db,
            issuer,
            pix,
            queue,
            connectivity_rx,
        }
    }

    // =========================================================================
    // Shift Lifecycle
    // =========================================================================

    /// Opens a shift for the operator. The one-open-shift-per-operator rule
    /// is enforced by the storage layer; a violation surfaces as
    /// [`ShiftStateError::AlreadyOpen`] naming the existing shift.
    pub async fn open_shift(
        &self,
        operator_id: &str,
        opening_float: Money,
    ) -> SyncResult<CashShift> {
        let number = self.db.shifts().next_shift_number().await?;
        let shift = CashShift::open(
            Uuid::new_v4().to_string(),
            number,
            operator_id,
            opening_float,
            Utc::now(),
        )?;

        match self.db.shifts().insert_open(&shift).await {
            Ok(()) => {
                info!(shift_id = %shift.id, number, operator_id, "Shift opened");
                Ok(shift)
            }
            Err(err) if err.is_unique_violation_on("operator_id") => {
                let existing = self.db.shifts().find_open(operator_id).await?;
                Err(CoreError::ShiftState(ShiftStateError::AlreadyOpen {
                    operator_id: operator_id.to_string(),
                    shift_number: existing.map(|s| s.number).unwrap_or(0),
                })
                .into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Records a supply or withdrawal against an open shift.
    pub async fn record_movement(
        &self,
        shift_id: &str,
        kind: MovementKind,
        amount: Money,
        reason: &str,
    ) -> SyncResult<()> {
        let mut shift = self.load_shift(shift_id).await?;

        // Validates amount and open status before anything is written.
        shift.record_movement(kind, amount, reason, Utc::now())?;
        let movement = ShiftMovement {
            kind,
            amount,
            reason: reason.to_string(),
            at: Utc::now(),
        };
        self.db.shifts().insert_movement(shift_id, &movement).await?;

        debug!(shift_id, ?kind, amount = amount.cents(), "Cash movement recorded");
        Ok(())
    }

    /// Closes a shift against the counted drawer cash and returns the
    /// reconciliation. `closed_by` differs from the shift owner on an
    /// administrative force-close.
    pub async fn close_shift(
        &self,
        shift_id: &str,
        counted_cash: Money,
        closed_by: &str,
    ) -> SyncResult<ShiftClose> {
        let mut shift = self.load_shift(shift_id).await?;

        let close = shift.close(counted_cash, closed_by, Utc::now())?.clone();
        self.db.shifts().close(shift_id, &close).await?;

        info!(
            shift_id,
            difference = close.difference.cents(),
            "Shift closed"
        );
        Ok(close)
    }

    async fn load_shift(&self, shift_id: &str) -> SyncResult<CashShift> {
        self.db
            .shifts()
            .get(shift_id)
            .await?
            .ok_or_else(|| SyncError::Database(format!("shift {shift_id} not found")))
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    /// Builds a redemption request against the customer's stored balance.
    /// The balance is advisory at this point; the debit at finalize is the
    /// authoritative check.
    pub async fn redemption_for(
        &self,
        customer_id: &str,
        requested_points: i64,
    ) -> SyncResult<RedemptionRequest> {
        let account = self.db.loyalty().get_or_create(customer_id).await?;
        Ok(RedemptionRequest {
            requested_points,
            customer_points: account.points_balance,
        })
    }

    /// Prices a cart without side effects. Safe to call on every cart edit.
    pub fn price(&self, request: &PricingRequest) -> SyncResult<PricedCart> {
        Ok(price_cart(request)?)
    }

    // =========================================================================
    // Finalize
    // =========================================================================

    /// Finalizes a sale. On success the sale is durably queued for the
    /// backend-of-record, a fiscal document is issued and PIX charges exist
    /// for every PIX leg.
    pub async fn finalize(&self, request: CheckoutRequest) -> SyncResult<FinalizedSale> {
        let shift = self.load_shift(&request.shift_id).await?;
        // Re-checks at the storage layer too, but failing here keeps the
        // sale number and the loyalty debit untouched.
        if shift.status != ShiftStatus::Open {
            return Err(CoreError::ShiftState(ShiftStateError::NotOpen {
                shift_id: request.shift_id.clone(),
            })
            .into());
        }

        let priced = price_cart(&request.pricing)?;

        let paid: Money = request.payments.iter().map(|leg| leg.amount).sum();
        if paid != priced.grand_total {
            return Err(CoreError::Validation(ValidationError::PaymentMismatch {
                paid,
                expected: priced.grand_total,
            })
            .into());
        }

        if priced.loyalty_points_redeemed > 0 && request.customer_id.is_none() {
            return Err(CoreError::Validation(ValidationError::Required {
                field: "customer_id",
            })
            .into());
        }

        // Redemption debit happens at finalize: the goods leave the store
        // now. Accrual waits for backend acceptance and lives in the
        // submission worker.
        if priced.loyalty_points_redeemed > 0 {
            if let Some(customer_id) = &request.customer_id {
                self.debit_redemption(customer_id, priced.loyalty_points_redeemed)
                    .await?;
            }
        }

        let sale = self.persist_sale(&request, &priced).await?;

        // Best-effort nudge; the poll cycle picks the sale up regardless.
        if let Err(err) = self.queue.kick().await {
            warn!(%err, "Submission worker kick failed");
        }

        let online = *self.connectivity_rx.borrow();
        let document = self.issuer.issue(&sale.local_id, online).await?;

        let mut pix_charges = Vec::new();
        for leg in &sale.payments {
            if leg.method == PaymentMethod::Pix {
                pix_charges.push(self.pix.create_charge(&sale.local_id, leg.amount).await?);
            }
        }

        info!(
            local_id = %sale.local_id,
            number = sale.number,
            total = sale.grand_total.cents(),
            "Sale finalized"
        );

        Ok(FinalizedSale {
            sale,
            document,
            pix_charges,
        })
    }

    /// Re-queues a sale parked as [`SaleStatus::SyncFailed`] after operator
    /// intervention.
    pub async fn retry_sale(&self, local_id: &str) -> SyncResult<()> {
        SubmissionProcessor::retry_parked(&self.db, local_id).await?;
        self.queue.kick().await
    }

    async fn debit_redemption(&self, customer_id: &str, points: i64) -> SyncResult<()> {
        match self.db.loyalty().debit(customer_id, points).await {
            Ok(balance) => {
                debug!(customer_id, points, balance, "Redemption debited");
                Ok(())
            }
            // The balance dropped since pricing (same customer, another
            // terminal). Surface the fresh balance so the caller re-prices.
            Err(DbError::PreconditionFailed(_)) => {
                let account = self.db.loyalty().get_or_create(customer_id).await?;
                Err(CoreError::InsufficientPoints {
                    customer_id: customer_id.to_string(),
                    balance: account.points_balance,
                    requested: points,
                }
                .into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn persist_sale(
        &self,
        request: &CheckoutRequest,
        priced: &PricedCart,
    ) -> SyncResult<Sale> {
        let number = self.db.sales().next_sale_number().await?;
        let now = Utc::now();

        let sale = Sale {
            local_id: Uuid::new_v4().to_string(),
            number,
            customer_id: request.customer_id.clone(),
            shift_id: request.shift_id.clone(),
            items: priced.items.clone(),
            subtotal: priced.subtotal,
            item_discount_total: priced.item_discount_total,
            total_discount: priced.total_discount,
            loyalty_discount: priced.loyalty_discount,
            loyalty_points_redeemed: priced.loyalty_points_redeemed,
            grand_total: priced.grand_total,
            payments: request.payments.clone(),
            status: SaleStatus::Queued,
            created_at: now,
            finalized_at: Some(now),
        };

        if let Err(err) = self.db.sales().insert_finalized(&sale).await {
            // Give the points back; the sale never existed.
            if sale.loyalty_points_redeemed > 0 {
                if let Some(customer_id) = &sale.customer_id {
                    let _ = self
                        .db
                        .loyalty()
                        .credit(customer_id, sale.loyalty_points_redeemed)
                        .await;
                }
            }
            return Err(err.into());
        }

        Ok(sale)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::{MockAuthority, MockBackend, MockNetwork, MockSequence};
    use crate::config::{EmitterConfig, FiscalSettings, PixSettings, SyncSettings};
    use pos_core::fiscal::{EmitterInfo, FiscalStatus};
    use pos_core::types::CartLine;
    use pos_db::DbConfig;

    struct Harness {
        db: Arc<Database>,
        service: CheckoutService,
        connectivity_tx: watch::Sender<bool>,
        _queue_task: tokio::task::JoinHandle<()>,
    }

    async fn harness() -> Harness {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let backend = Arc::new(MockBackend::default());

        let emitter = EmitterInfo {
            cnpj: "12345678000195".into(),
            uf_code: "35".into(),
            name: "Mercado Exemplo LTDA".into(),
            fantasy_name: None,
        };
        let issuer = Arc::new(FiscalIssuer::new(
            db.clone(),
            Arc::new(MockAuthority::default()),
            Arc::new(MockSequence::starting_at(1)),
            emitter,
            FiscalSettings::default(),
        ));
        issuer.ensure_contingency_pool().await.unwrap();

        let pix = Arc::new(PixChargeManager::new(
            db.clone(),
            Arc::new(MockNetwork::default()),
            EmitterConfig {
                name: "Mercado Exemplo LTDA".into(),
                city: "Sao Paulo".into(),
                ..EmitterConfig::default()
            },
            PixSettings {
                key: "loja@exemplo.com.br".into(),
                ttl_minutes: 30,
                ..PixSettings::default()
            },
        ));

        // Long poll so tests control the worker via kicks only.
        let settings = SyncSettings {
            poll_interval_secs: 3600,
            ..SyncSettings::default()
        };
        let (processor, queue) = SubmissionProcessor::new(db.clone(), backend, settings);
        let queue_task = tokio::spawn(processor.run());

        let (connectivity_tx, connectivity_rx) = watch::channel(true);
        let service = CheckoutService::new(db.clone(), issuer, pix, queue, connectivity_rx);

        Harness {
            db,
            service,
            connectivity_tx,
            _queue_task: queue_task,
        }
    }

    fn cart(price: i64, qty: i64) -> PricingRequest {
        PricingRequest {
            lines: vec![CartLine {
                product_id: "sku-1".into(),
                unit_price: Money::from_cents(price),
                quantity: qty,
                line_discount: None,
            }],
            total_discount: None,
            redemption: None,
        }
    }

    fn cash(amount: i64) -> Vec<PaymentLeg> {
        vec![PaymentLeg {
            method: PaymentMethod::Cash,
            amount: Money::from_cents(amount),
        }]
    }

    #[tokio::test]
    async fn test_finalize_persists_queues_and_issues() {
        let h = harness().await;
        let shift = h.service.open_shift("op-1", Money::zero()).await.unwrap();

        let finalized = h
            .service
            .finalize(CheckoutRequest {
                shift_id: shift.id.clone(),
                customer_id: None,
                pricing: cart(2_500, 2),
                payments: cash(5_000),
            })
            .await
            .unwrap();

        assert_eq!(finalized.sale.number, 1);
        assert_eq!(finalized.sale.grand_total.cents(), 5_000);
        assert_eq!(finalized.document.status, FiscalStatus::Authorized);
        assert!(finalized.pix_charges.is_empty());

        let stored = h
            .db
            .sales()
            .get(&finalized.sale.local_id)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            stored.status,
            SaleStatus::Queued | SaleStatus::Syncing | SaleStatus::Synced
        ));
    }

    #[tokio::test]
    async fn test_payment_mismatch_rejected_before_any_write() {
        let h = harness().await;
        let shift = h.service.open_shift("op-1", Money::zero()).await.unwrap();

        let err = h
            .service
            .finalize(CheckoutRequest {
                shift_id: shift.id.clone(),
                customer_id: None,
                pricing: cart(1_000, 1),
                payments: cash(900),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Domain(CoreError::Validation(ValidationError::PaymentMismatch {
                ..
            }))
        ));
        // The sale number was never consumed.
        assert_eq!(h.db.sales().next_sale_number().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_finalize_issues_contingency() {
        let h = harness().await;
        h.connectivity_tx.send(false).unwrap();
        let shift = h.service.open_shift("op-1", Money::zero()).await.unwrap();

        let finalized = h
            .service
            .finalize(CheckoutRequest {
                shift_id: shift.id.clone(),
                customer_id: None,
                pricing: cart(1_000, 1),
                payments: cash(1_000),
            })
            .await
            .unwrap();

        assert_eq!(finalized.document.status, FiscalStatus::ContingencyIssued);
        // tpEmis digit marks the contingency emission.
        assert_eq!(&finalized.document.access_key.as_str()[34..35], "9");
    }

    #[tokio::test]
    async fn test_pix_leg_gets_a_charge() {
        let h = harness().await;
        let shift = h.service.open_shift("op-1", Money::zero()).await.unwrap();

        let finalized = h
            .service
            .finalize(CheckoutRequest {
                shift_id: shift.id.clone(),
                customer_id: None,
                pricing: cart(3_000, 1),
                payments: vec![
                    PaymentLeg {
                        method: PaymentMethod::Cash,
                        amount: Money::from_cents(1_000),
                    },
                    PaymentLeg {
                        method: PaymentMethod::Pix,
                        amount: Money::from_cents(2_000),
                    },
                ],
            })
            .await
            .unwrap();

        assert_eq!(finalized.pix_charges.len(), 1);
        assert_eq!(finalized.pix_charges[0].amount.cents(), 2_000);
        assert!(pos_core::pix::validate_br_code(&finalized.pix_charges[0].payload));
    }

    #[tokio::test]
    async fn test_redemption_debits_at_finalize() {
        let h = harness().await;
        let shift = h.service.open_shift("op-1", Money::zero()).await.unwrap();
        h.db.loyalty().credit("cust-1", 200).await.unwrap();

        let redemption = h.service.redemption_for("cust-1", 100).await.unwrap();
        assert_eq!(redemption.customer_points, 200);

        let mut pricing = cart(5_000, 1);
        pricing.redemption = Some(redemption);

        // 100 points = R$ 10,00 off.
        let finalized = h
            .service
            .finalize(CheckoutRequest {
                shift_id: shift.id.clone(),
                customer_id: Some("cust-1".into()),
                pricing,
                payments: cash(4_000),
            })
            .await
            .unwrap();

        assert_eq!(finalized.sale.loyalty_points_redeemed, 100);
        let account = h.db.loyalty().get_or_create("cust-1").await.unwrap();
        assert_eq!(account.points_balance, 100);
    }

    #[tokio::test]
    async fn test_stale_balance_surfaces_insufficient_points() {
        let h = harness().await;
        let shift = h.service.open_shift("op-1", Money::zero()).await.unwrap();
        h.db.loyalty().credit("cust-1", 100).await.unwrap();

        let redemption = h.service.redemption_for("cust-1", 100).await.unwrap();
        // Another terminal spends the points between pricing and finalize.
        h.db.loyalty().debit("cust-1", 80).await.unwrap();

        let mut pricing = cart(5_000, 1);
        pricing.redemption = Some(redemption);

        let err = h
            .service
            .finalize(CheckoutRequest {
                shift_id: shift.id.clone(),
                customer_id: Some("cust-1".into()),
                pricing,
                payments: cash(4_000),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Domain(CoreError::InsufficientPoints {
                balance: 20,
                requested: 100,
                ..
            })
        ));
        // The failed finalize left the balance untouched.
        let account = h.db.loyalty().get_or_create("cust-1").await.unwrap();
        assert_eq!(account.points_balance, 20);
    }

    #[tokio::test]
    async fn test_double_open_names_existing_shift() {
        let h = harness().await;
        let first = h.service.open_shift("op-1", Money::zero()).await.unwrap();

        let err = h
            .service
            .open_shift("op-1", Money::zero())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Domain(CoreError::ShiftState(ShiftStateError::AlreadyOpen {
                shift_number,
                ..
            })) if shift_number == first.number
        ));
    }

    #[tokio::test]
    async fn test_shift_close_reconciles_cash_only() {
        let h = harness().await;
        let shift = h
            .service
            .open_shift("op-1", Money::from_cents(10_000))
            .await
            .unwrap();

        h.service
            .finalize(CheckoutRequest {
                shift_id: shift.id.clone(),
                customer_id: None,
                pricing: cart(3_000, 1),
                payments: vec![
                    PaymentLeg {
                        method: PaymentMethod::Cash,
                        amount: Money::from_cents(2_000),
                    },
                    PaymentLeg {
                        method: PaymentMethod::Debit,
                        amount: Money::from_cents(1_000),
                    },
                ],
            })
            .await
            .unwrap();

        h.service
            .record_movement(
                &shift.id,
                MovementKind::Withdrawal,
                Money::from_cents(500),
                "sangria",
            )
            .await
            .unwrap();

        // Expected: 10 000 float + 2 000 cash − 500 withdrawal. The debit
        // leg never touches the drawer.
        let close = h
            .service
            .close_shift(&shift.id, Money::from_cents(11_400), "op-1")
            .await
            .unwrap();
        assert_eq!(close.expected_cash.cents(), 11_500);
        assert_eq!(close.difference.cents(), -100);

        // Terminal state: a second close is rejected.
        let err = h
            .service
            .close_shift(&shift.id, Money::from_cents(11_400), "op-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Domain(CoreError::ShiftState(ShiftStateError::AlreadyClosed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_finalize_into_closed_shift_rejected() {
        let h = harness().await;
        let shift = h.service.open_shift("op-1", Money::zero()).await.unwrap();
        h.service
            .close_shift(&shift.id, Money::zero(), "op-1")
            .await
            .unwrap();

        let err = h
            .service
            .finalize(CheckoutRequest {
                shift_id: shift.id.clone(),
                customer_id: None,
                pricing: cart(1_000, 1),
                payments: cash(1_000),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Domain(CoreError::ShiftState(ShiftStateError::NotOpen { .. }))
        ));
    }
}
