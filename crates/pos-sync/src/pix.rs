//! # PIX Charge Manager
//!
//! Creates charges for PIX payment legs, registers them with the payment
//! network, applies confirmations (webhook or operator) and sweeps expired
//! charges.
//!
//! Confirmation rules live in [`pos_core::pix`]; this worker only wires
//! them to storage and the network, so the "late webhook is rejected,
//! operator assertion overrides" semantics are identical everywhere.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use pos_core::money::Money;
use pos_core::pix::{BrCodeRequest, PixCharge};
use pos_db::Database;

use crate::collaborators::PaymentNetwork;
use crate::config::{EmitterConfig, PixSettings};
use crate::error::{SyncError, SyncResult};

/// Creates and settles PIX charges.
pub struct PixChargeManager {
    db: Arc<Database>,
    network: Arc<dyn PaymentNetwork>,
    emitter: EmitterConfig,
    settings: PixSettings,
}

impl PixChargeManager {
    pub fn new(
        db: Arc<Database>,
        network: Arc<dyn PaymentNetwork>,
        emitter: EmitterConfig,
        settings: PixSettings,
    ) -> Self {
        PixChargeManager {
            db,
            network,
            emitter,
            settings,
        }
    }

    /// Creates a pending charge for one payment leg and registers it with
    /// the network. The BR Code payload is returned to the caller for the
    /// on-screen QR code.
    pub async fn create_charge(
        &self,
        sale_local_id: &str,
        amount: Money,
    ) -> SyncResult<PixCharge> {
        let tx_id = random_tx_id();
        let now = Utc::now();

        let display_name = self
            .emitter
            .fantasy_name
            .as_deref()
            .unwrap_or(&self.emitter.name);

        let charge = PixCharge::create(
            tx_id.clone(),
            sale_local_id,
            &BrCodeRequest {
                pix_key: &self.settings.key,
                amount,
                merchant_name: display_name,
                merchant_city: &self.emitter.city,
                tx_id: &tx_id,
            },
            self.settings.ttl_minutes,
            now,
        )?;

        self.db.pix_charges().insert(&charge).await?;

        // Bounded call: a hanging network resolves to a retryable timeout
        // instead of stalling the checkout.
        let budget = Duration::from_secs(self.settings.call_timeout_secs);
        match tokio::time::timeout(budget, self.network.register_charge(&charge)).await {
            Ok(result) => result?,
            Err(_) => return Err(SyncError::Timeout(self.settings.call_timeout_secs)),
        }

        info!(tx_id = %charge.tx_id, sale = %sale_local_id, "PIX charge created");
        Ok(charge)
    }

    /// Applies a network confirmation webhook. A webhook for an expired
    /// charge is rejected and the expiry is persisted.
    pub async fn confirm_from_network(&self, tx_id: &str) -> SyncResult<PixCharge> {
        let mut charge = self.load(tx_id).await?;

        match charge.mark_paid_network(Utc::now()) {
            Ok(()) => {
                self.db
                    .pix_charges()
                    .set_status(tx_id, charge.status, charge.confirmation)
                    .await?;
                debug!(tx_id, "Charge confirmed by network");
                Ok(charge)
            }
            Err(err) => {
                warn!(tx_id, "Late webhook for expired charge rejected");
                self.db
                    .pix_charges()
                    .set_status(tx_id, charge.status, charge.confirmation)
                    .await?;
                Err(err.into())
            }
        }
    }

    /// Applies an operator assertion ("the payment is in the bank app").
    /// Allowed even past expiry; the confirmation source is the audit
    /// trail for the override.
    pub async fn confirm_from_operator(&self, tx_id: &str) -> SyncResult<PixCharge> {
        let mut charge = self.load(tx_id).await?;
        charge.mark_paid_operator();
        self.db
            .pix_charges()
            .set_status(tx_id, charge.status, charge.confirmation)
            .await?;
        info!(tx_id, "Charge confirmed by operator assertion");
        Ok(charge)
    }

    /// Expires pending charges past their TTL. Returns how many flipped.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> SyncResult<u64> {
        let expired = self.db.pix_charges().expire_due(now).await?;
        if expired > 0 {
            debug!(expired, "Expired pending PIX charges");
        }
        Ok(expired)
    }

    async fn load(&self, tx_id: &str) -> SyncResult<PixCharge> {
        self.db
            .pix_charges()
            .get(tx_id)
            .await?
            .ok_or_else(|| SyncError::Internal(format!("unknown PIX charge {tx_id}")))
    }
}

/// 25-char lowercase hex transaction id.
fn random_tx_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..25)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
