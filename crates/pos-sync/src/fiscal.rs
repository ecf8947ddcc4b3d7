//! # Fiscal Issuer
//!
//! Issues fiscal documents for finalized sales, online or in contingency,
//! and replays the backlog after reconnect.
//!
//! ## Issuance paths
//! ```text
//! online:   SequenceAuthority.reserve_number ─► build (tpEmis=1)
//!              ─► insert ─► authorize ─► Authorized | Rejected
//!                                     └► (authority down) Submitted,
//!                                        replayed later
//!
//! offline:  contingency_counters (local pool) ─► build (tpEmis=9)
//!              ─► insert as ContingencyIssued ─► replayed on reconnect
//! ```
//! The sequence number and access key are frozen at issuance. Replay only
//! ever moves the status; an authorization after reconnect never renumbers
//! the document or touches the sale.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use pos_core::fiscal::{EmissionKind, EmitterInfo, FiscalDocument, FiscalStatus};
use pos_db::Database;

use crate::collaborators::{FiscalAuthority, SequenceAuthority};
use crate::config::FiscalSettings;
use crate::error::{SyncError, SyncResult};

/// Issues and replays fiscal documents.
pub struct FiscalIssuer {
    db: Arc<Database>,
    authority: Arc<dyn FiscalAuthority>,
    sequence: Arc<dyn SequenceAuthority>,
    emitter: EmitterInfo,
    settings: FiscalSettings,
}

impl FiscalIssuer {
    pub fn new(
        db: Arc<Database>,
        authority: Arc<dyn FiscalAuthority>,
        sequence: Arc<dyn SequenceAuthority>,
        emitter: EmitterInfo,
        settings: FiscalSettings,
    ) -> Self {
        FiscalIssuer {
            db,
            authority,
            sequence,
            emitter,
            settings,
        }
    }

    /// Bounds an authority call so a hanging peer resolves to a retryable
    /// timeout instead of stalling issuance.
    async fn with_budget<T>(&self, call: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        let budget = Duration::from_secs(self.settings.call_timeout_secs);
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.settings.call_timeout_secs)),
        }
    }

    /// Installs the configured contingency range. Called at startup;
    /// extending an existing pool is a no-op when nothing grew.
    pub async fn ensure_contingency_pool(&self) -> SyncResult<()> {
        self.db
            .fiscal()
            .seed_contingency_range(
                self.settings.series,
                self.settings.contingency_start,
                self.settings.contingency_end,
            )
            .await?;
        Ok(())
    }

    /// Asks the authority for a fresh contingency range while online, so
    /// the pool never runs dry mid-outage.
    pub async fn replenish_pool_if_low(&self) -> SyncResult<()> {
        let remaining = self
            .db
            .fiscal()
            .contingency_remaining(self.settings.series)
            .await?;

        if remaining >= self.settings.low_pool_threshold {
            return Ok(());
        }

        warn!(
            series = self.settings.series,
            remaining, "Contingency pool low, requesting new range"
        );
        let (start, end) = self
            .with_budget(
                self.authority
                    .reserve_contingency_range(self.settings.series, self.settings.low_pool_threshold * 4),
            )
            .await?;
        self.db
            .fiscal()
            .seed_contingency_range(self.settings.series, start, end)
            .await?;

        Ok(())
    }

    /// Issues a document for a finalized sale.
    ///
    /// `online` reflects current connectivity. When the online sequence
    /// reservation itself fails, issuance falls back to contingency so the
    /// customer is never held hostage to the network.
    pub async fn issue(&self, sale_local_id: &str, online: bool) -> SyncResult<FiscalDocument> {
        if online {
            match self
                .with_budget(self.sequence.reserve_number(self.settings.series))
                .await
            {
                Ok(number) => return self.issue_online(sale_local_id, number).await,
                Err(err) if err.is_retryable() => {
                    warn!(%err, "Online sequence reservation failed, falling back to contingency");
                }
                Err(err) => return Err(err),
            }
        }

        self.issue_contingency(sale_local_id).await
    }

    async fn issue_online(
        &self,
        sale_local_id: &str,
        number: i64,
    ) -> SyncResult<FiscalDocument> {
        let mut doc = FiscalDocument::build(
            &self.emitter,
            self.settings.series,
            number,
            sale_local_id,
            EmissionKind::Normal,
            random_code(),
            Utc::now(),
        )?;
        self.db.fiscal().insert(&doc).await?;

        match self.with_budget(self.authority.authorize(&doc)).await {
            Ok(protocol) => {
                info!(access_key = %doc.access_key, "Document authorized");
                doc.status = FiscalStatus::Authorized;
                doc.authority_protocol = Some(protocol.protocol.clone());
                self.db
                    .fiscal()
                    .set_status(&doc.access_key, FiscalStatus::Authorized, Some(&protocol.protocol))
                    .await?;
                Ok(doc)
            }

            Err(SyncError::AuthorityRejected {
                access_key,
                reason,
                retryable: false,
            }) => {
                // Number burned; the row is the gap record.
                warn!(%access_key, %reason, "Document rejected");
                self.db
                    .fiscal()
                    .set_status(&doc.access_key, FiscalStatus::Rejected, None)
                    .await?;
                Err(SyncError::AuthorityRejected {
                    access_key,
                    reason,
                    retryable: false,
                })
            }

            Err(err) => {
                // Authority unreachable (or transiently rejecting): park as
                // Submitted and let the replay finish the job.
                debug!(access_key = %doc.access_key, %err, "Authorization pending, will replay");
                doc.status = FiscalStatus::Submitted;
                self.db
                    .fiscal()
                    .set_status(&doc.access_key, FiscalStatus::Submitted, None)
                    .await?;
                Ok(doc)
            }
        }
    }

    async fn issue_contingency(&self, sale_local_id: &str) -> SyncResult<FiscalDocument> {
        let number = self
            .db
            .fiscal()
            .reserve_contingency_number(self.settings.series)
            .await
            .map_err(|e| SyncError::FiscalReservation(e.to_string()))?;

        let doc = FiscalDocument::build(
            &self.emitter,
            self.settings.series,
            number,
            sale_local_id,
            EmissionKind::Contingency,
            random_code(),
            Utc::now(),
        )?;
        self.db.fiscal().insert(&doc).await?;

        info!(
            access_key = %doc.access_key,
            number,
            "Contingency document issued"
        );
        Ok(doc)
    }

    /// Replays every document still awaiting the authority, in issuance
    /// order. Stops at the first connectivity failure (the rest would
    /// fail the same way); rejections are recorded and do not stop the
    /// sweep. Returns how many were authorized.
    pub async fn replay_pending(&self) -> SyncResult<usize> {
        let pending = self.db.fiscal().list_awaiting_authority().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!(count = pending.len(), "Replaying fiscal backlog");

        let mut authorized = 0;
        for doc in pending {
            match self.with_budget(self.authority.authorize(&doc)).await {
                Ok(protocol) => {
                    self.db
                        .fiscal()
                        .set_status(&doc.access_key, FiscalStatus::Authorized, Some(&protocol.protocol))
                        .await?;
                    authorized += 1;
                }

                Err(SyncError::AuthorityRejected {
                    reason, retryable: false, ..
                }) => {
                    warn!(access_key = %doc.access_key, %reason, "Replayed document rejected");
                    self.db
                        .fiscal()
                        .set_status(&doc.access_key, FiscalStatus::Rejected, None)
                        .await?;
                }

                Err(err) if err.is_retryable() => {
                    debug!(%err, "Authority unreachable, stopping replay");
                    break;
                }

                Err(err) => return Err(err),
            }
        }

        Ok(authorized)
    }
}

/// 8-digit cNF for the access key.
fn random_code() -> u32 {
    rand::thread_rng().gen_range(0..100_000_000)
}

// =============================================================================
// Tests
// =============================================================================
