//! # Submission Queue Worker
//!
//! Drains the durable queue of finalized sales toward the backend-of-record.
//!
//! ## Exactly-once pipeline
//! ```text
//! finalize ──► sales + submission_queue (one transaction)
//!                     │
//!                     ▼  poll / kick
//!            ┌─────────────────────┐
//!            │ SubmissionProcessor │
//!            └─────────┬───────────┘
//!                      │ submit_sale(local_id, ...)
//!                      ▼
//!          Ok(ack) ──────────────► remove entry, status Synced,
//!                                  credit loyalty accrual
//!          Err(SyncConflict) ────► same as Ok: the earlier attempt landed
//!          Err(retryable) ───────► attempts+1, backoff schedule
//!          Err(non-retryable) ───► status SyncFailed, parked for operator
//! ```
//! The queue entry is the at-least-once side; the backend's `local_id`
//! dedupe is the at-most-once side. Together: exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use pos_core::loyalty;
use pos_core::types::{QueueEntry, SaleStatus};
use pos_db::Database;

use crate::collaborators::SaleBackend;
use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Processor + Handle
// =============================================================================

/// Background worker that drains the submission queue.
pub struct SubmissionProcessor {
    db: Arc<Database>,
    backend: Arc<dyn SaleBackend>,
    policy: RetryPolicy,
    settings: SyncSettings,
    kick_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling a running [`SubmissionProcessor`].
#[derive(Clone)]
pub struct SubmissionHandle {
    kick_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SubmissionHandle {
    /// Asks the processor to drain now instead of waiting for the next
    /// poll tick (used by the orchestrator on reconnect).
    pub async fn kick(&self) -> SyncResult<()> {
        self.kick_tx
            .send(())
            .await
            .map_err(|e| SyncError::Channel(e.to_string()))
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|e| SyncError::Channel(e.to_string()))
    }
}

impl SubmissionProcessor {
    pub fn new(
        db: Arc<Database>,
        backend: Arc<dyn SaleBackend>,
        settings: SyncSettings,
    ) -> (Self, SubmissionHandle) {
        let (kick_tx, kick_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let processor = SubmissionProcessor {
            db,
            backend,
            policy: RetryPolicy::from_settings(&settings),
            settings,
            kick_rx,
            shutdown_rx,
        };

        let handle = SubmissionHandle {
            kick_tx,
            shutdown_tx,
        };

        (processor, handle)
    }

    /// Runs the processor loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Submission processor starting");

        let poll_interval = Duration::from_secs(self.settings.poll_interval_secs);
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.drain_due().await {
                        error!(?e, "Failed to drain submission queue");
                    }
                }

                Some(()) = self.kick_rx.recv() => {
                    debug!("Drain kick received");
                    if let Err(e) = self.drain_due().await {
                        error!(?e, "Failed to drain submission queue");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Submission processor shutting down");
                    break;
                }
            }
        }

        info!("Submission processor stopped");
    }

    /// One drain pass over the due entries, oldest first.
    pub async fn drain_due(&mut self) -> SyncResult<usize> {
        let due = self
            .db
            .queue()
            .list_due(Utc::now(), self.settings.batch_size)
            .await?;

        if due.is_empty() {
            debug!("No due queue entries");
            return Ok(0);
        }

        info!(count = due.len(), "Draining submission queue");

        let mut submitted = 0;
        for entry in due {
            if self.policy.is_exhausted(entry.attempts) {
                // Parked; waits for operator intervention.
                continue;
            }
            if self.submit_one(&entry).await? {
                submitted += 1;
            }
        }

        Ok(submitted)
    }

    /// Submits a single entry. Returns whether the backend accepted it.
    async fn submit_one(&self, entry: &QueueEntry) -> SyncResult<bool> {
        let Some(sale) = self.db.sales().get(&entry.local_id).await? else {
            // Queue row without a sale: repair by dropping the row.
            warn!(local_id = %entry.local_id, "Queue entry without sale, removing");
            self.db.queue().remove(&entry.local_id).await?;
            return Ok(false);
        };

        if sale.status == SaleStatus::SyncFailed {
            debug!(local_id = %entry.local_id, "Skipping parked sale");
            return Ok(false);
        }

        self.db
            .sales()
            .update_status(&entry.local_id, SaleStatus::Syncing)
            .await?;

        let budget = Duration::from_secs(self.settings.submit_timeout_secs);
        let outcome = match tokio::time::timeout(budget, self.backend.submit_sale(&sale)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.settings.submit_timeout_secs)),
        };

        match outcome {
            Ok(ack) => {
                debug!(local_id = %entry.local_id, backend_id = %ack.backend_id, "Sale accepted");
                self.settle_accepted(&sale).await?;
                Ok(true)
            }

            Err(err) if err.is_already_applied() => {
                // The earlier attempt landed; only its ack was lost.
                info!(local_id = %entry.local_id, "Sale already at backend, settling");
                self.settle_accepted(&sale).await?;
                Ok(true)
            }

            Err(err) if err.is_retryable() => {
                let delay = self.policy.next_delay(entry.attempts);
                let next_retry_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                let attempts = self
                    .db
                    .queue()
                    .record_failure(&entry.local_id, next_retry_at, &err.to_string())
                    .await?;

                if self.policy.is_exhausted(attempts) {
                    warn!(
                        local_id = %entry.local_id,
                        attempts,
                        "Retry budget exhausted, parking sale"
                    );
                    self.db
                        .sales()
                        .update_status(&entry.local_id, SaleStatus::SyncFailed)
                        .await?;
                } else {
                    debug!(
                        local_id = %entry.local_id,
                        attempts,
                        ?delay,
                        "Submission failed, rescheduled"
                    );
                    self.db
                        .sales()
                        .update_status(&entry.local_id, SaleStatus::Queued)
                        .await?;
                }
                Ok(false)
            }

            Err(err) => {
                warn!(local_id = %entry.local_id, %err, "Non-retryable failure, parking sale");
                self.db
                    .queue()
                    .record_failure(&entry.local_id, Utc::now(), &err.to_string())
                    .await?;
                self.db
                    .sales()
                    .update_status(&entry.local_id, SaleStatus::SyncFailed)
                    .await?;
                Ok(false)
            }
        }
    }

    /// Success path: drop the queue entry, mark the sale synced and credit
    /// the loyalty accrual (only now, so points never exist for a sale the
    /// backend does not have).
    async fn settle_accepted(&self, sale: &pos_core::types::Sale) -> SyncResult<()> {
        self.db.queue().remove(&sale.local_id).await?;
        self.db
            .sales()
            .update_status(&sale.local_id, SaleStatus::Synced)
            .await?;

        if let Some(customer_id) = &sale.customer_id {
            let points = loyalty::accrual_for(sale.grand_total);
            if points > 0 {
                let balance = self.db.loyalty().credit(customer_id, points).await?;
                debug!(customer_id = %customer_id, points, balance, "Accrual credited");
            }
        }

        Ok(())
    }

    /// Operator intervention: re-arms a parked sale for immediate retry.
    pub async fn retry_parked(db: &Database, local_id: &str) -> SyncResult<()> {
        db.sales().update_status(local_id, SaleStatus::Queued).await?;
        // Fresh enqueue in case the entry was repaired away; attempts on an
        // existing row are left as-is, the status flip is what un-parks it.
        db.queue().enqueue(local_id, Utc::now()).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
