//! # Sync Orchestrator
//!
//! Watches connectivity and, on every offline→online transition, runs the
//! reconnect sequence:
//!
//! ```text
//! 1. report closed shifts the backend has not seen
//! 2. kick the submission queue (oldest sales first)
//! 3. replay the fiscal backlog (contingency + interrupted submissions)
//! 4. replenish the contingency number pool if it ran low
//! ```
//!
//! Ordering matters: shifts provide the accounting frame the backend files
//! sales under, and the fiscal replay must not race the sales that the
//! documents reference. Each step is idempotent, so a half-finished
//! sequence (connection dropped again) simply reruns next time.
//!
//! Connectivity arrives on a `tokio::sync::watch` channel; who flips it
//! (network probe, transport layer) is not this module's concern.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use pos_db::Database;

use crate::collaborators::SaleBackend;
use crate::error::{SyncError, SyncResult};
use crate::fiscal::FiscalIssuer;
use crate::pix::PixChargeManager;
use crate::queue::SubmissionHandle;

// =============================================================================
// Orchestrator + Handle
// =============================================================================

/// Reconnect orchestrator. Owns the reconnect sequence; the queue worker
/// and the fiscal issuer do the per-item work.
pub struct SyncOrchestrator {
    db: Arc<Database>,
    backend: Arc<dyn SaleBackend>,
    issuer: Arc<FiscalIssuer>,
    pix: Arc<PixChargeManager>,
    queue: SubmissionHandle,
    connectivity_rx: watch::Receiver<bool>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling a running [`SyncOrchestrator`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl OrchestratorHandle {
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|e| SyncError::Channel(e.to_string()))
    }
}

impl SyncOrchestrator {
    pub fn new(
        db: Arc<Database>,
        backend: Arc<dyn SaleBackend>,
        issuer: Arc<FiscalIssuer>,
        pix: Arc<PixChargeManager>,
        queue: SubmissionHandle,
        connectivity_rx: watch::Receiver<bool>,
    ) -> (Self, OrchestratorHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let orchestrator = SyncOrchestrator {
            db,
            backend,
            issuer,
            pix,
            queue,
            connectivity_rx,
            shutdown_rx,
        };

        (orchestrator, OrchestratorHandle { shutdown_tx })
    }

    /// Runs the orchestrator loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Sync orchestrator starting");

        // Expiry sweep for PIX charges rides on a slow ticker.
        let mut sweep = tokio::time::interval(std::time::Duration::from_secs(60));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // If we start already online, run the sequence once for anything
        // left over from the previous process.
        if *self.connectivity_rx.borrow() {
            if let Err(e) = self.on_reconnect().await {
                error!(?e, "Startup reconnect sequence failed");
            }
        }

        loop {
            tokio::select! {
                changed = self.connectivity_rx.changed() => {
                    if changed.is_err() {
                        warn!("Connectivity channel closed, stopping");
                        break;
                    }
                    let online = *self.connectivity_rx.borrow_and_update();
                    if online {
                        info!("Connectivity restored");
                        if let Err(e) = self.on_reconnect().await {
                            error!(?e, "Reconnect sequence failed");
                        }
                    } else {
                        info!("Connectivity lost, entering offline mode");
                    }
                }

                _ = sweep.tick() => {
                    if let Err(e) = self.pix.expire_due(Utc::now()).await {
                        error!(?e, "PIX expiry sweep failed");
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync orchestrator shutting down");
                    break;
                }
            }
        }

        info!("Sync orchestrator stopped");
    }

    /// The reconnect sequence. Public so tests (and a manual "sync now"
    /// action) can run it without the loop.
    pub async fn on_reconnect(&self) -> SyncResult<()> {
        self.report_closed_shifts().await?;

        self.queue.kick().await?;

        match self.issuer.replay_pending().await {
            Ok(authorized) if authorized > 0 => {
                info!(authorized, "Fiscal backlog replayed");
            }
            Ok(_) => {}
            Err(e) if e.is_retryable() => {
                // Connection flapped mid-replay; the next transition
                // picks the backlog up again.
                debug!(?e, "Fiscal replay interrupted");
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.issuer.replenish_pool_if_low().await {
            // Non-fatal: the existing pool keeps working.
            warn!(?e, "Contingency pool replenishment failed");
        }

        Ok(())
    }

    /// Step 1: closed shifts the backend has not acknowledged yet.
    async fn report_closed_shifts(&self) -> SyncResult<()> {
        let unreported = self.db.shifts().list_unreported_closed().await?;
        if unreported.is_empty() {
            return Ok(());
        }

        info!(count = unreported.len(), "Reporting closed shifts");
        for shift in unreported {
            match self.backend.submit_shift(&shift).await {
                Ok(()) => {
                    self.db.shifts().mark_reported(&shift.id, Utc::now()).await?;
                    debug!(shift_id = %shift.id, "Shift reported");
                }
                Err(e) if e.is_retryable() => {
                    debug!(shift_id = %shift.id, ?e, "Shift report interrupted");
                    return Ok(()); // retried on the next transition
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
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
    use crate::queue::tests_support::minimal_sale;
    use crate::queue::SubmissionProcessor;
    use pos_core::fiscal::{EmitterInfo, FiscalStatus};
    use pos_core::money::Money;
    use pos_core::shift::CashShift;
    use pos_db::DbConfig;

    struct Harness {
        db: Arc<Database>,
        backend: Arc<MockBackend>,
        issuer: Arc<FiscalIssuer>,
        orchestrator: SyncOrchestrator,
        // Dropping the handle closes the shutdown channel and stops run().
        _handle: OrchestratorHandle,
        _queue_task: tokio::task::JoinHandle<()>,
    }

    async fn harness(connectivity_rx: watch::Receiver<bool>) -> Harness {
        let db = Arc::new(Database::new(DbConfig::in_memory()).await.unwrap());
        let backend = Arc::new(MockBackend::default());
        let authority = Arc::new(MockAuthority::default());

        let emitter = EmitterInfo {
            cnpj: "12345678000195".into(),
            uf_code: "35".into(),
            name: "Mercado Exemplo LTDA".into(),
            fantasy_name: None,
        };
        let issuer = Arc::new(FiscalIssuer::new(
            db.clone(),
            authority,
            Arc::new(MockSequence::starting_at(1)),
            emitter,
            FiscalSettings::default(),
        ));
        issuer.ensure_contingency_pool().await.unwrap();

        let pix = Arc::new(PixChargeManager::new(
            db.clone(),
            Arc::new(MockNetwork::default()),
            EmitterConfig::default(),
            PixSettings::default(),
        ));

        let settings = SyncSettings {
            poll_interval_secs: 3600,
            ..SyncSettings::default()
        };
        let (queue_processor, queue_handle) =
            SubmissionProcessor::new(db.clone(), backend.clone(), settings);
        let queue_task = tokio::spawn(queue_processor.run());

        let (orchestrator, handle) = SyncOrchestrator::new(
            db.clone(),
            backend.clone(),
            issuer.clone(),
            pix,
            queue_handle,
            connectivity_rx,
        );

        Harness {
            db,
            backend,
            issuer,
            orchestrator,
            _handle: handle,
            _queue_task: queue_task,
        }
    }

    #[tokio::test]
    async fn test_reconnect_sequence_flushes_everything() {
        let (_tx, rx) = watch::channel(true);
        let h = harness(rx).await;

        // Offline backlog: a closed shift, a queued sale and a
        // contingency document.
        let mut shift = CashShift::open("shift-1", 1, "op-1", Money::zero(), Utc::now()).unwrap();
        h.db.shifts().insert_open(&shift).await.unwrap();
        h.db.sales()
            .insert_finalized(&minimal_sale("sale-1", 1, "shift-1"))
            .await
            .unwrap();
        h.issuer.issue("sale-1", false).await.unwrap();
        let close = shift
            .close(Money::zero(), "op-1", Utc::now())
            .unwrap()
            .clone();
        h.db.shifts().close("shift-1", &close).await.unwrap();

        h.orchestrator.on_reconnect().await.unwrap();

        // Shift reported and remembered as such.
        assert_eq!(h.backend.accepted_shifts.lock().unwrap().as_slice(), ["shift-1"]);
        assert!(h.db.shifts().list_unreported_closed().await.unwrap().is_empty());

        // Document authorized without renumbering.
        let doc = h.db.fiscal().get_by_sale("sale-1").await.unwrap().unwrap();
        assert_eq!(doc.status, FiscalStatus::Authorized);

        // The queue drain runs in the worker task; wait for it.
        for _ in 0..50 {
            if h.db.queue().depth().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(h.db.queue().depth().await.unwrap(), 0);
        assert_eq!(h.backend.accepted_sales.lock().unwrap().as_slice(), ["sale-1"]);
    }

    #[tokio::test]
    async fn test_reconnect_is_idempotent() {
        let (_tx, rx) = watch::channel(true);
        let h = harness(rx).await;

        let mut shift = CashShift::open("shift-1", 1, "op-1", Money::zero(), Utc::now()).unwrap();
        h.db.shifts().insert_open(&shift).await.unwrap();
        let close = shift
            .close(Money::zero(), "op-1", Utc::now())
            .unwrap()
            .clone();
        h.db.shifts().close("shift-1", &close).await.unwrap();

        h.orchestrator.on_reconnect().await.unwrap();
        h.orchestrator.on_reconnect().await.unwrap();

        // The shift went over exactly once.
        assert_eq!(h.backend.accepted_shifts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_reacts_to_connectivity_transition() {
        let (tx, rx) = watch::channel(false);
        let h = harness(rx).await;

        let mut shift = CashShift::open("shift-1", 1, "op-1", Money::zero(), Utc::now()).unwrap();
        h.db.shifts().insert_open(&shift).await.unwrap();
        let close = shift
            .close(Money::zero(), "op-1", Utc::now())
            .unwrap()
            .clone();
        h.db.shifts().close("shift-1", &close).await.unwrap();

        let db = h.db.clone();
        let backend = h.backend.clone();
        let task = tokio::spawn(h.orchestrator.run());

        // Nothing happens while offline.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(backend.accepted_shifts.lock().unwrap().is_empty());

        tx.send(true).unwrap();
        for _ in 0..50 {
            if !db.shifts().list_unreported_closed().await.unwrap().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            } else {
                break;
            }
        }
        assert_eq!(backend.accepted_shifts.lock().unwrap().as_slice(), ["shift-1"]);

        drop(tx); // closing the channel stops the loop
        task.await.unwrap();
    }
}
