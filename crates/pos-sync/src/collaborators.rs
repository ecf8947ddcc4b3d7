//! # External Collaborator Seams
//!
//! Trait seams for every system outside the terminal: the backend-of-record
//! that takes finalized sales and closed shifts, the fiscal authority that
//! authorizes documents, the sequence authority that serializes online
//! numbering across terminals, and the payment network for PIX charges.
//!
//! The wire formats behind these traits are deployment-specific; workers
//! depend only on these contracts, and the in-memory doubles below drive
//! the crate's tests.

use async_trait::async_trait;

use pos_core::fiscal::FiscalDocument;
use pos_core::pix::PixCharge;
use pos_core::shift::CashShift;
use pos_core::types::Sale;

use crate::error::SyncResult;

// =============================================================================
// Contracts
// =============================================================================

/// Acknowledgement from the backend-of-record for an accepted sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleAck {
    /// The backend's own identifier for the sale.
    pub backend_id: String,
}

/// The system of record for sales and shifts.
///
/// `submit_sale` must be idempotent on the sale's `local_id`: a resend of
/// an already-accepted sale surfaces as [`SyncError::SyncConflict`], which
/// callers treat as success.
///
/// [`SyncError::SyncConflict`]: crate::error::SyncError::SyncConflict
#[async_trait]
pub trait SaleBackend: Send + Sync {
    async fn submit_sale(&self, sale: &Sale) -> SyncResult<SaleAck>;

    /// Reports a closed shift with its reconciliation.
    async fn submit_shift(&self, shift: &CashShift) -> SyncResult<()>;
}

/// Authorization protocol returned by the fiscal authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityProtocol {
    pub protocol: String,
}

/// The fiscal authority that authorizes documents.
#[async_trait]
pub trait FiscalAuthority: Send + Sync {
    /// Submits a document (fresh or contingency) for authorization.
    async fn authorize(&self, doc: &FiscalDocument) -> SyncResult<AuthorityProtocol>;

    /// Pre-allocates a contingency number range `[start, end]` for a
    /// series, for use while offline.
    async fn reserve_contingency_range(&self, series: i64, count: i64) -> SyncResult<(i64, i64)>;
}

/// Serializes online sequence numbers across terminals: every reservation
/// returns a number no other terminal will ever receive.
#[async_trait]
pub trait SequenceAuthority: Send + Sync {
    async fn reserve_number(&self, series: i64) -> SyncResult<i64>;
}

/// The payment network behind PIX charges.
#[async_trait]
pub trait PaymentNetwork: Send + Sync {
    /// Registers a charge so the network can route the payment and the
    /// confirmation webhook.
    async fn register_charge(&self, charge: &PixCharge) -> SyncResult<()>;
}

// =============================================================================
// In-memory doubles
// =============================================================================
