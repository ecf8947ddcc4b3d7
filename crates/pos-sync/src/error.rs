//! # Sync Error Types
//!
//! Errors for the background workers and their collaborators.
//!
//! ## Error Hierarchy
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Configuration   │  Backend-of-record  │  Fiscal authority        │
//! │                  │                     │                          │
//! │  InvalidConfig   │  BackendUnavailable │  AuthorityUnavailable    │
//! │  ConfigLoad/Save │  Timeout            │  AuthorityRejected       │
//! │                  │  SyncConflict       │  FiscalReservation       │
//! ├──────────────────┴─────────────────────┴──────────────────────────┤
//! │  Payments: ChargeExpired  │  Storage: Database  │  Internal/...   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//! The `is_retryable` categorization drives the queue's backoff: a
//! retryable failure is rescheduled, everything else needs a human.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Error type covering all background-worker failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Backend-of-record Errors
    // =========================================================================
    /// The backend cannot be reached (offline, DNS, refused).
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A submission attempt exceeded its time budget.
    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    /// The backend already has this sale. Treated as success: the
    /// earlier attempt landed even though its response was lost.
    #[error("Sale {local_id} already accepted by backend")]
    SyncConflict { local_id: String },

    /// The backend rejected the sale outright (schema, auth, closed
    /// accounting period). Not retryable; goes to the intervention list.
    #[error("Backend rejected sale {local_id}: {reason}")]
    BackendRejected { local_id: String, reason: String },

    // =========================================================================
    // Fiscal Errors
    // =========================================================================
    /// Could not reserve a sequence number (authority or local pool).
    #[error("Fiscal sequence reservation failed: {0}")]
    FiscalReservation(String),

    /// The fiscal authority rejected a document.
    #[error("Fiscal authority rejected {access_key}: {reason}")]
    AuthorityRejected {
        access_key: String,
        reason: String,
        /// Some rejections (authority overload, transient validation
        /// infrastructure) clear on resubmission.
        retryable: bool,
    },

    /// The fiscal authority cannot be reached.
    #[error("Fiscal authority unavailable: {0}")]
    AuthorityUnavailable(String),

    // =========================================================================
    // Payment Errors
    // =========================================================================
    /// A confirmation arrived for a charge past its TTL.
    #[error("PIX charge {tx_id} expired")]
    ChargeExpired { tx_id: String },

    // =========================================================================
    // Storage / Internal Errors
    // =========================================================================
    /// Local database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Business-rule failure bubbled up from pos-core.
    #[error("Domain error: {0}")]
    Domain(#[from] pos_core::CoreError),

    /// Failed to (de)serialize a payload.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Channel send/receive failed (peer worker gone).
    #[error("Channel error: {0}")]
    Channel(String),

    /// Worker is shutting down.
    #[error("Worker is shutting down")]
    ShuttingDown,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<pos_db::DbError> for SyncError {
    fn from(err: pos_db::DbError) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// True when the operation can be retried later with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::BackendUnavailable(_)
            | SyncError::Timeout(_)
            | SyncError::AuthorityUnavailable(_)
            | SyncError::FiscalReservation(_) => true,
            SyncError::AuthorityRejected { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// True when the failure actually means the work already succeeded.
    pub fn is_already_applied(&self) -> bool {
        matches!(self, SyncError::SyncConflict { .. })
    }

    /// True for configuration problems (fix the file, not the network).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
