//! Tracing setup for the host application.
//!
//! Workers in this workspace emit structured `tracing` events; the
//! embedding binary calls [`init`] once at startup to get them on
//! stderr. Filtering follows `RUST_LOG` (e.g. `pos_sync=debug,sqlx=warn`)
//! with an overridable default.

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Installs the global tracing subscriber. Returns an error when a
/// subscriber is already installed (e.g. called twice, or under a test
/// harness that sets its own).
pub fn init() -> Result<(), crate::error::SyncError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| crate::error::SyncError::Internal(format!("tracing init failed: {e}")))
}
