//! # pos-sync
//!
//! Checkout coordination and the offline-first background workers.
//!
//! ## Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CheckoutService                           │
//! │     shifts • pricing • finalize • PIX legs • fiscal issue        │
//! └────────┬──────────────────┬──────────────────┬───────────────────┘
//!          │                  │                  │
//!          ▼                  ▼                  ▼
//!   SubmissionProcessor   FiscalIssuer     PixChargeManager
//!   (queue worker,        (numbering,      (charges, webhooks,
//!    backoff, dedupe)      contingency,     expiry sweep)
//!                          replay)
//!          ▲                  ▲                  ▲
//!          └──────────────────┼──────────────────┘
//!                             │
//!                     SyncOrchestrator
//!              (connectivity watch, reconnect sequence)
//! ```
//!
//! All outward seams — backend-of-record, fiscal authority, payment
//! network — are `async_trait` objects in [`collaborators`], so every
//! worker is testable against mocks and transport choices stay out of
//! this crate.

pub mod checkout;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fiscal;
pub mod logging;
pub mod orchestrator;
pub mod pix;
pub mod queue;
pub mod retry;

pub use checkout::{CheckoutRequest, CheckoutService, FinalizedSale};
pub use collaborators::{
    AuthorityProtocol, FiscalAuthority, PaymentNetwork, SaleAck, SaleBackend, SequenceAuthority,
};
pub use config::PosConfig;
pub use error::{SyncError, SyncResult};
pub use fiscal::FiscalIssuer;
pub use orchestrator::{OrchestratorHandle, SyncOrchestrator};
pub use pix::PixChargeManager;
pub use queue::{SubmissionHandle, SubmissionProcessor};
pub use retry::RetryPolicy;
