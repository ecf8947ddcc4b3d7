//! # pos-db: Persistence Layer
//!
//! SQLite storage for the terminal. One database file holds everything the
//! offline-first guarantees rest on: finalized sales, the submission
//! queue, shifts, loyalty balances, fiscal documents and PIX charges.
//!
//! ```text
//! checkout / sync agent
//!       │
//!       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                pos-db (THIS CRATE)                  │
//! │                                                     │
//! │  ┌────────────┐  ┌──────────────┐  ┌────────────┐  │
//! │  │  Database  │  │ Repositories │  │ Migrations │  │
//! │  │  (pool.rs) │◄─│ sale, queue, │  │ (embedded) │  │
//! │  │ SqlitePool │  │ shift, ...   │  │            │  │
//! │  └────────────┘  └──────────────┘  └────────────┘  │
//! └─────────────────────────────────────────────────────┘
//!       │
//!       ▼
//!   terminal.db (WAL mode)
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pos_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/terminal.db")).await?;
//! let due = db.queue().list_due(Utc::now(), 10).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::fiscal::FiscalRepository;
pub use repository::loyalty::LoyaltyRepository;
pub use repository::pix::PixChargeRepository;
pub use repository::queue::QueueRepository;
pub use repository::sale::SaleRepository;
pub use repository::shift::ShiftRepository;
