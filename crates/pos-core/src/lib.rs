//! # pos-core: Pure Transaction Logic
//!
//! All business rules of the point-of-sale transaction core as pure
//! functions with zero I/O. Persistence lives in `pos-db`, background
//! agents and collaborator traffic in `pos-sync`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ★ pos-core (THIS CRATE) ★                │
//! │                                                             │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ pricing │ │ loyalty │ │  shift  │ │  money  │           │
//! │  │ 5-step  │ │ reserve │ │ drawer  │ │ centavo │           │
//! │  │pipeline │ │ /commit │ │ recon.  │ │ i64     │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐                       │
//! │  │ fiscal  │ │   pix   │ │  types  │                       │
//! │  │ 44-digit│ │ BR Code │ │  Sale   │                       │
//! │  │   key   │ │ + CRC16 │ │  Shift  │                       │
//! │  └─────────┘ └─────────┘ └─────────┘                       │
//! │                                                             │
//! │  NO I/O • NO DATABASE • NO NETWORK • NO CLOCKS • NO RNG    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//!
//! 1. Deterministic: timestamps and random codes are arguments, never
//!    generated inside.
//! 2. Integer money: all values are centavos in an `i64`, no floats.
//! 3. Typed errors: every failure is a [`CoreError`] variant.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fiscal;
pub mod loyalty;
pub mod money;
pub mod pix;
pub mod pricing;
pub mod shift;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ShiftStateError, ValidationError};
pub use money::Money;
pub use types::*;
