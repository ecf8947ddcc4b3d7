//! Repository implementations.
//!
//! One repository per aggregate, each a thin handle over the shared pool.
//! Row structs live next to their repository; assembly into the pos-core
//! entities happens here so the core never sees column names.

pub mod fiscal;
pub mod loyalty;
pub mod pix;
pub mod queue;
pub mod sale;
pub mod shift;
