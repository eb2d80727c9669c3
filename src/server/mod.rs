//! The two echo server models.
//!
//! - `mux`: single-threaded readiness-multiplexed server, the core of
//!   this crate
//! - `blocking`: thread-per-connection baseline with identical
//!   external echo semantics
//!
//! Shared connection bookkeeping lives in `connection`.

pub mod blocking;
pub mod connection;
pub mod mux;
