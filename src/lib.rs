//! A TCP echo service built two ways.
//!
//! The interesting half is the multiplexing server: a single thread
//! services every connection through non-blocking sockets and a
//! readiness loop (epoll on Linux, kqueue on macOS). The blocking
//! thread-per-connection server is kept as the behavioral baseline,
//! and the client harness exercises either one with N parallel
//! clients.

pub mod client;
pub mod config;
pub mod server;
