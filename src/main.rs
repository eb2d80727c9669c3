//! mux-echo: a TCP echo service built two ways.
//!
//! Modes:
//! - `mux`: single-threaded multiplexing server driven by a readiness
//!   loop (epoll/kqueue via mio)
//! - `blocking`: thread-per-connection reference server
//! - `client`: concurrent client harness exercising whichever server
//!   is listening

use mux_echo::client;
use mux_echo::config::{Config, Mode};
use mux_echo::server::blocking::BlockingServer;
use mux_echo::server::mux::MuxServer;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Bounds each harness client's reply read.
const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        mode = ?config.mode,
        "Starting mux-echo"
    );

    match config.mode {
        Mode::Mux => MuxServer::bind(&config)?.run()?,
        Mode::Blocking => BlockingServer::bind(&config)?.run()?,
        Mode::Client => {
            let addr: SocketAddr = config.listen.parse()?;
            let reports = client::run_clients(addr, config.clients, CLIENT_READ_TIMEOUT)?;
            for report in &reports {
                info!(
                    client = report.index,
                    "Received {:?}",
                    String::from_utf8_lossy(&report.payload)
                );
            }
        }
    }

    Ok(())
}
