//! Concurrent client harness.
//!
//! Spawns N independent client threads. Each opens one connection,
//! sends one labeled message, blocks for exactly one reply read, and
//! reports the received bytes. The only coordination is the join-all
//! at the end; reports come back ordered by client index.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Reply buffer size; replies longer than this are truncated by the
/// single read.
const REPLY_BUF_SIZE: usize = 1024;

/// What one client got back from the server.
#[derive(Debug)]
pub struct ClientReport {
    pub index: usize,
    pub payload: Vec<u8>,
}

/// The labeled message client `index` sends.
pub fn message(index: usize) -> String {
    format!("Hello, world[{index}]")
}

/// Run `count` clients in parallel against `addr` and collect their
/// reports.
///
/// The read timeout bounds each client's single reply read so a dead
/// server fails the harness instead of hanging it.
pub fn run_clients(
    addr: SocketAddr,
    count: usize,
    read_timeout: Duration,
) -> io::Result<Vec<ClientReport>> {
    let mut handles = Vec::with_capacity(count);

    for index in 0..count {
        let handle = thread::Builder::new()
            .name(format!("client-{index}"))
            .spawn(move || run_one(addr, index, read_timeout))?;
        handles.push(handle);
    }

    let mut reports = Vec::with_capacity(count);
    for handle in handles {
        let report = handle
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "client thread panicked"))??;
        reports.push(report);
    }

    Ok(reports)
}

fn run_one(addr: SocketAddr, index: usize, read_timeout: Duration) -> io::Result<ClientReport> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(read_timeout))?;

    let msg = message(index);
    stream.write_all(msg.as_bytes())?;

    // Exactly one reply read per client.
    let mut buf = vec![0; REPLY_BUF_SIZE];
    let n = stream.read(&mut buf)?;
    buf.truncate(n);

    debug!(index, received = n, "Client received reply");

    Ok(ClientReport {
        index,
        payload: buf,
    })
}
