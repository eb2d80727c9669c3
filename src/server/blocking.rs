//! Thread-per-connection reference server.
//!
//! The behavioral baseline for the multiplexing server: one thread
//! blocks on accept, and each accepted connection gets a dedicated
//! thread that blocks on read, echoes, and exits on the peer's orderly
//! close. Connection threads share no mutable state, so there is
//! nothing to lock.

use crate::config::Config;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use tracing::{debug, error, info};

/// The blocking echo server.
pub struct BlockingServer {
    listener: TcpListener,
    buffer_size: usize,
}

impl BlockingServer {
    /// Bind the listener. Any error here is fatal to the server.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.listen)?;
        Ok(Self {
            listener,
            buffer_size: config.buffer_size,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever, one echo thread per connection. Does not return
    /// under normal operation.
    pub fn run(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Blocking server listening");

        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    let buffer_size = self.buffer_size;
                    thread::Builder::new()
                        .name(format!("echo-{peer}"))
                        .spawn(move || {
                            if let Err(e) = echo_until_close(stream, buffer_size) {
                                debug!(peer = %peer, error = %e, "Connection error");
                            }
                        })?;
                }
                Err(e) => error!(error = %e, "Accept error"),
            }
        }
    }
}

/// Echo until the peer performs an orderly close (zero-byte read).
fn echo_until_close(mut stream: TcpStream, buffer_size: usize) -> io::Result<()> {
    let mut buf = vec![0; buffer_size];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n])?;
    }
}
