//! Multiplexing event loop.
//!
//! Readiness-based model: one thread, non-blocking sockets, and a poll
//! that tells us which handles are ready before we touch them. Uses
//! epoll on Linux, kqueue on macOS. With zero connections the loop
//! sleeps in `poll` and consumes no CPU.
//!
//! Error taxonomy per socket call:
//! - `WouldBlock`: expected steady state, keep the connection.
//! - zero-byte read: orderly peer close, evict.
//! - any other I/O error: faulted connection, evict.
//! - bind/listen/poll setup failure: fatal, propagates out of `run`.

use crate::config::Config;
use crate::server::connection::{ConnState, Connection, ConnectionRegistry};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const EVENT_CAPACITY: usize = 256;

/// Outcome of one service pass over a connection.
enum Disposition {
    /// Still live; stays in the registry.
    Keep,
    /// Orderly zero-byte close from the peer.
    PeerClosed,
}

/// The single-threaded multiplexing echo server.
///
/// The listening socket is owned here for the whole run and is never
/// part of the connection registry.
pub struct MuxServer {
    poll: Poll,
    listener: TcpListener,
    connections: ConnectionRegistry,
    read_buf: Vec<u8>,
}

impl MuxServer {
    /// Bind the listener and set up the poller.
    ///
    /// This is the only fallible setup; any error here is fatal to the
    /// server.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let poll = Poll::new()?;
        let listener = create_listener(addr, config.backlog)?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            connections: ConnectionRegistry::new(config.max_connections),
            read_buf: vec![0; config.buffer_size],
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the event loop. Does not return under normal operation.
    pub fn run(mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);

        info!(addr = %self.local_addr()?, "Multiplexing server listening");

        loop {
            self.poll.poll(&mut events, None)?;

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_connections(),
                    Token(conn_id) => {
                        // Events may still be queued for an id evicted
                        // earlier in this batch.
                        if !self.connections.contains(conn_id) {
                            continue;
                        }
                        match self.service_connection(conn_id, event) {
                            Ok(Disposition::Keep) => {}
                            Ok(Disposition::PeerClosed) => {
                                debug!(conn_id, "Peer closed connection");
                                self.close_connection(conn_id);
                            }
                            Err(e) => {
                                debug!(conn_id, error = %e, "Connection fault");
                                self.close_connection(conn_id);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Drain the accept queue without blocking.
    ///
    /// `WouldBlock` means no pending connection and is the expected
    /// steady-state outcome; accept failures never take the loop down.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        // mio accept already returns the stream in non-blocking mode.
        let conn_id = match self.connections.insert(Connection::new(stream, peer)) {
            Some(id) => id,
            None => {
                // Dropping the stream closes it.
                warn!(peer = %peer, "Connection limit reached, rejecting");
                return;
            }
        };

        let registered = match self.connections.get_mut(conn_id) {
            Some(conn) => self.poll.registry().register(
                &mut conn.stream,
                Token(conn_id),
                Interest::READABLE,
            ),
            None => return,
        };

        match registered {
            Ok(()) => debug!(conn_id, peer = %peer, "Accepted connection"),
            Err(e) => {
                error!(conn_id, peer = %peer, error = %e, "Failed to register connection");
                self.connections.remove(conn_id);
            }
        }
    }

    fn service_connection(
        &mut self,
        conn_id: usize,
        event: &mio::event::Event,
    ) -> io::Result<Disposition> {
        if event.is_readable() {
            if let Disposition::PeerClosed = self.handle_readable(conn_id)? {
                return Ok(Disposition::PeerClosed);
            }
        }

        if event.is_writable() && self.connections.contains(conn_id) {
            self.handle_writable(conn_id)?;
        }

        Ok(Disposition::Keep)
    }

    /// Read until the socket has nothing more, echoing each chunk back
    /// on the same connection in receipt order.
    fn handle_readable(&mut self, conn_id: usize) -> io::Result<Disposition> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        loop {
            match conn.stream.read(&mut self.read_buf) {
                Ok(0) => return Ok(Disposition::PeerClosed),
                Ok(n) => echo(conn, &self.read_buf[..n])?,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if conn.state == ConnState::Draining {
            // A blocked echo left bytes queued; watch for writability
            // as well so the queue gets flushed.
            self.poll.registry().reregister(
                &mut conn.stream,
                Token(conn_id),
                Interest::READABLE | Interest::WRITABLE,
            )?;
        }

        Ok(Disposition::Keep)
    }

    /// Flush queued echo bytes now that the socket is writable again.
    fn handle_writable(&mut self, conn_id: usize) -> io::Result<()> {
        let conn = self
            .connections
            .get_mut(conn_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        while conn.has_pending() {
            match conn.stream.write(&conn.pending[..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => {
                    conn.flushed(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        // Fully drained: back to read-only interest.
        self.poll
            .registry()
            .reregister(&mut conn.stream, Token(conn_id), Interest::READABLE)?;

        Ok(())
    }

    /// Evict a connection: deregister, remove by id, drop the handle.
    ///
    /// Idempotent; once removed the record's handle is never touched
    /// again.
    fn close_connection(&mut self, conn_id: usize) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(conn_id, peer = %conn.peer, "Connection closed");
        }
    }
}

/// Write `bytes` back to the connection, queueing whatever the socket
/// will not take right now.
fn echo(conn: &mut Connection, bytes: &[u8]) -> io::Result<()> {
    // Bytes queued earlier must go out first to keep receipt order.
    if conn.has_pending() {
        conn.queue(bytes);
        return Ok(());
    }

    let mut offset = 0;
    while offset < bytes.len() {
        match conn.stream.write(&bytes[offset..]) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => offset += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.queue(&bytes[offset..]);
                return Ok(());
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Create the listening socket with the configured backlog, already in
/// non-blocking mode before `listen`.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    Ok(socket.into())
}
