//! Connection records and the registry that owns them.
//!
//! The registry is the only owner of connection handles. Records are
//! keyed by a slab index that doubles as the poll token, so eviction
//! is always delete-by-key and never a positional scan of a live
//! collection.

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reads are serviced as they become ready; nothing queued for write.
    Echoing,
    /// Echoed bytes are queued; writable interest stays registered
    /// until the queue is flushed.
    Draining,
}

/// A single admitted client connection.
#[derive(Debug)]
pub struct Connection {
    /// Non-blocking socket handle.
    pub stream: TcpStream,
    /// Peer address recorded at admission.
    pub peer: SocketAddr,
    /// Current connection state.
    pub state: ConnState,
    /// Echo bytes not yet accepted by the socket, in receipt order.
    pub(crate) pending: BytesMut,
}

impl Connection {
    /// Create a new connection in initial echoing state.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: ConnState::Echoing,
            pending: BytesMut::new(),
        }
    }

    /// Queue echo bytes that the socket would not accept yet.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if !self.pending.is_empty() {
            self.state = ConnState::Draining;
        }
    }

    /// Bytes still waiting to be written, oldest first.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop `n` flushed bytes from the front of the queue.
    ///
    /// Returns `true` once the queue is fully drained and the
    /// connection is back in `Echoing` state.
    pub fn flushed(&mut self, n: usize) -> bool {
        self.pending.advance(n);
        if self.pending.is_empty() {
            self.state = ConnState::Echoing;
            true
        } else {
            false
        }
    }
}

/// Registry of admitted connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove by connection id.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Remove a connection from the registry.
    ///
    /// Dropping the returned record closes the handle; after removal
    /// no further operation is performed on it.
    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        if self.connections.contains(id) {
            Some(self.connections.remove(id))
        } else {
            None
        }
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of admitted connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;

    // Real sockets: mio streams cannot be constructed from thin air.
    fn connection_pair() -> (StdListener, Connection) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let sock = std::net::TcpStream::connect(addr).unwrap();
        sock.set_nonblocking(true).unwrap();
        let peer = sock.peer_addr().unwrap();
        let conn = Connection::new(TcpStream::from_std(sock), peer);
        (listener, conn)
    }

    #[test]
    fn test_pending_queue_state_transitions() {
        let (_listener, mut conn) = connection_pair();

        assert_eq!(conn.state, ConnState::Echoing);
        assert!(!conn.has_pending());

        conn.queue(b"hello ");
        conn.queue(b"world");
        assert_eq!(conn.state, ConnState::Draining);
        assert_eq!(conn.pending(), b"hello world");

        // Partial flush keeps draining, order preserved
        assert!(!conn.flushed(6));
        assert_eq!(conn.state, ConnState::Draining);
        assert_eq!(conn.pending(), b"world");

        assert!(conn.flushed(5));
        assert_eq!(conn.state, ConnState::Echoing);
        assert!(!conn.has_pending());
    }

    #[test]
    fn test_queue_empty_slice_is_a_noop() {
        let (_listener, mut conn) = connection_pair();

        conn.queue(b"");
        assert_eq!(conn.state, ConnState::Echoing);
        assert!(!conn.has_pending());
    }

    #[test]
    fn test_connection_registry() {
        let mut registry = ConnectionRegistry::new(2);

        let (_l1, c1) = connection_pair();
        let (_l2, c2) = connection_pair();
        let (_l3, c3) = connection_pair();

        let peer1 = c1.peer;
        let id1 = registry.insert(c1).unwrap();
        let id2 = registry.insert(c2).unwrap();

        // At capacity
        assert!(registry.insert(c3).is_none());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.capacity(), 2);
        assert_eq!(registry.get_mut(id1).unwrap().peer, peer1);

        let removed = registry.remove(id1).unwrap();
        assert_eq!(removed.peer, peer1);
        assert!(!registry.contains(id1));
        assert_eq!(registry.len(), 1);

        // Removing twice is a no-op
        assert!(registry.remove(id1).is_none());
        assert!(registry.contains(id2));
    }
}
