//! Connection state and the slab-backed connection registry.
//!
//! One `Connection` per accepted socket. The registry is the sole owner of
//! connection state; removal on close releases everything, including the
//! reassembly buffer.

use crate::runtime::buffer::MessageBuffer;
use bytes::Bytes;
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Data-plane state of a connection.
#[derive(Debug)]
pub enum IoState {
    /// Waiting for request fragments; registered for read readiness.
    Reading,
    /// Flushing the encoded response; registered for write readiness.
    /// Partial writes resume at `written` on the next writable event.
    Writing { response: Bytes, written: usize },
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub state: IoState,
    pub buffer: MessageBuffer,
    last_activity: Instant,
}

impl Connection {
    /// Create a new connection in the initial reading state.
    pub fn new(stream: TcpStream, peer: SocketAddr, max_message_bytes: usize) -> Self {
        Self {
            stream,
            peer,
            state: IoState::Reading,
            buffer: MessageBuffer::new(max_message_bytes),
            last_activity: Instant::now(),
        }
    }

    /// Transition to writing state with the encoded response.
    pub fn start_writing(&mut self, response: Bytes) {
        self.state = IoState::Writing {
            response,
            written: 0,
        };
    }

    /// Record progress of a partial write.
    pub fn advance_write(&mut self, new_written: usize) {
        if let IoState::Writing { written, .. } = &mut self.state {
            *written = new_written;
        }
    }

    /// Mark the connection as active now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last read or write activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove; connection ids double as poll
/// tokens.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection.
    ///
    /// Returns the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Result<usize, Connection> {
        if self.connections.len() >= self.max_connections {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists. Used to skip stale readiness events
    /// whose connection was closed earlier in the same poll batch.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of live connection ids, for idle reaping and shutdown.
    pub fn ids(&self) -> Vec<usize> {
        self.connections.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.connections.iter()
    }
}
