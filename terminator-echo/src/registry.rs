//! Server-side bookkeeping of live connections.
//!
//! The acceptor inserts, each connection task removes itself on exit, and
//! shutdown drains everything. All of it goes through one mutex. Entries hold
//! a close trigger rather than the socket: the socket stays with its task.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::{CloseSignal, Closer, close_pair};

pub type ConnectionId = u64;

#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    closer: Closer,
}

impl ConnectionHandle {
    /// The returned signal belongs to the task that serves the connection.
    pub fn new(id: ConnectionId, peer: SocketAddr) -> (Self, CloseSignal) {
        let (closer, signal) = close_pair();
        (Self { id, peer, closer }, signal)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn close(&self) {
        self.closer.close();
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids start at 1 and are never reused.
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns false, leaving the existing entry alone, if the id is taken.
    pub async fn register(&self, handle: ConnectionHandle) -> bool {
        let mut connections = self.connections.lock().await;
        let id = handle.id();
        if connections.contains_key(&id) {
            return false;
        }
        connections.insert(id, handle);
        true
    }

    /// Removing an absent id is a no-op.
    pub async fn deregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut connections = self.connections.lock().await;
        connections.remove(&id)
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Empties the registry and signals every removed connection to close.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<ConnectionHandle> = {
            let mut connections = self.connections.lock().await;
            connections.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &drained {
            debug!(id = handle.id(), peer = %handle.peer(), "signalling connection to close");
            handle.close();
        }
        drained.len()
    }
}
