// Explicit per-connection context registry

use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use log::trace;
use tokio_util::sync::CancellationToken;

/// Stable identity of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub remote: SocketAddr,
    pub local: SocketAddr,
}

impl ConnKey {
    pub fn new(remote: SocketAddr, local: SocketAddr) -> Self {
        Self { remote, local }
    }
}

/// Context attached to one connection for its whole life
#[derive(Debug, Clone)]
pub struct ConnContext {
    id: u64,
    key: ConnKey,
    cancel: CancellationToken,
}

impl ConnContext {
    /// A context not tied to any connection, used by background work and tests
    pub fn detached() -> Self {
        let unspecified = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        Self {
            id: 0,
            key: ConnKey::new(unspecified, unspecified),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> ConnKey {
        self.key
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.key.remote
    }

    /// Cancelled once the connection is closed
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Concurrent map from connection key to its context.
///
/// Entries are owned by a [`Registration`]; dropping it removes the entry and cancels the context.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnKey, ConnContext>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, key: ConnKey) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let context = ConnContext {
            id,
            key,
            cancel: CancellationToken::new(),
        };

        // A reused address pair means the previous connection is gone
        if let Some(stale) = self.connections.insert(key, context.clone()) {
            trace!("[conn {}] replaced by connection {id}", stale.id);
            stale.cancel.cancel();
        }
        trace!("[conn {id}] registered {} -> {}", key.remote, key.local);

        Registration {
            registry: Arc::clone(self),
            context,
        }
    }

    pub fn get(&self, key: &ConnKey) -> Option<ConnContext> {
        self.connections.get(key).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Ownership of a registry entry, released when the connection is dropped
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    context: ConnContext,
}

impl Registration {
    pub fn context(&self) -> &ConnContext {
        &self.context
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let id = self.context.id;
        self.registry
            .connections
            .remove_if(&self.context.key, |_, current| current.id == id);
        self.context.cancel.cancel();
        trace!("[conn {id}] closed and unregistered");
    }
}
