//! Bookkeeping for open change-stream connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify::RecommendedWatcher;
use parking_lot::Mutex;

use crate::events::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Errored,
}

/// An OS-level watch. Dropping it deregisters the watch and releases the
/// registry's count.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    live: Arc<AtomicUsize>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ConnectionEntry {
    state: ConnectionState,
    handles: Vec<WatchHandle>,
    opened_at: DateTime<Utc>,
}

/// Owned map of connection id to the watches it holds. Cloning shares the
/// same map.
#[derive(Clone, Default)]
pub struct WatchRegistry {
    connections: Arc<Mutex<HashMap<ConnectionId, ConnectionEntry>>>,
    live_handles: Arc<AtomicUsize>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a watcher so it is counted until dropped.
    pub fn track(&self, watcher: RecommendedWatcher) -> WatchHandle {
        self.live_handles.fetch_add(1, Ordering::SeqCst);
        WatchHandle {
            _watcher: watcher,
            live: self.live_handles.clone(),
        }
    }

    pub(crate) fn register(&self, id: ConnectionId) {
        self.connections.lock().insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Connecting,
                handles: Vec::new(),
                opened_at: Utc::now(),
            },
        );
    }

    pub(crate) fn open(&self, id: ConnectionId, handles: Vec<WatchHandle>) {
        if let Some(entry) = self.connections.lock().get_mut(&id) {
            entry.handles = handles;
            entry.state = ConnectionState::Open;
        }
    }

    /// Removes the connection and drops its watches. Returns how long the
    /// connection was registered.
    pub(crate) fn close(&self, id: ConnectionId) -> Option<chrono::Duration> {
        let entry = self.connections.lock().remove(&id)?;
        let lifetime = Utc::now() - entry.opened_at;
        drop(entry.handles);
        Some(lifetime)
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.lock().get(&id).map(|e| e.state)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Number of OS-level watches currently alive across all connections.
    pub fn active_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    pub fn handles_for(&self, id: ConnectionId) -> usize {
        self.connections
            .lock()
            .get(&id)
            .map(|e| e.handles.len())
            .unwrap_or(0)
    }
}
