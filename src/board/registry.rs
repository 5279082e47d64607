//! Live viewer connections grouped by board.
//!
//! The registry is the only shared mutable state of the live-update path.
//! All reads and writes go through its methods; callers get snapshots, never
//! a view into the map, so a slow broadcast cannot hold the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{Notify, mpsc};

/// Per-connection outbound queue length. A viewer that falls this far
/// behind is treated as a failed delivery and evicted.
pub const OUTBOUND_QUEUE: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("{0} outbound queue is full")]
    QueueFull(ConnectionId),
    #[error("{0} is closed")]
    Closed(ConnectionId),
}

/// Who is on the other end of a connection. Public viewers only ever see
/// what the shared link exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Owner,
    Public,
}

/// Handle to one attached viewer.
///
/// Cloning is cheap; all clones refer to the same queue and close state. The
/// socket task owns the receiving half returned by [`Connection::new`] and
/// writes queued payloads to the wire in order.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
struct ConnectionInner {
    id: ConnectionId,
    audience: Audience,
    tx: mpsc::Sender<Arc<str>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Connection {
    /// Owner connection.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        Self::with_audience(capacity, Audience::Owner)
    }

    pub fn with_audience(
        capacity: usize,
        audience: Audience,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let conn = Self {
            inner: Arc::new(ConnectionInner {
                id,
                audience,
                tx,
                closed: AtomicBool::new(false),
                close_signal: Notify::new(),
            }),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn audience(&self) -> Audience {
        self.inner.audience
    }

    /// Queue a payload without waiting.
    pub fn send(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed(self.id()));
        }
        self.inner.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull(self.id()),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(self.id()),
        })
    }

    /// Mark closed and wake the socket task. Returns `false` if the
    /// connection was already closed, so a close is never applied twice.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.close_signal.notify_one();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.close_signal.notified().await;
    }
}

#[derive(Default)]
struct RegistryState {
    buckets: HashMap<i64, HashMap<ConnectionId, Connection>>,
    board_of: HashMap<ConnectionId, i64>,
}

impl RegistryState {
    fn detach(&mut self, board_id: i64, conn_id: ConnectionId) -> Option<Connection> {
        let bucket = self.buckets.get_mut(&board_id)?;
        let conn = bucket.remove(&conn_id)?;
        if bucket.is_empty() {
            self.buckets.remove(&board_id);
        }
        self.board_of.remove(&conn_id);
        Some(conn)
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections never panic mid-update, so a poisoned lock still
    // guards consistent data.
    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `conn` to `board_id`. Registering the same connection again is
    /// a no-op; registering it under a different board moves it there.
    /// Returns `true` when the registry changed.
    pub fn register(&self, board_id: i64, conn: Connection) -> bool {
        let mut state = self.state();
        let conn_id = conn.id();
        match state.board_of.get(&conn_id).copied() {
            Some(current) if current == board_id => return false,
            Some(previous) => {
                state.detach(previous, conn_id);
            }
            None => {}
        }
        state.buckets.entry(board_id).or_default().insert(conn_id, conn);
        state.board_of.insert(conn_id, board_id);
        true
    }

    /// Detach a connection. Empty buckets are dropped. The returned handle
    /// is `Some` only for the caller that actually removed it.
    pub fn unregister(&self, board_id: i64, conn_id: ConnectionId) -> Option<Connection> {
        self.state().detach(board_id, conn_id)
    }

    /// Remove and close every connection of a board. The bucket is taken out
    /// of the map in one step; closing happens after the lock is released.
    pub fn evict_board(&self, board_id: i64) -> usize {
        let bucket = {
            let mut state = self.state();
            let bucket = state.buckets.remove(&board_id).unwrap_or_default();
            for conn_id in bucket.keys() {
                state.board_of.remove(conn_id);
            }
            bucket
        };
        let closed = bucket.values().filter(|conn| conn.close()).count();
        if closed > 0 {
            tracing::info!(board_id, closed, "Evicted board viewers");
        }
        closed
    }

    /// Point-in-time copy of a board's connections.
    pub fn connections_for(&self, board_id: i64) -> Vec<Connection> {
        self.state()
            .buckets
            .get(&board_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn board_of(&self, conn_id: ConnectionId) -> Option<i64> {
        self.state().board_of.get(&conn_id).copied()
    }

    pub fn board_count(&self) -> usize {
        self.state().buckets.len()
    }

    pub fn connection_count(&self) -> usize {
        self.state().board_of.len()
    }
}
