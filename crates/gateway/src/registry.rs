//! Live connections and their bounded outbound queues.
//!
//! Each WebSocket connection owns a [`SendQueue`]; the write loop drains it
//! towards the socket. When a queue is full, the oldest typing indicator is
//! shed first; a full queue with nothing left to shed closes the connection
//! as a slow consumer. Events enqueued for one connection are delivered in
//! enqueue order.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    dashmap::DashMap,
    tokio::sync::Notify,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use mingle_protocol::{EventSink, ServerFrame};

/// What happened to an enqueued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Ok,
    /// Best-effort frame shed because the queue was full.
    Dropped,
    /// Queue full of must-deliver frames: the connection is now closing.
    Overflow,
}

/// Bounded FIFO of outbound frames.
pub struct SendQueue {
    inner: Mutex<VecDeque<ServerFrame>>,
    notify: Notify,
    capacity: usize,
    closed: CancellationToken,
}

impl SendQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            closed: CancellationToken::new(),
        }
    }

    /// Enqueue a frame, applying the overflow policy.
    pub fn push(&self, frame: ServerFrame) -> Enqueued {
        if self.closed.is_cancelled() {
            return Enqueued::Dropped;
        }
        let mut queue = lock(&self.inner);
        if queue.len() >= self.capacity {
            if let Some(pos) = queue.iter().position(ServerFrame::droppable) {
                queue.remove(pos);
            } else if frame.droppable() {
                return Enqueued::Dropped;
            } else {
                drop(queue);
                self.close();
                return Enqueued::Overflow;
            }
        }
        queue.push_back(frame);
        drop(queue);
        self.notify.notify_one();
        Enqueued::Ok
    }

    /// Next frame in enqueue order; `None` once the queue is closed.
    pub async fn pop(&self) -> Option<ServerFrame> {
        loop {
            {
                let mut queue = lock(&self.inner);
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
            }
            if self.closed.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = self.closed.cancelled() => {
                    // Drain whatever is left before reporting closure.
                    let mut queue = lock(&self.inner);
                    return queue.pop_front();
                },
            }
        }
    }

    /// Stop accepting frames and wake the write loop.
    pub fn close(&self) {
        self.closed.cancel();
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }
}

/// One live WebSocket connection.
pub struct Connection {
    pub conn_id: String,
    pub queue: Arc<SendQueue>,
    pub connected_at: Instant,
    /// Frames shed from this connection's queue.
    pub dropped: AtomicU64,
    user_id: Mutex<Option<String>>,
}

impl Connection {
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        lock(&self.user_id).clone()
    }
}

/// Maps user ids to their live connections. The most recently authenticated
/// connection is the primary target for directed events.
pub struct ConnectionRegistry {
    conns: DashMap<String, Arc<Connection>>,
    by_user: DashMap<String, Vec<String>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            conns: DashMap::new(),
            by_user: DashMap::new(),
            queue_capacity,
        }
    }

    /// Register a fresh, unauthenticated connection.
    pub fn attach(&self) -> Arc<Connection> {
        let conn = Arc::new(Connection {
            conn_id: mingle_common::new_id(),
            queue: Arc::new(SendQueue::new(self.queue_capacity)),
            connected_at: Instant::now(),
            dropped: AtomicU64::new(0),
            user_id: Mutex::new(None),
        });
        self.conns.insert(conn.conn_id.clone(), Arc::clone(&conn));
        debug!(conn_id = %conn.conn_id, "connection attached");
        conn
    }

    /// Bind a connection to its authenticated user; it becomes the user's
    /// primary connection.
    pub fn authenticate(&self, conn_id: &str, user_id: &str) {
        if let Some(conn) = self.conns.get(conn_id) {
            *lock(&conn.user_id) = Some(user_id.to_string());
        }
        let mut conns = self.by_user.entry(user_id.to_string()).or_default();
        conns.retain(|c| c != conn_id);
        conns.push(conn_id.to_string());
    }

    /// Remove a connection. Returns the owning user id and how many of their
    /// connections remain.
    pub fn detach(&self, conn_id: &str) -> Option<(String, usize)> {
        let conn = self.conns.remove(conn_id).map(|(_, c)| c)?;
        conn.queue.close();
        let user_id = conn.user_id()?;

        let remaining = {
            let mut conns = self.by_user.entry(user_id.clone()).or_default();
            conns.retain(|c| c != conn_id);
            conns.len()
        };
        if remaining == 0 {
            self.by_user.remove(&user_id);
        }
        debug!(conn_id, user_id, remaining, "connection detached");
        Some((user_id, remaining))
    }

    #[must_use]
    pub fn primary(&self, user_id: &str) -> Option<Arc<Connection>> {
        let conns = self.by_user.get(user_id)?;
        conns
            .last()
            .and_then(|id| self.conns.get(id).map(|c| Arc::clone(&c)))
    }

    #[must_use]
    pub fn connections_of(&self, user_id: &str) -> Vec<Arc<Connection>> {
        let Some(conns) = self.by_user.get(user_id) else {
            return Vec::new();
        };
        conns
            .iter()
            .filter_map(|id| self.conns.get(id).map(|c| Arc::clone(&c)))
            .collect()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    fn push_to(&self, conn: &Connection, frame: ServerFrame) {
        match conn.queue.push(frame) {
            Enqueued::Ok => {},
            Enqueued::Dropped => {
                conn.dropped.fetch_add(1, Ordering::Relaxed);
            },
            Enqueued::Overflow => {
                warn!(conn_id = %conn.conn_id, "send queue overflow, closing slow consumer");
            },
        }
    }
}

/// The gateway's [`EventSink`]: directed events go to the primary connection,
/// fan-out events to every connection of the user.
pub struct RegistrySink {
    registry: Arc<ConnectionRegistry>,
}

impl RegistrySink {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

impl EventSink for RegistrySink {
    fn send(&self, user_id: &str, frame: ServerFrame) {
        if let Some(conn) = self.registry.primary(user_id) {
            self.registry.push_to(&conn, frame);
        }
    }

    fn send_all(&self, user_id: &str, frame: ServerFrame) {
        for conn in self.registry.connections_of(user_id) {
            self.registry.push_to(&conn, frame.clone());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
