//! Subscriber connections and their lifecycle.
//!
//! A connection moves `Active -> Closing -> Closed` and never back. The
//! first transition only happens inside [`Registry::remove`], so leaving
//! `Active` and leaving the registry are one atomic step. The second is
//! performed once, by whichever path removed the entry.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

use crate::config::OverflowPolicy;
use crate::error::SendError;
use crate::hub::Registry;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closing,
    Closed,
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    ReadError,
    SendFailed,
    SendTimeout,
    QueueFull,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::SendFailed => "send_failed",
            Self::SendTimeout => "send_timeout",
            Self::QueueFull => "queue_full",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful [`Connection::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Queue was full and the policy is [`OverflowPolicy::DropNewest`].
    Dropped,
}

/// One subscriber.
///
/// The transport itself is owned by the connection's reader and writer
/// tasks; this type only carries identity, state and the outbound queue.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote: SocketAddr,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::Sender<Arc<str>>,
    overflow: OverflowPolicy,
    close_reason: OnceLock<CloseReason>,
}

impl Connection {
    /// Creates an Active connection and the receiving end of its queue.
    ///
    /// `capacity` must be at least 1.
    pub fn new(
        remote: SocketAddr,
        capacity: usize,
        overflow: OverflowPolicy,
    ) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (outbound, rx) = mpsc::channel(capacity);
        let (state, _) = watch::channel(ConnectionState::Active);
        let conn = Arc::new(Self {
            id: ConnectionId::next(),
            remote,
            state,
            outbound,
            overflow,
            close_reason: OnceLock::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Hands a line to the writer task without blocking.
    pub fn enqueue(&self, payload: &Arc<str>) -> Result<Enqueued, SendError> {
        match self.outbound.try_send(Arc::clone(payload)) {
            Ok(()) => Ok(Enqueued::Queued),
            Err(TrySendError::Full(_)) => match self.overflow {
                OverflowPolicy::DropNewest => Ok(Enqueued::Dropped),
                OverflowPolicy::Disconnect => Err(SendError::QueueFull),
            },
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Resolves once the connection reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    /// `Active -> Closing`. Must only be called with the registry lock held.
    pub(crate) fn begin_closing(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Active {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        })
    }

    /// `Closing -> Closed`. Returns true for the single caller that performed
    /// the transition; the reader and writer tasks observe it and release the
    /// socket.
    pub(crate) fn finish_close(&self, reason: CloseReason) -> bool {
        let closed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closing {
                // Recorded before waiters on `closed()` are notified
                let _ = self.close_reason.set(reason);
                *state = ConnectionState::Closed;
                true
            } else {
                false
            }
        });
        if closed {
            tracing::info!(
                conn_id = %self.id,
                remote = %self.remote,
                reason = %reason,
                "Client disconnected"
            );
        }
        closed
    }
}

/// Removes a connection from the registry and releases it.
///
/// Safe to call concurrently from the read path and the write path: only the
/// caller that actually removed the entry performs the release and gets
/// `true` back.
pub fn close(registry: &Registry, id: ConnectionId, reason: CloseReason) -> bool {
    match registry.remove(id) {
        Some(conn) => conn.finish_close(reason),
        None => false,
    }
}

/// Closes every registered connection. Returns how many were closed.
pub fn close_all(registry: &Registry, reason: CloseReason) -> usize {
    registry
        .drain()
        .into_iter()
        .filter(|conn| conn.finish_close(reason))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn remote() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _rx_a) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        let (b, _rx_b) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_new_connection_is_active() {
        let (conn, _rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        assert_eq!(conn.state(), ConnectionState::Active);
        assert_eq!(conn.close_reason(), None);
    }

    #[test]
    fn test_close_transitions_through_closing_to_closed() {
        let registry = Registry::new();
        let (conn, _rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        registry.add(Arc::clone(&conn)).unwrap();

        assert!(close(&registry, conn.id(), CloseReason::PeerClosed));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let registry = Registry::new();
        let (conn, _rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        registry.add(Arc::clone(&conn)).unwrap();

        assert!(close(&registry, conn.id(), CloseReason::SendFailed));
        assert!(!close(&registry, conn.id(), CloseReason::PeerClosed));
        // First reason wins
        assert_eq!(conn.close_reason(), Some(CloseReason::SendFailed));
    }

    #[test]
    fn test_concurrent_close_releases_once() {
        let registry = Arc::new(Registry::new());
        let (conn, _rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        registry.add(Arc::clone(&conn)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let id = conn.id();
                std::thread::spawn(move || {
                    let reason = if i % 2 == 0 {
                        CloseReason::PeerClosed
                    } else {
                        CloseReason::SendFailed
                    };
                    close(&registry, id, reason)
                })
            })
            .collect();

        let released = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|released| *released)
            .count();
        assert_eq!(released, 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_finish_close_requires_closing() {
        let (conn, _rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        assert!(!conn.finish_close(CloseReason::Shutdown));
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn test_enqueue_full_queue_disconnect_policy() {
        let (conn, _rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        let line: Arc<str> = Arc::from("a");
        assert_eq!(conn.enqueue(&line), Ok(Enqueued::Queued));
        assert_eq!(conn.enqueue(&line), Err(SendError::QueueFull));
    }

    #[test]
    fn test_enqueue_full_queue_drop_newest_policy() {
        let (conn, mut rx) = Connection::new(remote(), 1, OverflowPolicy::DropNewest);
        assert_eq!(conn.enqueue(&Arc::from("first")), Ok(Enqueued::Queued));
        assert_eq!(conn.enqueue(&Arc::from("second")), Ok(Enqueued::Dropped));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_enqueue_after_writer_gone() {
        let (conn, rx) = Connection::new(remote(), 4, OverflowPolicy::Disconnect);
        drop(rx);
        assert_eq!(conn.enqueue(&Arc::from("x")), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let registry = Registry::new();
        let (conn, _rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        registry.add(Arc::clone(&conn)).unwrap();

        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        close(&registry, conn.id(), CloseReason::PeerClosed);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() did not resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_reason_visible_to_closed_waiters() {
        let registry = Registry::new();
        let (conn, _rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
        registry.add(Arc::clone(&conn)).unwrap();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move {
                    conn.closed().await;
                    conn.close_reason()
                })
            })
            .collect();
        tokio::task::yield_now().await;

        close(&registry, conn.id(), CloseReason::SendTimeout);
        for waiter in waiters {
            let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("closed() did not resolve")
                .unwrap();
            assert_eq!(reason, Some(CloseReason::SendTimeout));
        }
    }

    #[test]
    fn test_close_all() {
        let registry = Registry::new();
        let conns: Vec<_> = (0..3)
            .map(|_| {
                let (conn, rx) = Connection::new(remote(), 1, OverflowPolicy::Disconnect);
                registry.add(Arc::clone(&conn)).unwrap();
                (conn, rx)
            })
            .collect();

        assert_eq!(close_all(&registry, CloseReason::Shutdown), 3);
        assert!(registry.is_empty());
        for (conn, _) in &conns {
            assert_eq!(conn.state(), ConnectionState::Closed);
            assert_eq!(conn.close_reason(), Some(CloseReason::Shutdown));
        }
    }
}
