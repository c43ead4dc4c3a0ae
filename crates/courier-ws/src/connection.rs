use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use courier_core::ConnectionId;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

/// Frames queued for a socket's write task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// Gateway-side view of one socket. The transport task owns the I/O and
/// drains `outbound`; everything else holds `Arc<Connection>`.
pub struct Connection {
    id: ConnectionId,
    user_id: Mutex<Option<i64>>,
    is_alive: AtomicBool,
    closed: AtomicBool,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Outbound>,
    close_signal: Notify,
}

impl Connection {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id: Mutex::new(None),
            is_alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            connected_at: Utc::now(),
            outbound,
            close_signal: Notify::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn user_id(&self) -> Option<i64> {
        *self.user_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    /// Bind the connection to a user, returning the previous binding.
    pub(crate) fn bind_user(&self, user_id: i64) -> Option<i64> {
        self.user_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(user_id)
    }

    /// Drop the user binding, returning it if there was one.
    pub(crate) fn unbind_user(&self) -> Option<i64> {
        self.user_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::SeqCst)
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::SeqCst);
    }

    /// Clear the liveness flag ahead of a ping. Returns whether the
    /// connection had answered since the previous call.
    pub fn mark_suspect(&self) -> bool {
        self.is_alive.swap(false, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue a frame without waiting. Used for pushes so one slow socket
    /// never stalls delivery to others.
    pub fn try_send(&self, frame: Outbound) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Queue a frame, waiting for room. Used for replies on the
    /// connection's own task.
    pub async fn send(&self, frame: Outbound) -> Result<(), EnqueueError> {
        if self.is_closed() {
            return Err(EnqueueError::Closed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| EnqueueError::Closed)
    }

    /// Ask the transport to close the socket. Only the first call has
    /// any effect.
    pub fn close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outbound.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        self.close_signal.notify_one();
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id())
            .field("is_alive", &self.is_alive())
            .field("closed", &self.is_closed())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
