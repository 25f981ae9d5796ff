//! Connection identity and per-connection delivery queues.

use lounge_protocol::ServerFrame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;

/// Sending half of a connection's delivery queue.
pub type Outbox = mpsc::Sender<Arc<ServerFrame>>;

/// Receiving half of a connection's delivery queue, drained by the transport.
pub type OutboxReceiver = mpsc::Receiver<Arc<ServerFrame>>;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The connection's transport task has gone away.
    #[error("Connection closed")]
    Closed,

    /// The connection is not draining its queue fast enough.
    #[error("Outbox full")]
    Full,

    /// No connection is registered under the target ID.
    #[error("Connection not registered")]
    NotConnected,
}

/// Create a bounded delivery queue.
#[must_use]
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Hand a frame to a connection without waiting.
///
/// # Errors
///
/// Returns an error if the queue is closed or full.
pub fn deliver(outbox: &Outbox, frame: Arc<ServerFrame>) -> Result<(), DeliveryError> {
    outbox.try_send(frame).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
        mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
    })
}
