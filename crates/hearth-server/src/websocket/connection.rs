//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hearth_core::{ConnectionId, FamilyId, UserId};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a message could not be handed to a connection's writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The writer is gone or the connection was closed.
    #[error("connection closed")]
    Closed,
    /// The outbound queue stayed full for the whole timeout.
    #[error("send timed out after {0:?}")]
    TimedOut(Duration),
}

impl DeliveryError {
    /// Short label for metrics.
    pub const fn cause(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::TimedOut(_) => "timeout",
        }
    }
}

/// A live, admitted WebSocket client.
///
/// Owned jointly by its session task and the registry group it belongs to.
/// The session's writer drains `tx`; anyone can request closure through
/// [`close`](Self::close).
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated user behind this socket.
    pub user_id: UserId,
    /// Family group the connection joined.
    pub family_id: FamilyId,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Fired once when the connection should stop.
    closed: CancellationToken,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last pong (or any inbound frame) was received.
    last_pong: Mutex<Instant>,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        family_id: FamilyId,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            user_id,
            family_id,
            tx,
            closed: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
        }
    }

    /// Enqueue a message for the writer, waiting at most `timeout` for room.
    pub async fn deliver(&self, message: Arc<String>, timeout: Duration) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        match self.tx.send_timeout(message, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::TimedOut(timeout)),
        }
    }

    /// Ask the session to shut this connection down. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Mark the connection as alive (pong or other inbound frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Heartbeat verdict: missed at least one ping cycle and silent longer than `pong_timeout`.
    pub fn is_unresponsive(&self, pong_timeout: Duration) -> bool {
        !self.check_alive() && self.last_pong_elapsed() > pong_timeout
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("family_id", &self.family_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of one WebSocket connection.
///
/// `Connecting → Authenticating → Joined → Receiving → Closed`, with
/// `Authenticating → Closed` when the handshake is rejected. Any live phase
/// may jump to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Upgrade requested.
    Connecting,
    /// Checking the bearer credential and family.
    Authenticating,
    /// Registered in a family group.
    Joined,
    /// Reading (and discarding) inbound frames.
    Receiving,
    /// Terminal.
    Closed,
}

impl ConnectionPhase {
    /// Whether `self → next` is a legal transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Authenticating)
                | (Self::Authenticating, Self::Joined)
                | (Self::Joined, Self::Receiving)
                | (Self::Connecting | Self::Authenticating | Self::Joined | Self::Receiving, Self::Closed)
        )
    }

    /// Lowercase name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Joined => "joined",
            Self::Receiving => "receiving",
            Self::Closed => "closed",
        }
    }
}

/// Tracks the phase of one connection and logs each step.
#[derive(Debug)]
pub struct PhaseTracker {
    conn_id: ConnectionId,
    phase: ConnectionPhase,
}

impl PhaseTracker {
    /// Start a tracker in [`ConnectionPhase::Connecting`].
    pub fn new(conn_id: ConnectionId) -> Self {
        Self {
            conn_id,
            phase: ConnectionPhase::Connecting,
        }
    }

    /// Connection this tracker belongs to.
    pub fn conn_id(&self) -> &ConnectionId {
        &self.conn_id
    }

    /// Current phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: ConnectionPhase) -> bool {
        if self.phase.can_transition_to(next) {
            debug!(
                conn_id = %self.conn_id,
                from = self.phase.as_str(),
                to = next.as_str(),
                "connection phase"
            );
            self.phase = next;
            true
        } else {
            warn!(
                conn_id = %self.conn_id,
                from = self.phase.as_str(),
                to = next.as_str(),
                "ignoring illegal connection phase transition"
            );
            false
        }
    }
}
