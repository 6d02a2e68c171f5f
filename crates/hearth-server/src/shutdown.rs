//! Graceful shutdown: cancel every session, wait for the registry to drain,
//! then wait for the listener.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::registry::ConnectionRegistry;

/// Default deadline for the whole shutdown sequence.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the registry is checked while sessions close.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What was still running when shutdown finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections still registered after the drain phase.
    pub lingering_connections: usize,
    /// Tasks aborted because they overran the deadline.
    pub aborted_tasks: usize,
}

/// Coordinates shutdown of the listener and every live session.
///
/// Sessions hold a clone of the token and close their socket with 1001 when
/// it fires. The listener stops accepting on the same signal.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token handed to the listener and to each session.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, wait for every family group to empty, then wait for `handles`.
    ///
    /// Both phases share one deadline. Handles still running when it passes
    /// are aborted.
    pub async fn graceful_shutdown(
        &self,
        registry: &ConnectionRegistry,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> ShutdownReport {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let deadline = Instant::now() + timeout;

        self.shutdown();
        info!(
            connections = registry.connection_count(),
            groups = registry.group_count(),
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "shutting down"
        );

        let mut report = ShutdownReport::default();
        if timeout_at(deadline, drained(registry)).await.is_err() {
            report.lingering_connections = registry.connection_count();
            warn!(
                lingering = report.lingering_connections,
                "sessions still open at shutdown deadline"
            );
        }

        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();
        if timeout_at(deadline, join_all(handles)).await.is_err() {
            for task in aborts.iter().filter(|task| !task.is_finished()) {
                task.abort();
                report.aborted_tasks += 1;
            }
            warn!(
                aborted = report.aborted_tasks,
                "shutdown timed out after {timeout:?}, aborting tasks"
            );
        }

        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn drained(registry: &ConnectionRegistry) {
    while registry.connection_count() > 0 {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}
