//! Server error types.

use thiserror::Error;

use crate::family::DirectoryError;

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Any other socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Membership data could not be loaded.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

impl ServerError {
    pub(crate) fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

/// Convenience alias used by listen/startup paths.
pub type Result<T> = std::result::Result<T, ServerError>;
