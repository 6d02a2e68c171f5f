//! # hearth-server
//!
//! Axum HTTP + `WebSocket` server and family-scoped event broadcasting.
//!
//! - `WebSocket` gateway: bearer authentication on upgrade, family group
//!   membership, heartbeat, per-connection writer tasks
//! - [`ConnectionRegistry`]: the process-wide family → connections map
//! - [`GroupMessageService`]: resolve the actor's family, then fan out
//! - HTTP endpoints: health check, Prometheus metrics, event publish
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod family;
pub mod health;
pub mod messaging;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthOutcome, HandshakeAuthGate, IdentityVerifier, JwtIdentityVerifier, UserIdentity};
pub use config::ServerConfig;
pub use errors::{Result, ServerError};
pub use family::{FamilyDirectory, FamilyGroupResolver, InMemoryFamilyDirectory, ResolutionError};
pub use messaging::GroupMessageService;
pub use server::HearthServer;
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use websocket::registry::{BroadcastReport, ConnectionRegistry};
