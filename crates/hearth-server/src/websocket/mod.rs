//! WebSocket layer: connection state, family registry, handshake admission
//! and the per-connection session loop.

pub mod connection;
pub mod handshake;
pub mod registry;
pub mod session;
