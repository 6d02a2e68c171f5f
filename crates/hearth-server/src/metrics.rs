//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::Result;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections admitted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades closed with 1008 before joining (counter, labels: reason).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Broadcasts to a family group (counter).
pub const WS_BROADCASTS_TOTAL: &str = "ws_broadcasts_total";
/// Connections evicted after a failed send (counter, labels: cause).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Envelopes accepted for delivery (counter, labels: event_type).
pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
/// `send_to_family` calls that failed resolution (counter).
pub const RESOLUTION_FAILURES_TOTAL: &str = "family_resolution_failures_total";
