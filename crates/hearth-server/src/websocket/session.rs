//! WebSocket session lifecycle: handles a single admitted client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, ConnectionPhase, PhaseTracker};
use super::handshake::{Admission, AdmissionError};
use super::registry::ConnectionRegistry;
use crate::auth::close_policy_violation;
use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_HANDSHAKE_REJECTIONS_TOTAL,
};

/// How long the writer gets to flush a close frame after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared handles a session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Family group registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Queue depth and heartbeat timing.
    pub config: Arc<ServerConfig>,
    /// Fired on server shutdown.
    pub shutdown: CancellationToken,
}

/// Ping cadence for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    /// Time between pings.
    pub interval: Duration,
    /// Silence longer than this closes the connection.
    pub pong_timeout: Duration,
}

/// Close a rejected handshake with 1008. The connection never joins a group.
#[instrument(skip_all, fields(conn_id = %phase.conn_id()))]
pub async fn reject_ws(ws: WebSocket, error: AdmissionError, mut phase: PhaseTracker) {
    let reason = error.as_str();
    info!(reason, error = %error, "rejecting websocket handshake");
    counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => reason).increment(1);
    close_policy_violation(ws, reason).await;
    let _ = phase.advance(ConnectionPhase::Closed);
}

/// Run a WebSocket session for an admitted client.
///
/// 1. Joins the client's family group (left again by a drop guard)
/// 2. Forwards broadcast messages via the send channel
/// 3. Sends periodic Ping frames and disconnects unresponsive clients
/// 4. Reads and discards inbound frames until the client goes away
/// 5. On shutdown, closes with 1001
#[instrument(
    skip_all,
    fields(
        conn_id = %phase.conn_id(),
        user_id = %admission.identity.user_id,
        family_id = %admission.family,
    )
)]
pub async fn run_ws_session(
    ws: WebSocket,
    admission: Admission,
    mut phase: PhaseTracker,
    ctx: SessionContext,
) {
    let (ws_tx, mut ws_rx) = ws.split();

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(ctx.config.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(
        phase.conn_id().clone(),
        admission.identity.user_id,
        admission.family,
        send_tx,
    ));

    let membership = ctx.registry.join_scoped(admission.family, connection.clone());
    let _ = phase.advance(ConnectionPhase::Joined);
    info!("client joined family group");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let heartbeat = Heartbeat {
        interval: ctx.config.heartbeat_interval(),
        pong_timeout: ctx.config.pong_timeout(),
    };
    let mut outbound = tokio::spawn(write_outbound(
        ws_tx,
        send_rx,
        connection.clone(),
        heartbeat,
        ctx.shutdown.clone(),
    ));

    let _ = phase.advance(ConnectionPhase::Receiving);
    let exit = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) => break "client_close",
                    Some(Ok(msg)) => {
                        connection.mark_alive();
                        match msg {
                            Message::Text(text) => debug!(len = text.len(), "discarding inbound text frame"),
                            Message::Binary(data) => debug!(len = data.len(), "discarding inbound binary frame"),
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket receive error");
                        break "receive_error";
                    }
                    None => break "stream_end",
                }
            }
            () = connection.closed() => break "server_close",
        }
    };

    // Clean up
    connection.close();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut outbound)
        .await
        .is_err()
    {
        outbound.abort();
    }
    drop(membership);
    let _ = phase.advance(ConnectionPhase::Closed);

    info!(reason = exit, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => exit).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Drain the connection's queue into the socket, pinging on `heartbeat`.
///
/// Returns when the queue closes, the socket errors, the client misses its
/// pong deadline, the connection is closed, or `shutdown` fires (after
/// sending close 1001). Always leaves the connection closed.
pub async fn write_outbound<S>(
    mut sink: S,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    conn: Arc<ClientConnection>,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    let mut ping_interval = tokio::time::interval(heartbeat.interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                match msg {
                    Some(text) => {
                        if sink.send(Message::Text(text.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                if conn.is_unresponsive(heartbeat.pong_timeout) {
                    warn!(
                        conn_id = %conn.id,
                        timeout_ms = heartbeat.pong_timeout.as_millis(),
                        "client unresponsive, disconnecting"
                    );
                    break;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = shutdown.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
            () = conn.closed() => break,
        }
    }

    conn.close();
}

#[cfg(test)]
mod tests {
    // Full sessions need a real socket and are covered in tests/integration.rs.
    // These drive the writer against an in-memory sink.

    use super::*;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use futures::channel::mpsc as sink_channel;
    use hearth_core::{ConnectionId, FamilyId, UserId};

    struct Harness {
        conn: Arc<ClientConnection>,
        send_tx: mpsc::Sender<Arc<String>>,
        frames: sink_channel::UnboundedReceiver<Message>,
        shutdown: CancellationToken,
        writer: tokio::task::JoinHandle<()>,
    }

    fn spawn_writer(heartbeat: Heartbeat) -> Harness {
        let (send_tx, send_rx) = mpsc::channel(8);
        let (sink, frames) = sink_channel::unbounded();
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::new(),
            UserId::random(),
            FamilyId::random(),
            send_tx.clone(),
        ));
        let shutdown = CancellationToken::new();
        let writer = tokio::spawn(write_outbound(
            sink,
            send_rx,
            conn.clone(),
            heartbeat,
            shutdown.clone(),
        ));
        Harness {
            conn,
            send_tx,
            frames,
            shutdown,
            writer,
        }
    }

    fn slow_heartbeat() -> Heartbeat {
        Heartbeat {
            interval: Duration::from_secs(3600),
            pong_timeout: Duration::from_secs(7200),
        }
    }

    fn drain(frames: &mut sink_channel::UnboundedReceiver<Message>) -> Vec<Message> {
        std::iter::from_fn(|| frames.next().now_or_never().flatten()).collect()
    }

    fn text(frame: Option<Message>) -> String {
        match frame {
            Some(Message::Text(t)) => t.as_str().to_owned(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwards_queued_messages_in_order() {
        let mut h = spawn_writer(slow_heartbeat());
        h.send_tx.send(Arc::new("one".into())).await.unwrap();
        h.send_tx.send(Arc::new("two".into())).await.unwrap();

        assert_eq!(text(h.frames.next().await), "one");
        assert_eq!(text(h.frames.next().await), "two");

        h.conn.close();
        h.writer.await.unwrap();
        assert!(h.frames.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pings_then_drops_silent_client() {
        let mut h = spawn_writer(Heartbeat {
            interval: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(2),
        });

        h.writer.await.unwrap();
        assert!(h.conn.is_closed());

        let frames = drain(&mut h.frames);
        assert!(!frames.is_empty());
        assert!(frames.iter().all(|m| matches!(m, Message::Ping(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_connection_open() {
        let h = spawn_writer(Heartbeat {
            interval: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(2),
        });

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            h.conn.mark_alive();
        }
        assert!(!h.conn.is_closed());
        assert!(!h.writer.is_finished());

        h.conn.close();
        h.writer.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_sends_going_away() {
        let mut h = spawn_writer(slow_heartbeat());
        h.shutdown.cancel();
        h.writer.await.unwrap();

        assert!(h.conn.is_closed());
        assert_matches!(
            h.frames.next().await,
            Some(Message::Close(Some(frame))) if frame.code == close_code::AWAY
        );
    }

    #[tokio::test]
    async fn closing_connection_stops_writer() {
        let h = spawn_writer(slow_heartbeat());
        h.conn.close();
        h.writer.await.unwrap();
        assert!(h.conn.is_closed());
    }
}
