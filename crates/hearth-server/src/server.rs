//! `HearthServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use hearth_core::{ConnectionId, EventEnvelope};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::{AuthOutcome, HandshakeAuthGate, IdentityVerifier};
use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::family::{FamilyDirectory, FamilyGroupResolver, ResolutionError};
use crate::health::{self, HealthResponse};
use crate::messaging::GroupMessageService;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::{ConnectionPhase, PhaseTracker};
use crate::websocket::handshake;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{self, SessionContext};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Family group registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Bearer credential check.
    pub auth_gate: Arc<HandshakeAuthGate>,
    /// User → family mapping.
    pub resolver: Arc<FamilyGroupResolver>,
    /// Resolve-and-broadcast entry point.
    pub messaging: Arc<GroupMessageService>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle.
    pub metrics_handle: PrometheusHandle,
}

/// The Hearth broadcast server.
pub struct HearthServer {
    state: AppState,
}

impl HearthServer {
    /// Wire a server around an identity verifier and a family directory.
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn IdentityVerifier>,
        directory: Arc<dyn FamilyDirectory>,
        metrics_handle: PrometheusHandle,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.send_timeout()));
        let resolver = Arc::new(FamilyGroupResolver::new(directory));
        let messaging = Arc::new(GroupMessageService::new(
            resolver.clone(),
            registry.clone(),
        ));
        Self {
            state: AppState {
                registry,
                auth_gate: Arc::new(HandshakeAuthGate::new(verifier)),
                resolver,
                messaging,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config: Arc::new(config),
                start_time: Instant::now(),
                metrics_handle,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/ws/", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/events", post(publish_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.clone(), e))?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server terminated with error");
            }
        });

        info!(%local_addr, "hearth server listening");
        Ok((local_addr, handle))
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Get the group message service.
    pub fn messaging(&self) -> &Arc<GroupMessageService> {
        &self.state.messaging
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /ws: authenticate, resolve the family, then upgrade.
///
/// The upgrade always completes so that rejected clients receive a 1008
/// close frame rather than a bare HTTP error.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let mut phase = PhaseTracker::new(ConnectionId::new());
    let _ = phase.advance(ConnectionPhase::Authenticating);
    let admission = handshake::admit(&state.auth_gate, &state.resolver, &headers).await;

    let ctx = SessionContext {
        registry: state.registry.clone(),
        config: state.config.clone(),
        shutdown: state.shutdown.token(),
    };
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            match admission {
                Ok(admission) => session::run_ws_session(socket, admission, phase, ctx).await,
                Err(e) => session::reject_ws(socket, e, phase).await,
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.group_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// POST /events: publish an envelope as the bearer of the request's token.
///
/// Credentials are checked before the body is parsed.
async fn publish_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let identity = match state.auth_gate.authenticate(&headers).await {
        AuthOutcome::Authenticated(identity) => identity,
        AuthOutcome::Rejected(reason) => {
            return error_response(StatusCode::UNAUTHORIZED, reason.as_str());
        }
    };

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    };

    match state.messaging.send_to_family(identity.user_id, &envelope).await {
        Ok(report) => (StatusCode::ACCEPTED, Json(report)).into_response(),
        Err(e @ ResolutionError::Directory(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
        Err(e) => error_response(StatusCode::FORBIDDEN, &e.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtIdentityVerifier;
    use crate::family::InMemoryFamilyDirectory;
    use axum::body::Body;
    use axum::http::Request;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use hearth_core::{FamilyId, UserId};
    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &[u8] = b"server-test-secret";

    fn token_for(user: UserId) -> String {
        let exp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 600;
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &json!({"sub": user.to_string(), "exp": exp}),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    fn make_server(directory: InMemoryFamilyDirectory) -> HearthServer {
        let verifier = JwtIdentityVerifier::new(
            SECRET,
            Algorithm::HS256,
            std::time::Duration::from_secs(0),
        );
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        HearthServer::new(
            ServerConfig::default(),
            Arc::new(verifier),
            Arc::new(directory),
            metrics_handle,
        )
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn publish_request(token: Option<&str>, body: String) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/events")
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body)).unwrap()
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server(InMemoryFamilyDirectory::new());
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert_eq!(server.registry().group_count(), 0);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[test]
    fn registry_send_timeout_follows_config() {
        let config = ServerConfig {
            send_timeout_ms: 750,
            ..ServerConfig::default()
        };
        let server = HearthServer::new(
            config,
            Arc::new(JwtIdentityVerifier::new(
                SECRET,
                Algorithm::HS256,
                std::time::Duration::ZERO,
            )),
            Arc::new(InMemoryFamilyDirectory::new()),
            PrometheusBuilder::new().build_recorder().handle(),
        );
        assert_eq!(
            server.registry().send_timeout(),
            std::time::Duration::from_millis(750)
        );
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server(InMemoryFamilyDirectory::new()).router();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["groups"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let app = make_server(InMemoryFamilyDirectory::new()).router();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let app = make_server(InMemoryFamilyDirectory::new()).router();
        for uri in ["/ws", "/ws/"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_ne!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
            assert!(resp.status().is_client_error(), "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server(InMemoryFamilyDirectory::new()).router();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn publish_without_credentials_is_401() {
        let app = make_server(InMemoryFamilyDirectory::new()).router();
        let resp = app
            .oneshot(publish_request(None, "{}".into()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["error"], "missing_credentials");
    }

    #[tokio::test]
    async fn publish_malformed_envelope_is_422() {
        let user = UserId::random();
        let app = make_server(InMemoryFamilyDirectory::new()).router();
        let body = json!({"family_id": FamilyId::random(), "event_type": "user_ate_cake", "data": {}});
        let resp = app
            .oneshot(publish_request(Some(&token_for(user)), body.to_string()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn publish_to_foreign_family_is_403() {
        let user = UserId::random();
        let directory = InMemoryFamilyDirectory::new();
        directory.add_member(user, FamilyId::random());
        let app = make_server(directory).router();

        let envelope = EventEnvelope::task_deleted(FamilyId::random(), Uuid::new_v4());
        let resp = app
            .oneshot(publish_request(
                Some(&token_for(user)),
                envelope.to_json().unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn publish_accepted_with_report() {
        let user = UserId::random();
        let family = FamilyId::random();
        let directory = InMemoryFamilyDirectory::new();
        directory.add_member(user, family);
        let app = make_server(directory).router();

        let envelope = EventEnvelope::task_done_status_changed(family, Uuid::new_v4(), true);
        let resp = app
            .oneshot(publish_request(
                Some(&token_for(user)),
                envelope.to_json().unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let report = body_json(resp).await;
        assert_eq!(report["attempted"], 0);
        assert_eq!(report["delivered"], 0);
        assert_eq!(report["evicted"], 0);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server(InMemoryFamilyDirectory::new());
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
