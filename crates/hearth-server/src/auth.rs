//! Handshake authentication.
//!
//! Every upgrade must carry `Authorization: Bearer <token>`. The query string
//! is never consulted. [`HandshakeAuthGate`] turns the header into an
//! [`AuthOutcome`]; any verifier failure counts as a rejection, and rejected
//! sockets are closed with 1008 before they can join a group.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use hearth_core::UserId;
use hearth_settings::{AuthSettings, JwtAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentity {
    /// Subject of the verified token.
    pub user_id: UserId,
}

/// Why a token failed verification.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Signature, expiry or structure check failed.
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    /// The `sub` claim is not a user id.
    #[error("invalid token subject: {0}")]
    InvalidSubject(String),
}

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token` and return its subject.
    async fn verify(&self, token: &str) -> Result<UserIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Verifies HMAC-signed access tokens issued by the CRUD backend.
pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    /// Build a verifier for `secret` signed with `algorithm`.
    pub fn new(secret: &[u8], algorithm: Algorithm, leeway: Duration) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = leeway.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Build a verifier from the `auth` settings section.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(
            settings.jwt_secret.as_bytes(),
            algorithm(settings.jwt_algorithm),
            Duration::from_secs(settings.leeway_secs),
        )
    }
}

/// Map the configured algorithm onto `jsonwebtoken`'s.
pub fn algorithm(alg: JwtAlgorithm) -> Algorithm {
    match alg {
        JwtAlgorithm::HS256 => Algorithm::HS256,
        JwtAlgorithm::HS384 => Algorithm::HS384,
        JwtAlgorithm::HS512 => Algorithm::HS512,
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<UserIdentity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        let user_id = data
            .claims
            .sub
            .parse::<UserId>()
            .map_err(|_| AuthError::InvalidSubject(data.claims.sub.clone()))?;
        Ok(UserIdentity { user_id })
    }
}

/// Why a handshake was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No `Authorization` header.
    MissingCredentials,
    /// Header present but not `Bearer <token>`.
    MalformedCredentials,
    /// The verifier refused the token.
    InvalidCredentials,
}

impl RejectReason {
    /// Short label used in close frames, logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::MalformedCredentials => "malformed_credentials",
            Self::InvalidCredentials => "invalid_credentials",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking a handshake's credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The bearer token verified.
    Authenticated(UserIdentity),
    /// The socket must be closed with 1008.
    Rejected(RejectReason),
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, RejectReason> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(RejectReason::MissingCredentials)?;
    let value = value
        .to_str()
        .map_err(|_| RejectReason::MalformedCredentials)?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("Bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(RejectReason::MalformedCredentials),
    }
}

/// Admission check run on every upgrade request.
pub struct HandshakeAuthGate {
    verifier: Arc<dyn IdentityVerifier>,
}

impl HandshakeAuthGate {
    /// Wrap an identity verifier.
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { verifier }
    }

    /// Check the request headers.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthOutcome {
        let token = match bearer_token(headers) {
            Ok(token) => token,
            Err(reason) => return AuthOutcome::Rejected(reason),
        };
        match self.verifier.verify(token).await {
            Ok(identity) => AuthOutcome::Authenticated(identity),
            Err(e) => {
                debug!(error = %e, "bearer token rejected");
                AuthOutcome::Rejected(RejectReason::InvalidCredentials)
            }
        }
    }
}

/// Close an upgraded socket with policy-violation status 1008.
pub async fn close_policy_violation(mut socket: WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "failed to send policy close frame");
    }
}
