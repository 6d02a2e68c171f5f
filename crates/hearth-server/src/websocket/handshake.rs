//! Upgrade admission: credential check plus family resolution.

use axum::http::HeaderMap;
use hearth_core::FamilyId;
use thiserror::Error;

use crate::auth::{AuthOutcome, HandshakeAuthGate, RejectReason, UserIdentity};
use crate::family::{FamilyGroupResolver, ResolutionError};

/// Optional header naming which family to listen to.
pub const FAMILY_HEADER: &str = "x-family-id";

/// A handshake that may join a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Authenticated user.
    pub identity: UserIdentity,
    /// Group to join.
    pub family: FamilyId,
}

/// Why a handshake may not join a group. Each closes the socket with 1008.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Credentials missing or invalid.
    #[error("handshake rejected: {0}")]
    Auth(RejectReason),
    /// `X-Family-Id` is not a UUID.
    #[error("malformed x-family-id header")]
    MalformedFamilyHeader,
    /// The user could not be mapped to a family.
    #[error(transparent)]
    Resolution(ResolutionError),
}

impl AdmissionError {
    /// Close-frame reason and metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth(reason) => reason.as_str(),
            Self::MalformedFamilyHeader => "malformed_family_header",
            Self::Resolution(e) => e.as_str(),
        }
    }
}

/// Authenticate the request and pick the family group it will join.
pub async fn admit(
    gate: &HandshakeAuthGate,
    resolver: &FamilyGroupResolver,
    headers: &HeaderMap,
) -> Result<Admission, AdmissionError> {
    let identity = match gate.authenticate(headers).await {
        AuthOutcome::Authenticated(identity) => identity,
        AuthOutcome::Rejected(reason) => return Err(AdmissionError::Auth(reason)),
    };
    let target = requested_family(headers)?;
    let family = resolver
        .resolve_for(identity.user_id, target)
        .await
        .map_err(AdmissionError::Resolution)?;
    Ok(Admission { identity, family })
}

fn requested_family(headers: &HeaderMap) -> Result<Option<FamilyId>, AdmissionError> {
    let Some(value) = headers.get(FAMILY_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse::<FamilyId>().ok())
        .map(Some)
        .ok_or(AdmissionError::MalformedFamilyHeader)
}
