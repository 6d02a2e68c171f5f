//! Bearer token verification settings.

use serde::{Deserialize, Serialize};

/// HMAC algorithm the CRUD backend signs access tokens with.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    /// HMAC-SHA256.
    #[default]
    HS256,
    /// HMAC-SHA384.
    HS384,
    /// HMAC-SHA512.
    HS512,
}

impl std::str::FromStr for JwtAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(format!("unsupported JWT algorithm: {other}")),
        }
    }
}

/// Token verification settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared signing secret. Must be set; there is no usable default.
    pub jwt_secret: String,
    /// Signing algorithm.
    pub jwt_algorithm: JwtAlgorithm,
    /// Clock skew tolerated when checking `exp`.
    pub leeway_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithm: JwtAlgorithm::HS256,
            leeway_secs: 30,
        }
    }
}
