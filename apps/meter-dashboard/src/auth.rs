use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::fmt;
use std::future::Future;

use crate::error::AppError;
use crate::ids::stable_hex_id;

/// Identity of the caller, passed explicitly to whatever talks to the upstream API on their
/// behalf. The token is forwarded as-is; it is never validated here.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Opaque per-session key, safe to log and to use as a map key.
    pub fn scope(&self) -> String {
        stable_hex_id("session", &self.token)
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(Self::new)
            .ok_or_else(|| AppError::unauthorized("Missing or invalid token"))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("scope", &self.scope())
            .finish()
    }
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let session = Self::from_headers(&parts.headers);
        async move { session }
    }
}
