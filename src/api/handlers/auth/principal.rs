//! Authenticated principal extraction.
//!
//! Flow Overview: read the bearer token, let the auth service resolve it to a
//! live user and session, and hand the principal to the handler.

use axum::http::HeaderMap;

use super::utils::extract_bearer_token;
use crate::auth::{AuthError, AuthService, Principal};

/// Resolve the bearer token into a principal, or fail with a uniform 401.
pub async fn require_auth(headers: &HeaderMap, service: &AuthService) -> Result<Principal, AuthError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(AuthError::InvalidToken);
    };
    service.authenticate_request(&token).await
}
