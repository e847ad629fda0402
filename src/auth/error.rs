//! Error taxonomy for the auth core and its HTTP mapping.
//!
//! Authentication and session failures are deliberately information-poor at the
//! boundary: every one of them becomes the same `401`. Callers log the concrete
//! reason before converting.

use axum::{
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use tracing::error;

/// Failures reported by the credential and session stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique column already holds the value being inserted.
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub(crate) fn from_sqlx(err: sqlx::Error, context: &'static str) -> Self {
        if is_unique_violation(&err) {
            let constraint = match &err {
                sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or("unknown"),
                _ => "unknown",
            };
            return Self::Conflict(constraint.to_string());
        }
        Self::Backend(anyhow::Error::new(err).context(context))
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is locked")]
    AccountLocked,
    #[error("account is inactive")]
    AccountInactive,
    #[error("invalid token")]
    InvalidToken,
    #[error("session is invalid")]
    SessionInvalid,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("invalid or expired reset token")]
    InvalidResetToken,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    AccountExists(String),
    #[error("user not found")]
    UserNotFound,
    /// Duplicate token identifier: an invariant violation, never retried.
    #[error("duplicate session identifier: {0}")]
    Conflict(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => Self::Conflict(constraint),
            StoreError::Backend(err) => Self::Internal(err),
        }
    }
}

impl AuthError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::InvalidToken
            | Self::SessionInvalid
            | Self::InvalidRefreshToken => StatusCode::UNAUTHORIZED,
            Self::AccountLocked | Self::AccountInactive | Self::Forbidden(_) => {
                StatusCode::FORBIDDEN
            }
            Self::InvalidResetToken | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AccountExists(_) => StatusCode::CONFLICT,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the client.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidCredentials => "Incorrect username or password".to_string(),
            Self::InvalidToken | Self::SessionInvalid => {
                "Could not validate credentials".to_string()
            }
            Self::InvalidRefreshToken => "Invalid refresh token".to_string(),
            Self::AccountLocked => {
                "Account is locked due to too many failed login attempts".to_string()
            }
            Self::AccountInactive => "Account is inactive".to_string(),
            Self::InvalidResetToken => "Invalid or expired reset token".to_string(),
            Self::UserNotFound => "User not found".to_string(),
            Self::Forbidden(message) | Self::Validation(message) | Self::AccountExists(message) => {
                message.clone()
            }
            Self::Conflict(_) | Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            Self::Conflict(constraint) => {
                error!("Session identifier collision on {constraint}; refusing to continue");
            }
            Self::Internal(err) => error!("Auth request failed: {err:#}"),
            _ => {}
        }

        let status = self.status_code();
        let mut response = (status, self.public_message()).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
