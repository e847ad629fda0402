//! Password reset endpoints.
//!
//! The request endpoint always answers 202 so it cannot be used to probe for
//! registered addresses.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

use super::types::{MessageResponse, PasswordResetConfirm, PasswordResetRequest};
use crate::auth::AuthService;

const RESET_REQUESTED_MESSAGE: &str =
    "If the email is registered, password reset instructions have been sent";

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 202, description = "Reset requested", body = MessageResponse),
    ),
    tag = "auth"
)]
#[instrument(skip(service, payload))]
pub async fn request_reset(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service.request_password_reset(&request.email).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(MessageResponse::new(RESET_REQUESTED_MESSAGE)),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/password-reset/confirm",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid or expired reset token, or weak password"),
    ),
    tag = "auth"
)]
#[instrument(skip(service, payload))]
pub async fn confirm_reset(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<PasswordResetConfirm>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service
        .confirm_password_reset(&request.token, &request.new_password)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Password has been reset successfully")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
