use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

use super::{
    principal::require_auth,
    types::{LogoutRequest, MessageResponse},
};
use crate::auth::AuthService;

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body(content = LogoutRequest, description = "Optional; set `revoke_all_sessions` to end every session"),
    responses(
        (status = 200, description = "Session revoked", body = MessageResponse),
        (status = 401, description = "Missing or invalid bearer token"),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip(headers, service, payload))]
pub async fn logout(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<LogoutRequest>>,
) -> Response {
    let principal = match require_auth(&headers, &service).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };
    let request = payload.map(|Json(request)| request).unwrap_or_default();

    let result = if request.revoke_all_sessions {
        service
            .logout_all(principal.user.id)
            .await
            .map(|_| "All sessions revoked")
    } else {
        service
            .logout(&principal.access_jti)
            .await
            .map(|()| "Successfully logged out")
    };

    match result {
        Ok(message) => (StatusCode::OK, Json(MessageResponse::new(message))).into_response(),
        Err(err) => err.into_response(),
    }
}
