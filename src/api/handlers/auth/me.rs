use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::{principal::require_auth, types::UserProfile};
use crate::auth::AuthService;

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserProfile),
        (status = 401, description = "Missing or invalid bearer token"),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> Response {
    match require_auth(&headers, &service).await {
        Ok(principal) => (
            StatusCode::OK,
            Json(UserProfile::with_permissions(&principal.user)),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
