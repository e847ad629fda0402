use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

use super::types::{RefreshRequest, TokenResponse};
use crate::auth::AuthService;

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session rotated", body = TokenResponse),
        (status = 401, description = "Invalid refresh token"),
    ),
    tag = "auth"
)]
#[instrument(skip(service, payload))]
pub async fn refresh(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service.refresh(&request.refresh_token).await {
        Ok(pair) => (StatusCode::OK, Json(TokenResponse::from(pair))).into_response(),
        Err(err) => err.into_response(),
    }
}
