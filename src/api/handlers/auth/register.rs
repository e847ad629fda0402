use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

use super::types::{RegisterRequest, UserProfile};
use crate::auth::{AuthService, Registration};

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = UserProfile),
        (status = 400, description = "Invalid email, username or password"),
        (status = 409, description = "Email or username already registered"),
    ),
    tag = "auth"
)]
#[instrument(skip(service, payload))]
pub async fn register(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RegisterRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let registration = Registration {
        email: request.email,
        username: request.username,
        password: request.password,
        first_name: request.first_name,
        last_name: request.last_name,
    };

    match service.register(registration).await {
        Ok(user) => (StatusCode::CREATED, Json(UserProfile::from(&user))).into_response(),
        Err(err) => err.into_response(),
    }
}
