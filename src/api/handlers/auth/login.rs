use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

use super::{
    types::{LoginRequest, LoginResponse, TokenResponse, UserProfile},
    utils::client_info,
};
use crate::auth::AuthService;

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Incorrect username or password"),
        (status = 403, description = "Account locked or inactive"),
    ),
    tag = "auth"
)]
#[instrument(skip(headers, service, payload))]
pub async fn login(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let client = client_info(&headers);
    match service
        .login(&request.username, &request.password, &client)
        .await
    {
        Ok(outcome) => {
            let response = LoginResponse {
                user: UserProfile::from(&outcome.user),
                tokens: TokenResponse::from(outcome.tokens),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => err.into_response(),
    }
}
