//! Account administration endpoints, restricted to the `Admin` role.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{info, instrument};

use super::auth::{principal::require_auth, types::AccountRequest};
use crate::auth::{AuthService, Principal, require_role};

const ADMIN_ROLE: &str = "Admin";

async fn require_admin(headers: &HeaderMap, service: &AuthService) -> Result<Principal, Response> {
    let principal = require_auth(headers, service)
        .await
        .map_err(IntoResponse::into_response)?;
    require_role(&principal.user, &[ADMIN_ROLE]).map_err(IntoResponse::into_response)?;
    Ok(principal)
}

#[utoipa::path(
    post,
    path = "/v1/admin/users/unlock",
    request_body = AccountRequest,
    responses(
        (status = 204, description = "Account unlocked"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip(headers, service, payload))]
pub async fn unlock_user(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<AccountRequest>>,
) -> Response {
    let admin = match require_admin(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service.unlock_account(request.user_id).await {
        Ok(()) => {
            info!(admin_id = %admin.user.id, user_id = %request.user_id, "Admin unlocked account");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/admin/users/disable",
    request_body = AccountRequest,
    responses(
        (status = 204, description = "Account disabled and every session revoked"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "User not found"),
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip(headers, service, payload))]
pub async fn disable_user(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<AccountRequest>>,
) -> Response {
    let admin = match require_admin(&headers, &service).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    match service.disable_account(request.user_id).await {
        Ok(revoked) => {
            info!(
                admin_id = %admin.user.id,
                user_id = %request.user_id,
                revoked,
                "Admin disabled account"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => err.into_response(),
    }
}
