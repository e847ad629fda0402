//! Health probe: database reachability plus session cache statistics.
//!
//! The cache never fails the probe; a degraded cache only shows up in the
//! payload because requests keep working against the session store.

use crate::{GIT_COMMIT_HASH, auth::AuthService, auth::cache::CacheStats};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tracing::{Instrument, debug, error, info_span, warn};
use utoipa::ToSchema;

const HEALTH_DB_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    cache: CacheStats,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database connection is healthy", body = Health),
        (status = 503, description = "Database connection is unhealthy", body = Health)
    ),
    tag = "health",
)]
pub async fn health(
    method: Method,
    pool: Extension<PgPool>,
    service: Extension<Arc<AuthService>>,
) -> impl IntoResponse {
    let db_healthy = database_is_healthy(&pool).await;
    if db_healthy {
        debug!("Database connection is healthy");
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_healthy { "ok" } else { "error" }.to_string(),
        cache: service.cache_stats().await,
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let status = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, x_app_headers(&health.name, &health.version, &health.commit), body)
}

/// `X-App: name:version:short-hash`.
fn x_app_headers(name: &str, version: &str, commit: &str) -> HeaderMap {
    let short_hash = if commit.len() > 7 {
        commit.get(0..7).unwrap_or("")
    } else {
        ""
    };
    let mut headers = HeaderMap::new();
    match format!("{name}:{version}:{short_hash}").parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => debug!("Failed to parse X-App header: {err}"),
    }
    headers
}

async fn database_is_healthy(pool: &PgPool) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );

    let probe = async {
        match pool.acquire().instrument(acquire_span).await {
            Ok(mut conn) => {
                let ping_span =
                    info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
                match conn.ping().instrument(ping_span).await {
                    Ok(()) => true,
                    Err(err) => {
                        error!("Failed to ping database: {err}");
                        false
                    }
                }
            }
            Err(err) => {
                error!("Failed to acquire database connection: {err}");
                false
            }
        }
    };

    if let Ok(healthy) = timeout(Duration::from_secs(HEALTH_DB_TIMEOUT_SECONDS), probe).await {
        healthy
    } else {
        warn!("Database health check timed out");
        false
    }
}
