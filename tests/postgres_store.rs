//! Runs against a real database when `ZTIAM_TEST_DSN` is set; skipped otherwise.

use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::OnceCell;
use ulid::Ulid;
use ztiam::auth::{
    AuthConfig, AuthError, AuthService, ClientInfo, Registration,
    cache::NoopSessionCache,
    credentials::CredentialStore,
    repo::{self, PgCredentialStore, PgSessionStore},
    sessions::SessionStore,
};

// Both tests share one database; concurrent DDL would race.
static SCHEMA: OnceCell<()> = OnceCell::const_new();

async fn service() -> Result<Option<(AuthService, Arc<PgCredentialStore>, Arc<PgSessionStore>)>> {
    let Ok(dsn) = std::env::var("ZTIAM_TEST_DSN") else {
        eprintln!("ZTIAM_TEST_DSN not set; skipping postgres store tests");
        return Ok(None);
    };
    let pool = PgPoolOptions::new().max_connections(2).connect(&dsn).await?;
    SCHEMA
        .get_or_try_init(|| repo::apply_schema(&pool))
        .await?;

    let credentials = Arc::new(PgCredentialStore::new(pool.clone()));
    let sessions = Arc::new(PgSessionStore::new(pool));
    let service = AuthService::from_config(
        AuthConfig::new(),
        &SecretString::from("postgres-test-secret".to_string()),
        credentials.clone(),
        sessions.clone(),
        Arc::new(NoopSessionCache),
    )?;
    service.seed_default_roles().await?;
    Ok(Some((service, credentials, sessions)))
}

#[tokio::test]
async fn session_lifecycle_against_postgres() -> Result<()> {
    let Some((service, credentials, sessions)) = service().await? else {
        return Ok(());
    };

    let username = Ulid::new().to_string().to_lowercase();
    let user = service
        .register(Registration {
            email: format!("{username}@example.com"),
            username: username.clone(),
            password: "Secur3Pass!".to_string(),
            first_name: Some("Test".to_string()),
            last_name: None,
        })
        .await?;
    assert_eq!(user.active_role_names(), vec!["User".to_string()]);

    let login = service
        .login(&username, "Secur3Pass!", &ClientInfo::default())
        .await?;
    let rotated = service.refresh(&login.tokens.refresh_token).await?;
    let replay = service.refresh(&login.tokens.refresh_token).await;
    assert!(matches!(replay, Err(AuthError::InvalidRefreshToken)));

    let row = sessions
        .find_by_access_jti(&rotated.access_jti)
        .await?
        .context("rotated session missing")?;
    assert_eq!(row.id, login.session.id);

    service.logout(&rotated.access_jti).await?;
    let result = service.authenticate_request(&rotated.access_token).await;
    assert!(matches!(result, Err(AuthError::SessionInvalid)));

    for _ in 0..5 {
        let _ = service.authenticate(&username, "wrong", None).await;
    }
    let stored = credentials
        .find_by_id(user.id)
        .await?
        .context("user missing")?;
    assert!(stored.is_locked());
    Ok(())
}

#[tokio::test]
async fn seeding_is_idempotent_against_postgres() -> Result<()> {
    let Some((service, _, _)) = service().await? else {
        return Ok(());
    };
    assert_eq!(service.seed_default_roles().await?, 0);
    Ok(())
}
