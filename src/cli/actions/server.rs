use crate::{
    api,
    auth::{
        AuthConfig, AuthService,
        cache::{NoopSessionCache, SessionCache},
        redis_cache::RedisSessionCache,
        repo::{self, PgCredentialStore, PgSessionStore},
    },
};
use anyhow::{Context, Result, bail};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub cors_origin: Option<String>,
    pub jwt_secret: SecretString,
    pub auth_config: AuthConfig,
    pub redis_url: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the schema cannot be
/// applied, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let dsn = Url::parse(&args.dsn).context("invalid --dsn")?;
    if !matches!(dsn.scheme(), "postgres" | "postgresql") {
        bail!("unsupported DSN scheme: {}", dsn.scheme());
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn.as_str())
        .await
        .context("Failed to connect to database")?;

    repo::apply_schema(&pool)
        .await
        .context("Failed to apply database schema")?;

    let cache: Arc<dyn SessionCache> = match &args.redis_url {
        Some(url) => Arc::new(RedisSessionCache::new(
            url,
            args.auth_config.cache_ttl(),
            args.auth_config.cache_connect_timeout(),
            args.auth_config.cache_response_timeout(),
        )?),
        None => {
            warn!("No redis URL configured; session cache disabled");
            Arc::new(NoopSessionCache)
        }
    };

    let service = AuthService::from_config(
        args.auth_config,
        &args.jwt_secret,
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(PgSessionStore::new(pool.clone())),
        cache,
    )?;

    let created = service
        .seed_default_roles()
        .await
        .context("Failed to seed default roles")?;
    if created > 0 {
        info!("Seeded {created} default role(s)");
    }

    api::new(args.port, pool, Arc::new(service), args.cors_origin.as_deref()).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        (
            "cors_origin",
            args.cors_origin.clone().unwrap_or_else(|| "*".to_string()),
        ),
        (
            "jwt_algorithm",
            format!("{:?}", args.auth_config.jwt_algorithm()),
        ),
        (
            "access_token_ttl_minutes",
            args.auth_config.access_token_ttl_minutes().to_string(),
        ),
        (
            "redis_url",
            args.redis_url
                .as_deref()
                .map_or_else(|| "disabled".to_string(), redact_dsn),
        ),
        (
            "cache_ttl_seconds",
            args.auth_config.cache_ttl().as_secs().to_string(),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "ztiam {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).filter(|_| trimmed.len() > 7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_passwords() {
        assert_eq!(
            redact_dsn("postgres://ztiam:hunter2@db:5432/ztiam"),
            "postgres://ztiam:REDACTED@db:5432/ztiam"
        );
        assert_eq!(
            redact_dsn("redis://cache:6379/0"),
            "redis://cache:6379/0"
        );
        assert_eq!(redact_dsn("not a url"), "invalid-dsn");
    }

    #[test]
    fn short_commit_truncates_hashes_only() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("unknown"), "unknown");
    }

    #[tokio::test]
    async fn rejects_non_postgres_dsn() {
        let args = Args {
            port: 0,
            dsn: "mysql://root@localhost/ztiam".to_string(),
            cors_origin: None,
            jwt_secret: SecretString::from("s3cret".to_string()),
            auth_config: AuthConfig::new(),
            redis_url: None,
        };
        let err = execute(args).await.err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("unsupported DSN scheme: mysql"));
    }
}
