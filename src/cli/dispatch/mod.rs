use crate::cli::{
    actions::{Action, server::Args},
    commands::{self, auth, cache},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let cors_origin = matches
        .get_one::<String>(commands::ARG_CORS_ORIGIN)
        .cloned()
        .filter(|origin| !origin.trim().is_empty());

    let auth = auth::Options::parse(matches)?;
    let cache = cache::Options::parse(matches);
    let auth_config = cache.apply(auth.config);

    Ok(Action::Server(Args {
        port,
        dsn,
        cors_origin,
        jwt_secret: auth.jwt_secret,
        auth_config,
        redis_url: cache.redis_url,
    }))
}
