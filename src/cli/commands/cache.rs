use crate::auth::config::AuthConfig;
use clap::{Arg, ArgMatches, Command};

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_CACHE_TTL_SECONDS: &str = "cache-ttl-seconds";
pub const ARG_CACHE_CONNECT_TIMEOUT_MS: &str = "cache-connect-timeout-ms";
pub const ARG_CACHE_RESPONSE_TIMEOUT_MS: &str = "cache-response-timeout-ms";

#[derive(Debug, Clone)]
pub struct Options {
    /// `None` disables the session cache.
    pub redis_url: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            redis_url: matches
                .get_one::<String>(ARG_REDIS_URL)
                .cloned()
                .filter(|value| !value.trim().is_empty()),
            ttl_seconds: matches.get_one::<u64>(ARG_CACHE_TTL_SECONDS).copied(),
            connect_timeout_ms: matches.get_one::<u64>(ARG_CACHE_CONNECT_TIMEOUT_MS).copied(),
            response_timeout_ms: matches
                .get_one::<u64>(ARG_CACHE_RESPONSE_TIMEOUT_MS)
                .copied(),
        }
    }

    /// Apply the cache settings on top of `config`.
    #[must_use]
    pub fn apply(&self, mut config: AuthConfig) -> AuthConfig {
        if let Some(seconds) = self.ttl_seconds {
            config = config.with_cache_ttl_seconds(seconds);
        }
        if let Some(millis) = self.connect_timeout_ms {
            config = config.with_cache_connect_timeout_ms(millis);
        }
        if let Some(millis) = self.response_timeout_ms {
            config = config.with_cache_response_timeout_ms(millis);
        }
        config
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis URL for the session cache (cache disabled when unset)")
                .env("ZTIAM_REDIS_URL"),
        )
        .arg(
            Arg::new(ARG_CACHE_TTL_SECONDS)
                .long(ARG_CACHE_TTL_SECONDS)
                .help("Upper bound for cached session entries, in seconds")
                .env("ZTIAM_CACHE_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CACHE_CONNECT_TIMEOUT_MS)
                .long(ARG_CACHE_CONNECT_TIMEOUT_MS)
                .help("Redis connect timeout in milliseconds")
                .env("ZTIAM_CACHE_CONNECT_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CACHE_RESPONSE_TIMEOUT_MS)
                .long(ARG_CACHE_RESPONSE_TIMEOUT_MS)
                .help("Redis command timeout in milliseconds")
                .env("ZTIAM_CACHE_RESPONSE_TIMEOUT_MS")
                .default_value("5000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cache_disabled_by_default() {
        temp_env::with_vars([("ZTIAM_REDIS_URL", None::<&str>)], || {
            let matches = with_args(Command::new("ztiam")).get_matches_from(vec!["ztiam"]);
            let options = Options::parse(&matches);
            assert!(options.redis_url.is_none());

            let config = options.apply(AuthConfig::new());
            assert_eq!(config.cache_ttl(), Duration::from_secs(900));
            assert_eq!(config.cache_connect_timeout(), Duration::from_secs(2));
            assert_eq!(config.cache_response_timeout(), Duration::from_secs(5));
        });
    }

    #[test]
    fn cache_settings_from_env() {
        temp_env::with_vars(
            [
                ("ZTIAM_REDIS_URL", Some("redis://cache:6379/0")),
                ("ZTIAM_CACHE_TTL_SECONDS", Some("60")),
                ("ZTIAM_CACHE_RESPONSE_TIMEOUT_MS", Some("250")),
            ],
            || {
                let matches = with_args(Command::new("ztiam")).get_matches_from(vec!["ztiam"]);
                let options = Options::parse(&matches);
                assert_eq!(options.redis_url.as_deref(), Some("redis://cache:6379/0"));

                let config = options.apply(AuthConfig::new());
                assert_eq!(config.cache_ttl(), Duration::from_secs(60));
                assert_eq!(config.cache_response_timeout(), Duration::from_millis(250));
            },
        );
    }

    #[test]
    fn blank_redis_url_disables_cache() {
        temp_env::with_vars([("ZTIAM_REDIS_URL", Some(""))], || {
            let matches = with_args(Command::new("ztiam")).get_matches_from(vec!["ztiam"]);
            assert!(Options::parse(&matches).redis_url.is_none());
        });
    }
}
