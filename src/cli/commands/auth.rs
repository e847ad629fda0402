use crate::auth::config::{AuthConfig, MAX_ACCESS_TOKEN_TTL_MINUTES, parse_jwt_algorithm};
use anyhow::{Context, bail};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ALGORITHM: &str = "jwt-algorithm";
pub const ARG_ACCESS_TOKEN_TTL_MINUTES: &str = "access-token-ttl-minutes";

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub config: AuthConfig,
}

impl Options {
    /// Parse token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret is missing or the algorithm unsupported.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };

        let algorithm = matches
            .get_one::<String>(ARG_JWT_ALGORITHM)
            .map_or("HS256", String::as_str);
        let algorithm = parse_jwt_algorithm(algorithm)
            .with_context(|| format!("invalid --{ARG_JWT_ALGORITHM}"))?;

        let mut config = AuthConfig::new().with_jwt_algorithm(algorithm);
        if let Some(minutes) = matches.get_one::<i64>(ARG_ACCESS_TOKEN_TTL_MINUTES) {
            config = config.with_access_token_ttl_minutes(*minutes);
        }

        Ok(Self { jwt_secret, config })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign and verify tokens")
                .env("ZTIAM_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_ALGORITHM)
                .long(ARG_JWT_ALGORITHM)
                .help("Token signing algorithm (HS256, HS384 or HS512)")
                .env("ZTIAM_JWT_ALGORITHM")
                .default_value("HS256"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_MINUTES)
                .long(ARG_ACCESS_TOKEN_TTL_MINUTES)
                .help("Access token lifetime in minutes")
                .env("ZTIAM_ACCESS_TOKEN_TTL_MINUTES")
                .default_value("30")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_ACCESS_TOKEN_TTL_MINUTES)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::Algorithm;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("ztiam"))
    }

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let matches = command().try_get_matches_from(vec!["ztiam", "--jwt-secret", "s3cret"])?;
        let options = Options::parse(&matches)?;
        assert_eq!(options.jwt_secret.expose_secret(), "s3cret");
        assert_eq!(options.config.jwt_algorithm(), Algorithm::HS256);
        assert_eq!(options.config.access_token_ttl_minutes(), 30);
        Ok(())
    }

    #[test]
    fn env_overrides() {
        temp_env::with_vars(
            [
                ("ZTIAM_JWT_SECRET", Some("from-env")),
                ("ZTIAM_JWT_ALGORITHM", Some("HS512")),
                ("ZTIAM_ACCESS_TOKEN_TTL_MINUTES", Some("5")),
            ],
            || {
                let matches = command().get_matches_from(vec!["ztiam"]);
                let options = Options::parse(&matches);
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.config.jwt_algorithm(), Algorithm::HS512);
                    assert_eq!(options.config.access_token_ttl().num_seconds(), 300);
                }
            },
        );
    }

    #[test]
    fn rejects_asymmetric_algorithm() -> anyhow::Result<()> {
        let matches = command().try_get_matches_from(vec![
            "ztiam",
            "--jwt-secret",
            "s3cret",
            "--jwt-algorithm",
            "RS256",
        ])?;
        assert!(Options::parse(&matches).is_err());
        Ok(())
    }

    #[test]
    fn rejects_blank_secret() -> anyhow::Result<()> {
        let matches = command().try_get_matches_from(vec!["ztiam", "--jwt-secret", "  "])?;
        let err = Options::parse(&matches).err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("missing required argument: --jwt-secret")
        );
        Ok(())
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let result = command().try_get_matches_from(vec![
            "ztiam",
            "--jwt-secret",
            "s3cret",
            "--access-token-ttl-minutes",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn ttl_above_one_week_is_rejected() {
        for minutes in ["10081", "9223372036854775807"] {
            let result = command().try_get_matches_from(vec![
                "ztiam",
                "--jwt-secret",
                "s3cret",
                "--access-token-ttl-minutes",
                minutes,
            ]);
            assert!(result.is_err(), "{minutes} should be rejected");
        }
    }
}
