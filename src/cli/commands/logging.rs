use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Accept either a count (`0..=5`) or a level name.
#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>()
            && parsed <= 5
        {
            return Ok(parsed);
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err(format!("invalid log level: {level}")),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("ZTIAM_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_counts_flags() {
        let command = with_args(Command::new("ztiam"));
        let matches = command.get_matches_from(vec!["ztiam", "-vvv"]);
        assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
    }

    #[test]
    fn verbosity_from_env_level_name() {
        temp_env::with_vars([("ZTIAM_LOG_LEVEL", Some("info"))], || {
            let command = with_args(Command::new("ztiam"));
            let matches = command.get_matches_from(vec!["ztiam"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(2));
        });
    }

    #[test]
    fn verbosity_rejects_unknown_level() {
        temp_env::with_vars([("ZTIAM_LOG_LEVEL", Some("loud"))], || {
            let command = with_args(Command::new("ztiam"));
            let result = command.try_get_matches_from(vec!["ztiam"]);
            assert!(result.is_err());
        });
    }
}
