//! Small helpers for identifier normalization and reset tokens.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;

/// Normalize an email or username for lookup/uniqueness checks.
pub(crate) fn normalize_identifier(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// 3-50 characters of lowercase letters, digits, `_` or `-`.
pub(crate) fn valid_username(username_normalized: &str) -> bool {
    Regex::new(r"^[a-z0-9_-]{3,50}$").is_ok_and(|regex| regex.is_match(username_normalized))
}

/// Create a new password reset token (32 random bytes, URL-safe base64).
pub(crate) fn generate_reset_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate password reset token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_identifier_trims_and_lowercases() {
        assert_eq!(normalize_identifier(" Alice@Ex.COM "), "alice@ex.com");
        assert_eq!(normalize_identifier("Alice"), "alice");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("alice@ex.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn valid_username_rules() {
        assert!(valid_username("alice_01"));
        assert!(valid_username("a-b"));
        assert!(!valid_username("al"));
        assert!(!valid_username("alice smith"));
        assert!(!valid_username("alice@ex"));
        assert!(!valid_username(&"a".repeat(51)));
    }

    #[test]
    fn reset_tokens_are_url_safe_and_unique() -> Result<()> {
        let first = generate_reset_token()?;
        let second = generate_reset_token()?;
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
        assert!(
            first
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        Ok(())
    }
}
