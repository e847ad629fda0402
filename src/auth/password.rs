//! Password hashing (Argon2id, PHC strings) and strength rules.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{
        self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 100;

/// Hash a password with a fresh random salt.
///
/// # Errors
/// Returns an error if Argon2 rejects the input.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Compare a password against a stored PHC hash.
///
/// A mismatch is `Ok(false)`; an unparsable stored hash is an error.
///
/// # Errors
/// Returns an error if the stored hash is malformed.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|err| anyhow!("invalid password hash: {err}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("failed to verify password: {err}")),
    }
}

/// Check the minimum strength rules, naming the first one that fails.
///
/// # Errors
/// Returns a human-readable message for the caller.
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
        ));
    }
    if length > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} characters long"
        ));
    }

    let has_upper = password.chars().any(char::is_uppercase);
    let has_lower = password.chars().any(char::is_lowercase);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_upper && has_lower && has_digit) {
        return Err(
            "Password must contain at least one uppercase letter, one lowercase letter, and one digit"
                .to_string(),
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() -> Result<()> {
        let hash = hash_password("Secur3Pass!")?;
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Secur3Pass!", &hash)?);
        assert!(!verify_password("wrong", &hash)?);
        Ok(())
    }

    #[test]
    fn same_password_gets_different_salts() -> Result<()> {
        assert_ne!(hash_password("Secur3Pass!")?, hash_password("Secur3Pass!")?);
        Ok(())
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_password("Secur3Pass!", "not-a-phc-string").is_err());
    }

    #[test]
    fn strength_rules() {
        assert!(validate_password_strength("Secur3Pass!").is_ok());
        assert!(validate_password_strength("Sh0rt").is_err());
        assert!(validate_password_strength("alllowercase1").is_err());
        assert!(validate_password_strength("ALLUPPERCASE1").is_err());
        assert!(validate_password_strength("NoDigitsHere").is_err());
        assert!(validate_password_strength(&format!("Aa1{}", "x".repeat(100))).is_err());
    }
}
