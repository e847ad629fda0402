//! Signed, expiring bearer tokens.
//!
//! Claims: `sub` (user id), `jti`, `type` (`access` or `refresh`) and `exp`
//! (epoch seconds). Access tokens also carry `email` and the active `roles`
//! at issuance time; that snapshot is informational only.

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::User;

pub const REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub jti: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// Extra claims embedded in access tokens only.
#[derive(Debug, Clone, Default)]
pub struct AccessClaims {
    pub email: String,
    pub roles: Vec<String>,
}

/// Why a token was rejected. Only ever logged; callers see one opaque error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
    #[error("failed to sign token")]
    Signing,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    validation: Validation,
    access_ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("access_ttl", &self.access_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec for a shared HMAC secret.
    ///
    /// # Errors
    /// Returns an error if the secret is empty or the algorithm is not HMAC based.
    pub fn new(secret: &SecretString, algorithm: Algorithm, access_ttl: Duration) -> Result<Self> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            bail!("unsupported JWT algorithm {algorithm:?}: only HS256, HS384 and HS512 are allowed");
        }
        let secret = secret.expose_secret().as_bytes();
        if secret.is_empty() {
            bail!("JWT secret must not be empty");
        }

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            algorithm,
            validation,
            access_ttl,
        })
    }

    #[must_use]
    pub const fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign a token of `kind` for `subject` valid for `ttl`.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if encoding fails or the expiry is out
    /// of range.
    pub fn issue(
        &self,
        subject: Uuid,
        kind: TokenKind,
        extra: Option<AccessClaims>,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or(TokenError::Signing)?;
        let (email, roles) = match extra {
            Some(extra) => (Some(extra.email), Some(extra.roles)),
            None => (None, None),
        };
        let claims = Claims {
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            kind,
            exp: expires_at.timestamp(),
            email,
            roles,
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|_| TokenError::Signing)?;

        Ok(IssuedToken {
            token,
            jti: claims.jti,
            // Truncated to whole seconds so it matches the signed `exp`.
            expires_at: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    /// Access token carrying the user's email and active role names.
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn issue_access(&self, user: &User) -> Result<IssuedToken, TokenError> {
        let extra = AccessClaims {
            email: user.email.clone(),
            roles: user.active_role_names(),
        };
        self.issue(user.id, TokenKind::Access, Some(extra), self.access_ttl)
    }

    /// # Errors
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn issue_refresh(&self, user_id: Uuid) -> Result<IssuedToken, TokenError> {
        self.issue(
            user_id,
            TokenKind::Refresh,
            None,
            Duration::seconds(REFRESH_TOKEN_TTL_SECONDS),
        )
    }

    /// Check signature and expiry together and return the claims.
    ///
    /// # Errors
    /// Returns the concrete [`TokenError`] for diagnostics.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(secret: &str) -> Result<TokenCodec> {
        TokenCodec::new(
            &SecretString::from(secret.to_string()),
            Algorithm::HS256,
            Duration::minutes(30),
        )
    }

    #[test]
    fn access_token_round_trip() -> Result<()> {
        let codec = codec("test-secret")?;
        let subject = Uuid::new_v4();
        let issued = codec.issue(
            subject,
            TokenKind::Access,
            Some(AccessClaims {
                email: "alice@ex.com".to_string(),
                roles: vec!["User".to_string()],
            }),
            Duration::minutes(30),
        )?;

        let claims = codec.verify(&issued.token)?;
        assert_eq!(claims.sub, subject.to_string());
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp, issued.expires_at.timestamp());
        assert_eq!(claims.email.as_deref(), Some("alice@ex.com"));
        assert_eq!(claims.roles, Some(vec!["User".to_string()]));
        Ok(())
    }

    #[test]
    fn refresh_token_has_no_profile_claims() -> Result<()> {
        let codec = codec("test-secret")?;
        let issued = codec.issue_refresh(Uuid::new_v4())?;
        let claims = codec.verify(&issued.token)?;

        assert_eq!(claims.kind, TokenKind::Refresh);
        assert!(claims.email.is_none());
        assert!(claims.roles.is_none());
        let ttl = issued.expires_at - Utc::now();
        assert!(ttl > Duration::days(6) && ttl <= Duration::days(7));
        Ok(())
    }

    #[test]
    fn each_token_gets_a_fresh_jti() -> Result<()> {
        let codec = codec("test-secret")?;
        let user = Uuid::new_v4();
        let first = codec.issue_refresh(user)?;
        let second = codec.issue_refresh(user)?;
        assert_ne!(first.jti, second.jti);
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> Result<()> {
        let codec = codec("test-secret")?;
        let issued = codec.issue(
            Uuid::new_v4(),
            TokenKind::Access,
            None,
            Duration::seconds(-5),
        )?;
        assert_eq!(codec.verify(&issued.token), Err(TokenError::Expired));
        Ok(())
    }

    #[test]
    fn unrepresentable_expiry_is_an_error() -> Result<()> {
        let codec = codec("test-secret")?;
        let result = codec.issue(
            Uuid::new_v4(),
            TokenKind::Access,
            None,
            Duration::days(365 * 1_000_000),
        );
        assert!(matches!(result, Err(TokenError::Signing)));
        Ok(())
    }

    #[test]
    fn foreign_signature_is_rejected() -> Result<()> {
        let issued = codec("one-secret")?.issue_refresh(Uuid::new_v4())?;
        assert_eq!(
            codec("another-secret")?.verify(&issued.token),
            Err(TokenError::InvalidSignature)
        );
        Ok(())
    }

    #[test]
    fn garbage_is_malformed() -> Result<()> {
        let codec = codec("test-secret")?;
        assert_eq!(codec.verify("not.a.token"), Err(TokenError::Malformed));
        assert_eq!(codec.verify(""), Err(TokenError::Malformed));
        Ok(())
    }

    #[test]
    fn rejects_non_hmac_algorithms_and_empty_secrets() {
        let secret = SecretString::from("secret".to_string());
        assert!(TokenCodec::new(&secret, Algorithm::RS256, Duration::minutes(1)).is_err());
        let empty = SecretString::from(String::new());
        assert!(TokenCodec::new(&empty, Algorithm::HS256, Duration::minutes(1)).is_err());
    }
}
