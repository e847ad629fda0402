//! Authentication core: login, token rotation, request authentication,
//! logout and password reset.
//!
//! Ordering rules between the session store and the cache:
//! - create / rotate: the store write happens first, the cache write after;
//! - revoke / rotate: the cache entry is dropped before the store write.
//!
//! Cache errors are logged at `warn` and never reach the caller.

use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    cache::{CacheStats, SessionCache},
    config::{AuthConfig, RESET_TOKEN_TTL_SECONDS},
    credentials::CredentialStore,
    error::{AuthError, StoreError},
    models::{CachedSession, DEFAULT_ROLE, DEFAULT_ROLES, NewSession, NewUser, Rotation, Session, User},
    password::{hash_password, validate_password_strength, verify_password},
    sessions::SessionStore,
    token::{TokenCodec, TokenError, TokenKind},
    utils::{generate_reset_token, normalize_identifier, valid_email, valid_username},
};

/// Advisory request metadata recorded on the session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_jti: String,
    pub refresh_jti: String,
    /// Expiry of the access token.
    pub expires_at: DateTime<Utc>,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: Session,
    pub tokens: TokenPair,
}

/// Identity resolved for a protected request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub session_id: Uuid,
    pub access_jti: String,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

pub struct AuthService {
    config: AuthConfig,
    tokens: TokenCodec,
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    cache: Arc<dyn SessionCache>,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

/// Log why a bearer token was refused and return the error the caller sees.
fn reject(reason: &'static str, err: AuthError) -> AuthError {
    debug!(reason, "Rejected bearer token");
    err
}

fn reject_refresh(reason: &'static str) -> AuthError {
    debug!(reason, "Rejected refresh token");
    AuthError::InvalidRefreshToken
}

fn signing_error(err: TokenError) -> AuthError {
    AuthError::Internal(anyhow!(err))
}

async fn check_password(password: &str, stored_hash: String) -> Result<bool, AuthError> {
    let password = password.to_string();
    let outcome = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .context("password verification task failed")?;
    Ok(outcome.unwrap_or_else(|err| {
        error!("Stored password hash is unusable: {err}");
        false
    }))
}

async fn new_password_hash(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")??;
    Ok(hash)
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        tokens: TokenCodec,
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        Self {
            config,
            tokens,
            credentials,
            sessions,
            cache,
        }
    }

    /// Build the service and its token codec from configuration.
    ///
    /// # Errors
    /// Returns an error if the secret or algorithm is rejected by the codec.
    pub fn from_config(
        config: AuthConfig,
        jwt_secret: &SecretString,
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        cache: Arc<dyn SessionCache>,
    ) -> anyhow::Result<Self> {
        let tokens = TokenCodec::new(
            jwt_secret,
            config.jwt_algorithm(),
            config.access_token_ttl(),
        )?;
        Ok(Self::new(config, tokens, credentials, sessions, cache))
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub const fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    #[must_use]
    pub fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    async fn lookup(&self, identifier: &str) -> Result<Option<User>, AuthError> {
        let normalized = normalize_identifier(identifier);
        if normalized.is_empty() {
            return Ok(None);
        }
        if let Some(user) = self.credentials.find_by_email(&normalized).await? {
            return Ok(Some(user));
        }
        Ok(self.credentials.find_by_username(&normalized).await?)
    }

    /// Verify credentials and apply the lockout policy.
    ///
    /// Unknown identifiers and wrong passwords both yield
    /// [`AuthError::InvalidCredentials`].
    ///
    /// # Errors
    /// `InvalidCredentials`, `AccountLocked`, `AccountInactive`, or a store failure.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
        ip_address: Option<&str>,
    ) -> Result<User, AuthError> {
        let Some(user) = self.lookup(identifier).await? else {
            debug!("Login rejected: unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        if user.is_locked() {
            warn!(user_id = %user.id, "Login rejected: account locked");
            return Err(AuthError::AccountLocked);
        }
        if user.is_inactive() {
            warn!(user_id = %user.id, "Login rejected: account inactive");
            return Err(AuthError::AccountInactive);
        }

        // Counted before Argon2 runs: at most LOCKOUT_THRESHOLD checks in flight.
        let Some(attempt) = self.credentials.claim_login_attempt(user.id).await? else {
            warn!(user_id = %user.id, "Login rejected: lockout budget exhausted");
            return Err(AuthError::AccountLocked);
        };

        let matches = match user.password_hash.clone() {
            Some(stored_hash) => check_password(password, stored_hash).await?,
            None => false,
        };

        if !matches {
            let failure = self.credentials.record_login_failure(user.id).await?;
            if failure.locked {
                warn!(
                    user_id = %user.id,
                    attempts = failure.failed_login_attempts,
                    "Account locked after repeated failed logins"
                );
            } else {
                debug!(user_id = %user.id, attempt, "Login rejected: wrong password");
            }
            return Err(AuthError::InvalidCredentials);
        }

        if !self
            .credentials
            .record_login_success(user.id, ip_address)
            .await?
        {
            warn!(user_id = %user.id, "Login rejected: account locked during verification");
            return Err(AuthError::AccountLocked);
        }

        // Reload so the caller sees the promoted status and reset counter.
        self.credentials
            .find_by_id(user.id)
            .await?
            .ok_or(AuthError::InvalidCredentials)
    }

    /// Sign a fresh access/refresh pair. Does not touch the session store.
    ///
    /// # Errors
    /// Returns an internal error if signing fails.
    pub fn issue_token_pair(&self, user: &User) -> Result<TokenPair, AuthError> {
        let access = self.tokens.issue_access(user).map_err(signing_error)?;
        let refresh = self.tokens.issue_refresh(user.id).map_err(signing_error)?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            access_jti: access.jti,
            refresh_jti: refresh.jti,
            expires_at: access.expires_at,
            expires_in: self.tokens.access_ttl().num_seconds(),
        })
    }

    /// Record the session for `tokens`, then cache it.
    ///
    /// # Errors
    /// [`AuthError::Conflict`] on a duplicate `jti`, or a store failure.
    pub async fn create_session(
        &self,
        user: &User,
        tokens: &TokenPair,
        client: &ClientInfo,
    ) -> Result<Session, AuthError> {
        let session = self
            .sessions
            .create(NewSession {
                user_id: user.id,
                access_jti: tokens.access_jti.clone(),
                refresh_jti: tokens.refresh_jti.clone(),
                expires_at: tokens.expires_at,
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            })
            .await?;

        self.cache_put(&session, user).await;
        Ok(session)
    }

    /// Authenticate, issue tokens and open a session.
    ///
    /// # Errors
    /// Any error from [`Self::authenticate`] or [`Self::create_session`].
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome, AuthError> {
        let user = self
            .authenticate(identifier, password, client.ip_address.as_deref())
            .await?;
        let tokens = self.issue_token_pair(&user)?;
        let session = self.create_session(&user, &tokens, client).await?;

        info!(user_id = %user.id, session_id = %session.id, "User logged in");
        Ok(LoginOutcome {
            user,
            session,
            tokens,
        })
    }

    /// Exchange a refresh token for a new pair, rotating the session in place.
    ///
    /// The old refresh token stops matching the session row, so it works once.
    ///
    /// # Errors
    /// [`AuthError::InvalidRefreshToken`] for every validation failure.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.tokens.verify(refresh_token).map_err(|err| {
            debug!("Refresh token verification failed: {err}");
            AuthError::InvalidRefreshToken
        })?;
        if claims.kind != TokenKind::Refresh {
            return Err(reject_refresh("wrong token kind"));
        }

        let Some(session) = self.sessions.find_by_refresh_jti(&claims.jti).await? else {
            return Err(reject_refresh("no session for refresh jti"));
        };
        if session.is_revoked {
            return Err(reject_refresh("session revoked"));
        }
        if session.user_id.to_string() != claims.sub {
            return Err(reject_refresh("subject does not own session"));
        }

        let user = match self.credentials.find_by_id(session.user_id).await? {
            Some(user) if !user.is_inactive() => user,
            Some(_) => return Err(reject_refresh("user inactive")),
            None => return Err(reject_refresh("user missing")),
        };

        let tokens = self.issue_token_pair(&user)?;
        let rotation = Rotation {
            access_jti: tokens.access_jti.clone(),
            refresh_jti: tokens.refresh_jti.clone(),
            expires_at: tokens.expires_at,
        };

        self.cache_invalidate(&session.access_jti).await;
        let Some(rotated) = self.sessions.rotate(&session, &rotation).await? else {
            return Err(reject_refresh("refresh jti already rotated"));
        };
        self.cache_put(&rotated, &user).await;

        debug!(user_id = %user.id, session_id = %rotated.id, "Session rotated");
        Ok(tokens)
    }

    /// Resolve the user behind an access token.
    ///
    /// Cache hits are checked directly; misses fall back to the session store
    /// and repopulate the cache. The user is always loaded live.
    ///
    /// # Errors
    /// A 401-class error for every rejection; the reason is only logged.
    pub async fn authenticate_request(&self, bearer_token: &str) -> Result<Principal, AuthError> {
        let claims = self.tokens.verify(bearer_token).map_err(|err| {
            debug!("Access token verification failed: {err}");
            AuthError::InvalidToken
        })?;
        if claims.kind != TokenKind::Access {
            return Err(reject("wrong token kind", AuthError::InvalidToken));
        }
        let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
            return Err(reject("subject is not a user id", AuthError::InvalidToken));
        };

        let now = Utc::now();
        let cached = self.cache_get(&claims.jti).await;
        let (session_id, fresh_session) = match cached {
            Some(snapshot) => {
                if snapshot.is_revoked {
                    return Err(reject("cached session revoked", AuthError::SessionInvalid));
                }
                if now >= snapshot.expires_at {
                    return Err(reject("cached session expired", AuthError::SessionInvalid));
                }
                if snapshot.user_id != user_id {
                    return Err(reject("cached session owner mismatch", AuthError::SessionInvalid));
                }
                (snapshot.session_id, None)
            }
            None => {
                let Some(session) = self.sessions.find_by_access_jti(&claims.jti).await? else {
                    return Err(reject("session not found", AuthError::SessionInvalid));
                };
                if session.is_revoked {
                    return Err(reject("session revoked", AuthError::SessionInvalid));
                }
                if session.is_expired_at(now) {
                    return Err(reject("session expired", AuthError::SessionInvalid));
                }
                if session.user_id != user_id {
                    return Err(reject("session owner mismatch", AuthError::SessionInvalid));
                }
                (session.id, Some(session))
            }
        };

        let user = match self.credentials.find_by_id(user_id).await? {
            Some(user) if !user.is_inactive() => user,
            Some(_) => return Err(reject("user inactive", AuthError::InvalidToken)),
            None => return Err(reject("user missing", AuthError::InvalidToken)),
        };

        if let Some(session) = fresh_session {
            self.repopulate(&session, &user).await?;
        }

        Ok(Principal {
            user,
            session_id,
            access_jti: claims.jti,
        })
    }

    /// Revoke the session owning `access_jti`. Idempotent.
    ///
    /// # Errors
    /// Returns a store failure.
    pub async fn logout(&self, access_jti: &str) -> Result<(), AuthError> {
        self.cache_invalidate(access_jti).await;
        if let Some(session) = self.sessions.find_by_access_jti(access_jti).await? {
            self.sessions.revoke(session.id).await?;
            // Drops a snapshot a concurrent cache miss wrote after the first pass.
            self.cache_invalidate(access_jti).await;
            info!(user_id = %session.user_id, session_id = %session.id, "Session revoked");
        }
        Ok(())
    }

    /// Revoke every session of a user.
    ///
    /// # Errors
    /// Returns a store failure.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        self.cache_invalidate_all(user_id).await;
        let revoked = self.sessions.revoke_all_for_user(user_id).await?;
        if revoked > 0 {
            self.cache_invalidate_all(user_id).await;
        }
        info!(user_id = %user_id, revoked, "Revoked all sessions");
        Ok(revoked)
    }

    /// Start a password reset. Succeeds whether or not the email is known.
    ///
    /// # Errors
    /// Returns a store failure or an RNG failure.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_identifier(email);
        let Some(user) = self.credentials.find_by_email(&email).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_reset_token()?;
        let expires_at = Utc::now() + Duration::seconds(RESET_TOKEN_TTL_SECONDS);
        self.credentials
            .set_reset_token(user.id, &token, expires_at)
            .await?;

        // No mail delivery: the token is surfaced through the log.
        info!(
            user_id = %user.id,
            reset_token = %token,
            expires_at = %expires_at.to_rfc3339(),
            "Password reset requested"
        );
        Ok(())
    }

    /// Finish a password reset with the emailed token.
    ///
    /// # Errors
    /// [`AuthError::InvalidResetToken`] for unknown or expired tokens,
    /// [`AuthError::Validation`] for a weak password.
    pub async fn confirm_password_reset(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_password_strength(new_password).map_err(AuthError::Validation)?;

        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidResetToken);
        }
        let Some(user) = self.credentials.find_by_reset_token(token).await? else {
            return Err(AuthError::InvalidResetToken);
        };
        if user
            .password_reset_expires
            .is_none_or(|expires_at| expires_at < Utc::now())
        {
            return Err(AuthError::InvalidResetToken);
        }

        let hash = new_password_hash(new_password).await?;
        if !self
            .credentials
            .complete_password_reset(user.id, token, &hash)
            .await?
        {
            return Err(AuthError::InvalidResetToken);
        }

        info!(user_id = %user.id, "Password reset completed");
        Ok(())
    }

    /// Create a `pending_verification` account with the default role.
    ///
    /// # Errors
    /// [`AuthError::Validation`] for bad input, [`AuthError::AccountExists`] for
    /// a taken email or username.
    pub async fn register(&self, registration: Registration) -> Result<User, AuthError> {
        let email = normalize_identifier(&registration.email);
        if !valid_email(&email) {
            return Err(AuthError::Validation("Invalid email address".to_string()));
        }
        let username = normalize_identifier(&registration.username);
        if !valid_username(&username) {
            return Err(AuthError::Validation(
                "Username must be 3-50 characters and contain only letters, digits, underscores, or hyphens"
                    .to_string(),
            ));
        }
        validate_password_strength(&registration.password).map_err(AuthError::Validation)?;

        if self.credentials.find_by_email(&email).await?.is_some() {
            return Err(AuthError::AccountExists(
                "Email already registered".to_string(),
            ));
        }
        if self.credentials.find_by_username(&username).await?.is_some() {
            return Err(AuthError::AccountExists("Username already taken".to_string()));
        }

        let full_name = [registration.first_name, registration.last_name]
            .into_iter()
            .flatten()
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let password_hash = new_password_hash(&registration.password).await?;
        let user = self
            .credentials
            .create_user(NewUser {
                email,
                username,
                full_name: (!full_name.is_empty()).then_some(full_name),
                password_hash,
            })
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => {
                    AuthError::AccountExists("Email or username already registered".to_string())
                }
                other => other.into(),
            })?;

        if !self.credentials.assign_role(user.id, DEFAULT_ROLE).await? {
            warn!(user_id = %user.id, "Default role {DEFAULT_ROLE} is missing; user has no roles");
        }

        info!(user_id = %user.id, "User registered");
        self.credentials
            .find_by_id(user.id)
            .await?
            .ok_or_else(|| AuthError::Internal(anyhow!("registered user {} vanished", user.id)))
    }

    /// Clear the lockout of an account.
    ///
    /// # Errors
    /// [`AuthError::UserNotFound`] or a store failure.
    pub async fn unlock_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        if !self.credentials.unlock(user_id).await? {
            return Err(AuthError::UserNotFound);
        }
        info!(user_id = %user_id, "Account unlocked");
        Ok(())
    }

    /// Deactivate an account and revoke all of its sessions.
    ///
    /// # Errors
    /// [`AuthError::UserNotFound`] or a store failure.
    pub async fn disable_account(&self, user_id: Uuid) -> Result<u64, AuthError> {
        if !self.credentials.set_active(user_id, false).await? {
            return Err(AuthError::UserNotFound);
        }
        info!(user_id = %user_id, "Account disabled");
        self.logout_all(user_id).await
    }

    /// Create any missing built-in role. Existing roles are left untouched.
    ///
    /// # Errors
    /// Returns a store failure.
    pub async fn seed_default_roles(&self) -> Result<usize, AuthError> {
        let mut created = 0;
        for role in &DEFAULT_ROLES {
            if self.credentials.ensure_role(role).await? {
                info!(role = role.name, "Created default role");
                created += 1;
            }
        }
        Ok(created)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await.unwrap_or_else(|err| {
            warn!("Session cache stats unavailable: {err}");
            CacheStats::unavailable()
        })
    }

    /// Cache a session read from the store, then confirm the store still
    /// holds it live. A logout or rotation that landed in between evicts the
    /// snapshot again.
    async fn repopulate(&self, session: &Session, user: &User) -> Result<(), AuthError> {
        if !self.cache_put(session, user).await {
            return Ok(());
        }
        let still_live = self
            .sessions
            .find_by_access_jti(&session.access_jti)
            .await?
            .is_some_and(|current| current.is_valid_at(Utc::now()));
        if !still_live {
            debug!(session_id = %session.id, "Session changed while caching; evicting");
            self.cache_invalidate(&session.access_jti).await;
        }
        Ok(())
    }

    async fn cache_put(&self, session: &Session, user: &User) -> bool {
        match self.cache.put(session, user).await {
            Ok(()) => true,
            Err(err) => {
                warn!(session_id = %session.id, "Session cache write failed: {err}");
                false
            }
        }
    }

    async fn cache_get(&self, access_jti: &str) -> Option<CachedSession> {
        self.cache.get(access_jti).await.unwrap_or_else(|err| {
            warn!("Session cache read failed, falling back to store: {err}");
            None
        })
    }

    async fn cache_invalidate(&self, access_jti: &str) {
        if let Err(err) = self.cache.invalidate(access_jti).await {
            warn!("Session cache invalidation failed: {err}");
        }
    }

    async fn cache_invalidate_all(&self, user_id: Uuid) {
        match self.cache.invalidate_all_for_user(user_id).await {
            Ok(removed) => debug!(user_id = %user_id, removed, "Dropped cached sessions"),
            Err(err) => warn!(user_id = %user_id, "Session cache bulk invalidation failed: {err}"),
        }
    }
}
