//! Postgres implementations of the credential and session stores.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{Instrument, Span, info_span};
use uuid::Uuid;

use super::{
    credentials::CredentialStore,
    error::StoreError,
    models::{
        LOCKOUT_THRESHOLD, LoginFailure, NewSession, NewUser, Role, RoleDefinition, Rotation,
        Session, User,
    },
    sessions::SessionStore,
};

const SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str = "id, email, username, full_name, password_hash, status::text AS status, \
     is_active, is_verified, failed_login_attempts, last_login_at, last_login_ip, \
     password_reset_token, password_reset_expires, last_password_change, created_at";

const SESSION_COLUMNS: &str = "id, user_id, token_jti, refresh_token_jti, expires_at, is_revoked, \
     revoked_at, last_activity_at, ip_address, user_agent, created_at";

fn query_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Create tables, types and indexes if they are missing.
///
/// # Errors
/// Returns an error if any schema statement fails.
pub async fn apply_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .instrument(info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "MIGRATE"
        ))
        .await
        .context("failed to apply database schema")?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn roles_for(&self, user_id: Uuid) -> Result<Vec<Role>, StoreError> {
        let query = r"
            SELECT r.id, r.name, r.is_active, r.is_system_role, r.permissions
            FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
        ";
        sqlx::query_as::<_, Role>(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to load user roles"))
    }

    /// Fetch one user by a single-column filter and attach its roles.
    async fn find_where<T>(&self, column: &'static str, value: T) -> Result<Option<User>, StoreError>
    where
        T: for<'q> sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Send + 'static,
    {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to lookup user"))?;

        match user {
            Some(mut user) => {
                user.roles = self.roles_for(user.id).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_where("email", email.to_string()).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_where("username", username.to_string()).await
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.find_where("id", user_id).await
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        self.find_where("password_reset_token", token.to_string())
            .await
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let query = format!(
            "INSERT INTO users (email, username, full_name, password_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(&new_user.email)
            .bind(&new_user.username)
            .bind(&new_user.full_name)
            .bind(&new_user.password_hash)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to insert user"))
    }

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool, StoreError> {
        let query = "SELECT id FROM roles WHERE name = $1";
        let role_id: Option<Uuid> = sqlx::query(query)
            .bind(role_name)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to lookup role"))?
            .map(|row| row.get("id"));

        let Some(role_id) = role_id else {
            return Ok(false);
        };

        let query = r"
            INSERT INTO user_roles (user_id, role_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, role_id) DO NOTHING
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to assign role"))?;
        Ok(true)
    }

    async fn ensure_role(&self, role: &RoleDefinition) -> Result<bool, StoreError> {
        let query = r"
            INSERT INTO roles (name, display_name, description, permissions, is_system_role)
            VALUES ($1, $2, $3, $4, TRUE)
            ON CONFLICT (name) DO NOTHING
        ";
        let result = sqlx::query(query)
            .bind(role.name)
            .bind(role.display_name)
            .bind(role.description)
            .bind(role.permissions_json())
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to seed role"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_login_attempt(&self, user_id: Uuid) -> Result<Option<i32>, StoreError> {
        let query = r"
            UPDATE users
            SET failed_login_attempts = failed_login_attempts + 1,
                updated_at = NOW()
            WHERE id = $1
              AND status <> 'locked'
              AND failed_login_attempts < $2
            RETURNING failed_login_attempts
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(LOCKOUT_THRESHOLD)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to claim login attempt"))?;

        Ok(row.map(|row| row.get("failed_login_attempts")))
    }

    async fn record_login_failure(&self, user_id: Uuid) -> Result<LoginFailure, StoreError> {
        let query = r"
            UPDATE users
            SET status = CASE
                    WHEN failed_login_attempts >= $2 THEN 'locked'::user_status
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING failed_login_attempts, status::text AS status
        ";
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(LOCKOUT_THRESHOLD)
            .fetch_one(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to record login failure"))?;

        let status: String = row.get("status");
        Ok(LoginFailure {
            failed_login_attempts: row.get("failed_login_attempts"),
            locked: status == "locked",
        })
    }

    async fn record_login_success(
        &self,
        user_id: Uuid,
        ip_address: Option<&str>,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE users
            SET failed_login_attempts = 0,
                last_login_at = NOW(),
                last_login_ip = $2,
                is_verified = CASE
                    WHEN status = 'pending_verification' THEN TRUE
                    ELSE is_verified
                END,
                status = CASE
                    WHEN status = 'pending_verification' THEN 'active'::user_status
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1
              AND status <> 'locked'
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(ip_address)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to record login success"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET password_reset_token = $2,
                password_reset_expires = $3,
                updated_at = NOW()
            WHERE id = $1
        ";
        sqlx::query(query)
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to store reset token"))?;
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE users
            SET password_hash = $3,
                password_reset_token = NULL,
                password_reset_expires = NULL,
                last_password_change = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND password_reset_token = $2
              AND password_reset_expires > NOW()
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to reset password"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn unlock(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let query = r"
            UPDATE users
            SET failed_login_attempts = 0,
                status = CASE WHEN status = 'locked' THEN 'active'::user_status ELSE status END,
                updated_at = NOW()
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to unlock account"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool, StoreError> {
        let query = r"
            UPDATE users
            SET is_active = $2,
                status = CASE
                    WHEN NOT $2 THEN 'inactive'::user_status
                    WHEN status = 'inactive' THEN 'active'::user_status
                    ELSE status
                END,
                updated_at = NOW()
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(active)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to update account state"))?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_where(&self, column: &'static str, jti: &str) -> Result<Option<Session>, StoreError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE {column} = $1");
        sqlx::query_as::<_, Session>(&query)
            .bind(jti)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to lookup session"))
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, new_session: NewSession) -> Result<Session, StoreError> {
        let query = format!(
            "INSERT INTO user_sessions \
                (user_id, token_jti, refresh_token_jti, expires_at, ip_address, user_agent, last_activity_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             RETURNING {SESSION_COLUMNS}"
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(new_session.user_id)
            .bind(&new_session.access_jti)
            .bind(&new_session.refresh_jti)
            .bind(new_session.expires_at)
            .bind(&new_session.ip_address)
            .bind(&new_session.user_agent)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to insert session"))
    }

    async fn find_by_access_jti(&self, jti: &str) -> Result<Option<Session>, StoreError> {
        self.find_where("token_jti", jti).await
    }

    async fn find_by_refresh_jti(&self, jti: &str) -> Result<Option<Session>, StoreError> {
        self.find_where("refresh_token_jti", jti).await
    }

    async fn rotate(
        &self,
        session: &Session,
        rotation: &Rotation,
    ) -> Result<Option<Session>, StoreError> {
        let Some(current_refresh) = session.refresh_jti.as_deref() else {
            return Ok(None);
        };

        // Compare-and-swap on the refresh jti: a concurrent rotation matches zero rows.
        let query = format!(
            "UPDATE user_sessions \
             SET token_jti = $2, refresh_token_jti = $3, expires_at = $4, last_activity_at = NOW() \
             WHERE id = $1 AND refresh_token_jti = $5 AND is_revoked = FALSE \
             RETURNING {SESSION_COLUMNS}"
        );
        sqlx::query_as::<_, Session>(&query)
            .bind(session.id)
            .bind(&rotation.access_jti)
            .bind(&rotation.refresh_jti)
            .bind(rotation.expires_at)
            .bind(current_refresh)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to rotate session"))
    }

    async fn revoke(&self, session_id: Uuid) -> Result<(), StoreError> {
        let query = r"
            UPDATE user_sessions
            SET is_revoked = TRUE, revoked_at = NOW()
            WHERE id = $1 AND is_revoked = FALSE
        ";
        sqlx::query(query)
            .bind(session_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to revoke session"))?;
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let query = r"
            UPDATE user_sessions
            SET is_revoked = TRUE, revoked_at = NOW()
            WHERE user_id = $1 AND is_revoked = FALSE
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(|err| StoreError::from_sqlx(err, "failed to revoke sessions"))?;
        Ok(result.rows_affected())
    }
}
