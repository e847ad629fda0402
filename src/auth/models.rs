use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use std::collections::BTreeSet;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

/// Consecutive failed logins after which an account is treated as locked.
pub const LOCKOUT_THRESHOLD: i32 = 5;

/// Lifecycle state persisted in `users.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
    PendingVerification,
    Locked,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
            Self::PendingVerification => "pending_verification",
            Self::Locked => "locked",
        }
    }

    /// Parse the persisted `users.status` textual value into a typed enum.
    fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "suspended" => Ok(Self::Suspended),
            "pending_verification" => Ok(Self::PendingVerification),
            "locked" => Ok(Self::Locked),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid users.status value: {value}"),
            )))),
        }
    }
}

/// Parse a role's stored permission list.
///
/// Permissions are persisted as a JSON array of strings. Anything else is
/// logged and yields an empty set so one bad row cannot fail an access check.
#[must_use]
pub fn parse_permissions(role_name: &str, raw: Option<&str>) -> BTreeSet<String> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return BTreeSet::new();
    };

    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(permissions) => permissions
            .into_iter()
            .map(|permission| permission.trim().to_string())
            .filter(|permission| !permission.is_empty())
            .collect(),
        Err(err) => {
            warn!(role = role_name, "Ignoring malformed role permissions: {err}");
            BTreeSet::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub is_system_role: bool,
    pub permissions: BTreeSet<String>,
}

impl<'r> FromRow<'r, PgRow> for Role {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let name: String = row.try_get("name")?;
        let raw: Option<String> = row.try_get("permissions")?;
        Ok(Self {
            id: row.try_get("id")?,
            permissions: parse_permissions(&name, raw.as_deref()),
            name,
            is_active: row.try_get("is_active")?,
            is_system_role: row.try_get("is_system_role")?,
        })
    }
}

/// Seed definition for a role that must exist (see [`DEFAULT_ROLES`]).
#[derive(Debug, Clone, Copy)]
pub struct RoleDefinition {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub permissions: &'static [&'static str],
}

impl RoleDefinition {
    #[must_use]
    pub fn permissions_json(&self) -> String {
        serde_json::to_string(self.permissions).unwrap_or_else(|_| "[]".to_string())
    }
}

pub const DEFAULT_ROLE: &str = "User";

pub const DEFAULT_ROLES: [RoleDefinition; 4] = [
    RoleDefinition {
        name: DEFAULT_ROLE,
        display_name: "User",
        description: "Standard user with basic permissions",
        permissions: &["read_own_data", "update_own_profile"],
    },
    RoleDefinition {
        name: "Admin",
        display_name: "Administrator",
        description: "Full system administrator with all permissions",
        permissions: &["*"],
    },
    RoleDefinition {
        name: "Analyst",
        display_name: "Security Analyst",
        description: "Security analyst with scan and policy management permissions",
        permissions: &["read", "scan", "analyze", "create_policies", "update_policies"],
    },
    RoleDefinition {
        name: "Viewer",
        display_name: "Viewer",
        description: "Read-only access to reports and policies",
        permissions: &["read"],
    },
];

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub password_hash: Option<String>,
    pub status: AccountStatus,
    pub is_active: bool,
    pub is_verified: bool,
    pub failed_login_attempts: i32,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<DateTime<Utc>>,
    pub last_password_change: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub roles: Vec<Role>,
}

impl User {
    /// Locked either explicitly or by reaching the failure threshold.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.status == AccountStatus::Locked || self.failed_login_attempts >= LOCKOUT_THRESHOLD
    }

    #[must_use]
    pub fn is_inactive(&self) -> bool {
        !self.is_active || matches!(self.status, AccountStatus::Inactive | AccountStatus::Suspended)
    }

    /// Names of the roles that currently grant anything.
    #[must_use]
    pub fn active_role_names(&self) -> Vec<String> {
        self.roles
            .iter()
            .filter(|role| role.is_active)
            .map(|role| role.name.clone())
            .collect()
    }

    /// Union of the permissions of every active role.
    #[must_use]
    pub fn permissions(&self) -> BTreeSet<String> {
        self.roles
            .iter()
            .filter(|role| role.is_active)
            .flat_map(|role| role.permissions.iter().cloned())
            .collect()
    }
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            username: row.try_get("username")?,
            full_name: row.try_get("full_name")?,
            password_hash: row.try_get("password_hash")?,
            status: AccountStatus::from_db(&status)?,
            is_active: row.try_get("is_active")?,
            is_verified: row.try_get("is_verified")?,
            failed_login_attempts: row.try_get("failed_login_attempts")?,
            last_login_at: row.try_get("last_login_at")?,
            last_login_ip: row.try_get("last_login_ip")?,
            password_reset_token: row.try_get("password_reset_token")?,
            password_reset_expires: row.try_get("password_reset_expires")?,
            last_password_change: row.try_get("last_password_change")?,
            created_at: row.try_get("created_at")?,
            roles: Vec::new(),
        })
    }
}

/// Fields needed to insert a freshly registered account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub full_name: Option<String>,
    pub password_hash: String,
}

/// Counter state returned by a failed-attempt update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginFailure {
    pub failed_login_attempts: i32,
    pub locked: bool,
}

/// One issued access/refresh pair, mutated in place on every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub access_jti: String,
    pub refresh_jti: Option<String>,
    /// Mirrors the access token expiry, not the refresh token's.
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && !self.is_expired_at(now)
    }
}

impl<'r> FromRow<'r, PgRow> for Session {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            access_jti: row.try_get("token_jti")?,
            refresh_jti: row.try_get("refresh_token_jti")?,
            expires_at: row.try_get("expires_at")?,
            is_revoked: row.try_get("is_revoked")?,
            revoked_at: row.try_get("revoked_at")?,
            last_activity_at: row.try_get("last_activity_at")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub access_jti: String,
    pub refresh_jti: String,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Replacement identifiers applied by a rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub access_jti: String,
    pub refresh_jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Denormalized snapshot stored in the session cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSession {
    pub user_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub is_revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub session_id: Uuid,
}

impl CachedSession {
    #[must_use]
    pub fn new(session: &Session, user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            roles: user.active_role_names(),
            is_revoked: session.is_revoked,
            expires_at: session.expires_at,
            session_id: session.id,
        }
    }
}
