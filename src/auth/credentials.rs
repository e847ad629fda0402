//! Credential store: users, their roles and login-outcome bookkeeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    error::StoreError,
    models::{
        AccountStatus, LOCKOUT_THRESHOLD, LoginFailure, NewUser, Role, RoleDefinition, User,
        parse_permissions,
    },
};

/// Durable user records plus the role/permission resolver.
///
/// Every `find_*` returns the user with its roles resolved at call time.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError>;

    /// Insert a `pending_verification` account.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] when the email or username is taken.
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    /// Attach a role by name. Returns `false` when the role does not exist.
    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool, StoreError>;

    /// Create the role when missing. Returns `true` when it was created.
    async fn ensure_role(&self, role: &RoleDefinition) -> Result<bool, StoreError>;

    /// Count an attempt against the lockout budget before the password is
    /// checked, in one conditional update.
    ///
    /// Returns the attempt number, or `None` when the account is locked or
    /// the budget is already spent by attempts still in flight.
    async fn claim_login_attempt(&self, user_id: Uuid) -> Result<Option<i32>, StoreError>;

    /// Settle a claimed attempt that failed: lock once the counter reached the
    /// threshold.
    async fn record_login_failure(&self, user_id: Uuid) -> Result<LoginFailure, StoreError>;

    /// Reset the failure counter, stamp last-login and promote pending accounts.
    ///
    /// Returns `false`, changing nothing, when a concurrent failure locked the
    /// account first.
    async fn record_login_success(
        &self,
        user_id: Uuid,
        ip_address: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Store a reset token, replacing any outstanding one.
    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Swap the password hash if `token` is still the user's reset token.
    /// Returns `false` when another request consumed it first.
    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError>;

    /// Clear the failure counter and return a locked account to `active`.
    async fn unlock(&self, user_id: Uuid) -> Result<bool, StoreError>;

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct Directory {
    users: HashMap<Uuid, User>,
    roles: BTreeMap<String, Role>,
    memberships: HashMap<Uuid, BTreeSet<String>>,
}

impl Directory {
    fn resolve(&self, user: &User) -> User {
        let mut resolved = user.clone();
        resolved.roles = self
            .memberships
            .get(&user.id)
            .into_iter()
            .flatten()
            .filter_map(|name| self.roles.get(name).cloned())
            .collect();
        resolved
    }

    fn find<F>(&self, predicate: F) -> Option<User>
    where
        F: Fn(&User) -> bool,
    {
        self.users
            .values()
            .find(|user| predicate(user))
            .map(|user| self.resolve(user))
    }
}

/// In-process credential store used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    directory: RwLock<Directory>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a role from its stored representation.
    pub async fn insert_role(&self, name: &str, raw_permissions: &str, is_active: bool) -> Role {
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_active,
            is_system_role: false,
            permissions: parse_permissions(name, Some(raw_permissions)),
        };
        self.directory
            .write()
            .await
            .roles
            .insert(name.to_string(), role.clone());
        role
    }

    pub async fn set_role_active(&self, name: &str, is_active: bool) -> bool {
        let mut directory = self.directory.write().await;
        directory
            .roles
            .get_mut(name)
            .map(|role| role.is_active = is_active)
            .is_some()
    }

    pub async fn revoke_role(&self, user_id: Uuid, role_name: &str) -> bool {
        let mut directory = self.directory.write().await;
        directory
            .memberships
            .get_mut(&user_id)
            .is_some_and(|roles| roles.remove(role_name))
    }

    /// Overwrite the stored status, bypassing the login state machine.
    pub async fn set_status(&self, user_id: Uuid, status: AccountStatus) -> bool {
        let mut directory = self.directory.write().await;
        directory
            .users
            .get_mut(&user_id)
            .map(|user| user.status = status)
            .is_some()
    }

    /// Force the reset expiry, for exercising expired tokens.
    pub async fn set_reset_expiry(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> bool {
        let mut directory = self.directory.write().await;
        directory
            .users
            .get_mut(&user_id)
            .map(|user| user.password_reset_expires = Some(expires_at))
            .is_some()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.directory.read().await.find(|user| user.email == email))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .directory
            .read()
            .await
            .find(|user| user.username == username))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let directory = self.directory.read().await;
        Ok(directory
            .users
            .get(&user_id)
            .map(|user| directory.resolve(user)))
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .directory
            .read()
            .await
            .find(|user| user.password_reset_token.as_deref() == Some(token)))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut directory = self.directory.write().await;
        if directory.users.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::Conflict("users_email_key".to_string()));
        }
        if directory.users.values().any(|u| u.username == new_user.username) {
            return Err(StoreError::Conflict("users_username_key".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            username: new_user.username,
            full_name: new_user.full_name,
            password_hash: Some(new_user.password_hash),
            status: AccountStatus::PendingVerification,
            is_active: true,
            is_verified: false,
            failed_login_attempts: 0,
            last_login_at: None,
            last_login_ip: None,
            password_reset_token: None,
            password_reset_expires: None,
            last_password_change: None,
            created_at: Utc::now(),
            roles: Vec::new(),
        };
        directory.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<bool, StoreError> {
        let mut directory = self.directory.write().await;
        if !directory.roles.contains_key(role_name) || !directory.users.contains_key(&user_id) {
            return Ok(false);
        }
        directory
            .memberships
            .entry(user_id)
            .or_default()
            .insert(role_name.to_string());
        Ok(true)
    }

    async fn ensure_role(&self, role: &RoleDefinition) -> Result<bool, StoreError> {
        let mut directory = self.directory.write().await;
        if directory.roles.contains_key(role.name) {
            return Ok(false);
        }
        directory.roles.insert(
            role.name.to_string(),
            Role {
                id: Uuid::new_v4(),
                name: role.name.to_string(),
                is_active: true,
                is_system_role: true,
                permissions: role.permissions.iter().map(ToString::to_string).collect(),
            },
        );
        Ok(true)
    }

    async fn claim_login_attempt(&self, user_id: Uuid) -> Result<Option<i32>, StoreError> {
        let mut directory = self.directory.write().await;
        let Some(user) = directory.users.get_mut(&user_id) else {
            return Ok(None);
        };
        if user.status == AccountStatus::Locked || user.failed_login_attempts >= LOCKOUT_THRESHOLD {
            return Ok(None);
        }
        user.failed_login_attempts += 1;
        Ok(Some(user.failed_login_attempts))
    }

    async fn record_login_failure(&self, user_id: Uuid) -> Result<LoginFailure, StoreError> {
        let mut directory = self.directory.write().await;
        let user = directory
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Backend(anyhow::anyhow!("user {user_id} not found")))?;

        if user.failed_login_attempts >= LOCKOUT_THRESHOLD {
            user.status = AccountStatus::Locked;
        }
        Ok(LoginFailure {
            failed_login_attempts: user.failed_login_attempts,
            locked: user.status == AccountStatus::Locked,
        })
    }

    async fn record_login_success(
        &self,
        user_id: Uuid,
        ip_address: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut directory = self.directory.write().await;
        let Some(user) = directory
            .users
            .get_mut(&user_id)
            .filter(|user| user.status != AccountStatus::Locked)
        else {
            return Ok(false);
        };
        user.failed_login_attempts = 0;
        user.last_login_at = Some(Utc::now());
        user.last_login_ip = ip_address.map(ToString::to_string);
        if user.status == AccountStatus::PendingVerification {
            user.status = AccountStatus::Active;
            user.is_verified = true;
        }
        Ok(true)
    }

    async fn set_reset_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut directory = self.directory.write().await;
        if let Some(user) = directory.users.get_mut(&user_id) {
            user.password_reset_token = Some(token.to_string());
            user.password_reset_expires = Some(expires_at);
        }
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        token: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut directory = self.directory.write().await;
        let Some(user) = directory
            .users
            .get_mut(&user_id)
            .filter(|user| user.password_reset_token.as_deref() == Some(token))
        else {
            return Ok(false);
        };

        user.password_hash = Some(password_hash.to_string());
        user.password_reset_token = None;
        user.password_reset_expires = None;
        user.last_password_change = Some(Utc::now());
        Ok(true)
    }

    async fn unlock(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let mut directory = self.directory.write().await;
        let Some(user) = directory.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.failed_login_attempts = 0;
        if user.status == AccountStatus::Locked {
            user.status = AccountStatus::Active;
        }
        Ok(true)
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<bool, StoreError> {
        let mut directory = self.directory.write().await;
        let Some(user) = directory.users.get_mut(&user_id) else {
            return Ok(false);
        };
        user.is_active = active;
        user.status = match (active, user.status) {
            (false, _) => AccountStatus::Inactive,
            (true, AccountStatus::Inactive) => AccountStatus::Active,
            (true, status) => status,
        };
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn new_user(email: &str, username: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: username.to_string(),
            full_name: None,
            password_hash: "$argon2id$placeholder".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_email_or_username_conflicts() -> Result<()> {
        let store = MemoryCredentialStore::new();
        store.create_user(new_user("alice@ex.com", "alice")).await?;

        let email = store.create_user(new_user("alice@ex.com", "other")).await;
        assert!(matches!(email, Err(StoreError::Conflict(_))));
        let username = store.create_user(new_user("other@ex.com", "alice")).await;
        assert!(matches!(username, Err(StoreError::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn failures_lock_at_threshold() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let user = store.create_user(new_user("alice@ex.com", "alice")).await?;

        for attempt in 1..LOCKOUT_THRESHOLD {
            assert_eq!(store.claim_login_attempt(user.id).await?, Some(attempt));
            let failure = store.record_login_failure(user.id).await?;
            assert_eq!(failure.failed_login_attempts, attempt);
            assert!(!failure.locked);
        }
        assert!(store.claim_login_attempt(user.id).await?.is_some());
        let failure = store.record_login_failure(user.id).await?;
        assert!(failure.locked);

        let stored = store.find_by_id(user.id).await?;
        assert_eq!(stored.map(|u| u.status), Some(AccountStatus::Locked));
        assert_eq!(store.claim_login_attempt(user.id).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn in_flight_attempts_spend_the_budget() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let user = store.create_user(new_user("alice@ex.com", "alice")).await?;

        for attempt in 1..=LOCKOUT_THRESHOLD {
            assert_eq!(store.claim_login_attempt(user.id).await?, Some(attempt));
        }
        // Not locked yet, but no password check may start.
        assert_eq!(store.claim_login_attempt(user.id).await?, None);
        assert!(store.record_login_failure(user.id).await?.locked);

        assert!(!store.record_login_success(user.id, None).await?);
        let stored = store.find_by_id(user.id).await?;
        assert_eq!(
            stored.map(|u| u.failed_login_attempts),
            Some(LOCKOUT_THRESHOLD)
        );
        Ok(())
    }

    #[tokio::test]
    async fn success_promotes_pending_and_resets_counter() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let user = store.create_user(new_user("alice@ex.com", "alice")).await?;
        store.claim_login_attempt(user.id).await?;
        store.record_login_failure(user.id).await?;
        assert!(
            store
                .record_login_success(user.id, Some("203.0.113.7"))
                .await?
        );

        let stored = store
            .find_by_id(user.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user missing"))?;
        assert_eq!(stored.failed_login_attempts, 0);
        assert_eq!(stored.status, AccountStatus::Active);
        assert!(stored.is_verified);
        assert_eq!(stored.last_login_ip.as_deref(), Some("203.0.113.7"));
        assert!(stored.last_login_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn roles_are_resolved_on_every_lookup() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let user = store.create_user(new_user("alice@ex.com", "alice")).await?;
        store.insert_role("Scanner", r#"["scan.read"]"#, true).await;

        assert!(store.assign_role(user.id, "Scanner").await?);
        assert!(!store.assign_role(user.id, "Missing").await?);

        let resolved = store.find_by_email("alice@ex.com").await?;
        assert_eq!(
            resolved.map(|u| u.active_role_names()),
            Some(vec!["Scanner".to_string()])
        );

        store.set_role_active("Scanner", false).await;
        let resolved = store.find_by_username("alice").await?;
        assert_eq!(resolved.map(|u| u.active_role_names()), Some(Vec::new()));
        Ok(())
    }

    #[tokio::test]
    async fn reset_token_is_single_use() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let user = store.create_user(new_user("alice@ex.com", "alice")).await?;
        store
            .set_reset_token(user.id, "token-1", Utc::now() + chrono::Duration::hours(1))
            .await?;
        store
            .set_reset_token(user.id, "token-2", Utc::now() + chrono::Duration::hours(1))
            .await?;

        assert!(store.find_by_reset_token("token-1").await?.is_none());
        assert!(!store.complete_password_reset(user.id, "token-1", "h").await?);
        assert!(store.complete_password_reset(user.id, "token-2", "h").await?);
        assert!(!store.complete_password_reset(user.id, "token-2", "h").await?);
        Ok(())
    }

    #[tokio::test]
    async fn unlock_and_disable() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let user = store.create_user(new_user("alice@ex.com", "alice")).await?;
        for _ in 0..LOCKOUT_THRESHOLD {
            store.claim_login_attempt(user.id).await?;
            store.record_login_failure(user.id).await?;
        }

        assert!(store.unlock(user.id).await?);
        let stored = store.find_by_id(user.id).await?;
        assert_eq!(stored.as_ref().map(User::is_locked), Some(false));

        assert!(store.set_active(user.id, false).await?);
        let stored = store.find_by_id(user.id).await?;
        assert_eq!(stored.as_ref().map(User::is_inactive), Some(true));
        assert!(!store.unlock(Uuid::new_v4()).await?);
        Ok(())
    }
}
