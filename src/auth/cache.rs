//! Read-through session cache.
//!
//! Entries are keyed by the access `jti` (`session:{jti}`) and hold a
//! [`CachedSession`] snapshot as JSON. The cache is never authoritative; a miss
//! always falls back to the session store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use super::models::{CachedSession, Session, User};

pub const KEY_PREFIX: &str = "session:";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache command timed out")]
    Timeout,
    #[error("cache unavailable")]
    Unavailable,
    #[error("failed to encode cache entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, ToSchema)]
pub struct CacheStats {
    pub status: String,
    pub session_count: u64,
    pub used_memory: Option<String>,
}

impl CacheStats {
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            status: "error".to_string(),
            session_count: 0,
            used_memory: None,
        }
    }
}

#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Store the snapshot for `session`, with the TTL capped by its expiry.
    async fn put(&self, session: &Session, user: &User) -> Result<(), CacheError>;

    /// Returns `None` on a miss. Unparsable entries are deleted and reported as a miss.
    async fn get(&self, access_jti: &str) -> Result<Option<CachedSession>, CacheError>;

    async fn invalidate(&self, access_jti: &str) -> Result<(), CacheError>;

    /// Scan all session entries and delete the ones belonging to `user_id`.
    async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<u64, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

#[must_use]
pub fn session_key(access_jti: &str) -> String {
    format!("{KEY_PREFIX}{access_jti}")
}

/// TTL for a snapshot: the configured TTL, shortened to the session's remaining
/// lifetime. `None` when the session has already expired.
#[must_use]
pub fn snapshot_ttl(
    configured: Duration,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let remaining = (expires_at - now).to_std().ok()?;
    let ttl = configured.min(remaining);
    // Redis `EX` takes whole seconds.
    (ttl.as_secs() > 0).then(|| Duration::from_secs(ttl.as_secs()))
}

/// Decode a stored entry, logging corrupt payloads.
pub(crate) fn decode_snapshot(key: &str, payload: &str) -> Option<CachedSession> {
    match serde_json::from_str(payload) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(cache.key = key, "Dropping corrupt session cache entry: {err}");
            None
        }
    }
}

/// Used when no cache is configured: every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessionCache;

#[async_trait]
impl SessionCache for NoopSessionCache {
    async fn put(&self, _session: &Session, _user: &User) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get(&self, _access_jti: &str) -> Result<Option<CachedSession>, CacheError> {
        Ok(None)
    }

    async fn invalidate(&self, _access_jti: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn invalidate_all_for_user(&self, _user_id: Uuid) -> Result<u64, CacheError> {
        Ok(0)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            status: "disabled".to_string(),
            session_count: 0,
            used_memory: None,
        })
    }
}

#[derive(Debug, Default)]
struct Entries {
    values: HashMap<String, (String, Instant)>,
    available: bool,
}

/// In-process cache with the same key layout and TTL rules as Redis.
#[derive(Debug)]
pub struct MemorySessionCache {
    ttl: Duration,
    entries: Mutex<Entries>,
}

impl MemorySessionCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(Entries {
                values: HashMap::new(),
                available: true,
            }),
        }
    }

    /// Simulate an outage: every command fails until re-enabled.
    pub async fn set_available(&self, available: bool) {
        self.entries.lock().await.available = available;
    }

    pub async fn clear(&self) {
        self.entries.lock().await.values.clear();
    }

    pub async fn contains(&self, access_jti: &str) -> bool {
        let entries = self.entries.lock().await;
        entries
            .values
            .get(&session_key(access_jti))
            .is_some_and(|(_, deadline)| *deadline > Instant::now())
    }

    /// Write a raw payload, bypassing serialization.
    pub async fn insert_raw(&self, access_jti: &str, payload: &str) {
        self.entries.lock().await.values.insert(
            session_key(access_jti),
            (payload.to_string(), Instant::now() + self.ttl),
        );
    }

    /// Overwrite a snapshot directly, e.g. to model a stale entry.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be encoded.
    pub async fn insert_snapshot(
        &self,
        access_jti: &str,
        snapshot: &CachedSession,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(snapshot)?;
        self.insert_raw(access_jti, &payload).await;
        Ok(())
    }

    pub async fn remaining_ttl(&self, access_jti: &str) -> Option<Duration> {
        let entries = self.entries.lock().await;
        entries
            .values
            .get(&session_key(access_jti))
            .map(|(_, deadline)| deadline.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn put(&self, session: &Session, user: &User) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        if !entries.available {
            return Err(CacheError::Unavailable);
        }
        let Some(ttl) = snapshot_ttl(self.ttl, session.expires_at, Utc::now()) else {
            return Ok(());
        };
        let payload = serde_json::to_string(&CachedSession::new(session, user))?;
        entries.values.insert(
            session_key(&session.access_jti),
            (payload, Instant::now() + ttl),
        );
        Ok(())
    }

    async fn get(&self, access_jti: &str) -> Result<Option<CachedSession>, CacheError> {
        let mut entries = self.entries.lock().await;
        if !entries.available {
            return Err(CacheError::Unavailable);
        }
        let key = session_key(access_jti);
        let Some((payload, deadline)) = entries.values.get(&key).cloned() else {
            return Ok(None);
        };
        if deadline <= Instant::now() {
            entries.values.remove(&key);
            return Ok(None);
        }
        let snapshot = decode_snapshot(&key, &payload);
        if snapshot.is_none() {
            entries.values.remove(&key);
        }
        Ok(snapshot)
    }

    async fn invalidate(&self, access_jti: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        if !entries.available {
            return Err(CacheError::Unavailable);
        }
        entries.values.remove(&session_key(access_jti));
        Ok(())
    }

    async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock().await;
        if !entries.available {
            return Err(CacheError::Unavailable);
        }
        let before = entries.values.len();
        entries.values.retain(|key, (payload, _)| {
            !key.starts_with(KEY_PREFIX)
                || decode_snapshot(key, payload).is_some_and(|snapshot| snapshot.user_id != user_id)
        });
        Ok(u64::try_from(before - entries.values.len()).unwrap_or(u64::MAX))
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.lock().await;
        if !entries.available {
            return Err(CacheError::Unavailable);
        }
        let now = Instant::now();
        let live = entries
            .values
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .count();
        Ok(CacheStats {
            status: "ok".to_string(),
            session_count: u64::try_from(live).unwrap_or(u64::MAX),
            used_memory: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::AccountStatus;
    use anyhow::Result;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "alice@ex.com".to_string(),
            username: "alice".to_string(),
            full_name: None,
            password_hash: None,
            status: AccountStatus::Active,
            is_active: true,
            is_verified: true,
            failed_login_attempts: 0,
            last_login_at: None,
            last_login_ip: None,
            password_reset_token: None,
            password_reset_expires: None,
            last_password_change: None,
            created_at: Utc::now(),
            roles: Vec::new(),
        }
    }

    fn session(user_id: Uuid, access: &str, lifetime: chrono::Duration) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id,
            access_jti: access.to_string(),
            refresh_jti: Some(format!("refresh-{access}")),
            expires_at: now + lifetime,
            is_revoked: false,
            revoked_at: None,
            last_activity_at: None,
            ip_address: None,
            user_agent: None,
            created_at: now,
        }
    }

    #[test]
    fn ttl_is_capped_by_session_expiry() {
        let now = Utc::now();
        let configured = Duration::from_secs(900);

        assert_eq!(
            snapshot_ttl(configured, now + chrono::Duration::seconds(120), now),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            snapshot_ttl(configured, now + chrono::Duration::hours(1), now),
            Some(configured)
        );
        assert_eq!(snapshot_ttl(configured, now - chrono::Duration::seconds(1), now), None);
        assert_eq!(snapshot_ttl(configured, now, now), None);
    }

    #[test]
    fn keys_are_prefixed() {
        assert_eq!(session_key("abc"), "session:abc");
    }

    #[tokio::test]
    async fn put_then_get_returns_snapshot() -> Result<()> {
        let cache = MemorySessionCache::new(Duration::from_secs(900));
        let alice = user();
        let session = session(alice.id, "a1", chrono::Duration::minutes(30));

        cache.put(&session, &alice).await?;
        let snapshot = cache.get("a1").await?;
        assert_eq!(snapshot, Some(CachedSession::new(&session, &alice)));
        assert!(cache.get("missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn short_lived_session_gets_short_ttl() -> Result<()> {
        let cache = MemorySessionCache::new(Duration::from_secs(900));
        let alice = user();
        let session = session(alice.id, "a1", chrono::Duration::seconds(60));

        cache.put(&session, &alice).await?;
        let ttl = cache.remaining_ttl("a1").await.unwrap_or_default();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(50));
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_is_not_cached() -> Result<()> {
        let cache = MemorySessionCache::new(Duration::from_secs(900));
        let alice = user();
        let session = session(alice.id, "a1", chrono::Duration::seconds(-1));

        cache.put(&session, &alice).await?;
        assert!(!cache.contains("a1").await);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_entry_is_dropped() -> Result<()> {
        let cache = MemorySessionCache::new(Duration::from_secs(900));
        cache.insert_raw("a1", "{not json").await;

        assert!(cache.get("a1").await?.is_none());
        assert!(!cache.contains("a1").await);
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_all_for_user_spares_other_users() -> Result<()> {
        let cache = MemorySessionCache::new(Duration::from_secs(900));
        let alice = user();
        let bob = user();
        cache
            .put(&session(alice.id, "a1", chrono::Duration::minutes(5)), &alice)
            .await?;
        cache
            .put(&session(alice.id, "a2", chrono::Duration::minutes(5)), &alice)
            .await?;
        cache
            .put(&session(bob.id, "b1", chrono::Duration::minutes(5)), &bob)
            .await?;
        cache.insert_raw("broken", "garbage").await;

        assert_eq!(cache.invalidate_all_for_user(alice.id).await?, 3);
        assert!(!cache.contains("a1").await);
        assert!(!cache.contains("a2").await);
        assert!(cache.contains("b1").await);
        Ok(())
    }

    #[tokio::test]
    async fn outage_surfaces_as_error() {
        let cache = MemorySessionCache::new(Duration::from_secs(900));
        cache.set_available(false).await;
        assert!(matches!(cache.get("a1").await, Err(CacheError::Unavailable)));
        assert!(matches!(cache.stats().await, Err(CacheError::Unavailable)));
    }

    #[tokio::test]
    async fn noop_cache_always_misses() -> Result<()> {
        let cache = NoopSessionCache;
        let alice = user();
        cache
            .put(&session(alice.id, "a1", chrono::Duration::minutes(5)), &alice)
            .await?;
        assert!(cache.get("a1").await?.is_none());
        assert_eq!(cache.stats().await?.status, "disabled");
        Ok(())
    }
}
