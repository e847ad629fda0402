//! Session store: one durable row per login, rotated in place on refresh.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    error::StoreError,
    models::{NewSession, Rotation, Session},
};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// # Errors
    /// [`StoreError::Conflict`] if either `jti` is already recorded.
    async fn create(&self, new_session: NewSession) -> Result<Session, StoreError>;

    async fn find_by_access_jti(&self, jti: &str) -> Result<Option<Session>, StoreError>;

    async fn find_by_refresh_jti(&self, jti: &str) -> Result<Option<Session>, StoreError>;

    /// Replace both identifiers and the expiry of `session`.
    ///
    /// Applied only while the row still carries `session.refresh_jti` and is not
    /// revoked. Returns `None` when a concurrent rotation or a revocation got
    /// there first; exactly one caller can win for a given refresh `jti`.
    async fn rotate(
        &self,
        session: &Session,
        rotation: &Rotation,
    ) -> Result<Option<Session>, StoreError>;

    /// Mark the session revoked. Revoking twice is a no-op.
    async fn revoke(&self, session_id: Uuid) -> Result<(), StoreError>;

    /// Revoke every live session of the user, returning how many changed.
    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
struct Ledger {
    sessions: HashMap<Uuid, Session>,
    by_access: HashMap<String, Uuid>,
    by_refresh: HashMap<String, Uuid>,
}

/// In-process session store. A single mutex provides the row-level discipline.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    ledger: Mutex<Ledger>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.ledger.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, new_session: NewSession) -> Result<Session, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let taken = |jti: &str| ledger.by_access.contains_key(jti) || ledger.by_refresh.contains_key(jti);
        if taken(&new_session.access_jti) {
            return Err(StoreError::Conflict("user_sessions_token_jti_key".to_string()));
        }
        if taken(&new_session.refresh_jti) {
            return Err(StoreError::Conflict(
                "user_sessions_refresh_token_jti_key".to_string(),
            ));
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: new_session.user_id,
            access_jti: new_session.access_jti,
            refresh_jti: Some(new_session.refresh_jti),
            expires_at: new_session.expires_at,
            is_revoked: false,
            revoked_at: None,
            last_activity_at: Some(now),
            ip_address: new_session.ip_address,
            user_agent: new_session.user_agent,
            created_at: now,
        };

        ledger.by_access.insert(session.access_jti.clone(), session.id);
        if let Some(refresh) = &session.refresh_jti {
            ledger.by_refresh.insert(refresh.clone(), session.id);
        }
        ledger.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_by_access_jti(&self, jti: &str) -> Result<Option<Session>, StoreError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .by_access
            .get(jti)
            .and_then(|id| ledger.sessions.get(id))
            .cloned())
    }

    async fn find_by_refresh_jti(&self, jti: &str) -> Result<Option<Session>, StoreError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .by_refresh
            .get(jti)
            .and_then(|id| ledger.sessions.get(id))
            .cloned())
    }

    async fn rotate(
        &self,
        session: &Session,
        rotation: &Rotation,
    ) -> Result<Option<Session>, StoreError> {
        let mut ledger = self.ledger.lock().await;
        if ledger.by_access.contains_key(&rotation.access_jti)
            || ledger.by_refresh.contains_key(&rotation.refresh_jti)
        {
            return Err(StoreError::Conflict("user_sessions_jti".to_string()));
        }

        let Some(current) = ledger.sessions.get_mut(&session.id) else {
            return Ok(None);
        };
        if current.is_revoked || current.refresh_jti != session.refresh_jti {
            return Ok(None);
        }

        let old_access = std::mem::replace(&mut current.access_jti, rotation.access_jti.clone());
        let old_refresh = current.refresh_jti.replace(rotation.refresh_jti.clone());
        current.expires_at = rotation.expires_at;
        current.last_activity_at = Some(Utc::now());
        let rotated = current.clone();

        ledger.by_access.remove(&old_access);
        if let Some(old_refresh) = old_refresh {
            ledger.by_refresh.remove(&old_refresh);
        }
        ledger
            .by_access
            .insert(rotation.access_jti.clone(), rotated.id);
        ledger
            .by_refresh
            .insert(rotation.refresh_jti.clone(), rotated.id);
        Ok(Some(rotated))
    }

    async fn revoke(&self, session_id: Uuid) -> Result<(), StoreError> {
        let mut ledger = self.ledger.lock().await;
        if let Some(session) = ledger
            .sessions
            .get_mut(&session_id)
            .filter(|session| !session.is_revoked)
        {
            session.is_revoked = true;
            session.revoked_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let now = Utc::now();
        let mut revoked = 0;
        for session in ledger
            .sessions
            .values_mut()
            .filter(|session| session.user_id == user_id && !session.is_revoked)
        {
            session.is_revoked = true;
            session.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use chrono::Duration;
    use std::sync::Arc;

    fn new_session(user_id: Uuid, access: &str, refresh: &str) -> NewSession {
        NewSession {
            user_id,
            access_jti: access.to_string(),
            refresh_jti: refresh.to_string(),
            expires_at: Utc::now() + Duration::minutes(30),
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: Some("tests".to_string()),
        }
    }

    fn rotation(access: &str, refresh: &str) -> Rotation {
        Rotation {
            access_jti: access.to_string(),
            refresh_jti: refresh.to_string(),
            expires_at: Utc::now() + Duration::minutes(30),
        }
    }

    #[tokio::test]
    async fn duplicate_jti_is_a_conflict() -> Result<()> {
        let store = MemorySessionStore::new();
        let user = Uuid::new_v4();
        store.create(new_session(user, "a1", "r1")).await?;

        let access = store.create(new_session(user, "a1", "r2")).await;
        assert!(matches!(access, Err(StoreError::Conflict(_))));
        let refresh = store.create(new_session(user, "a2", "r1")).await;
        assert!(matches!(refresh, Err(StoreError::Conflict(_))));
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn rotate_replaces_identifiers_on_the_same_row() -> Result<()> {
        let store = MemorySessionStore::new();
        let session = store.create(new_session(Uuid::new_v4(), "a1", "r1")).await?;

        let rotated = store
            .rotate(&session, &rotation("a2", "r2"))
            .await?
            .ok_or_else(|| anyhow!("rotation lost"))?;
        assert_eq!(rotated.id, session.id);
        assert_eq!(rotated.access_jti, "a2");
        assert_eq!(rotated.refresh_jti.as_deref(), Some("r2"));

        assert!(store.find_by_refresh_jti("r1").await?.is_none());
        assert!(store.find_by_access_jti("a1").await?.is_none());
        assert_eq!(
            store.find_by_refresh_jti("r2").await?.map(|s| s.id),
            Some(session.id)
        );
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn stale_rotation_loses() -> Result<()> {
        let store = MemorySessionStore::new();
        let session = store.create(new_session(Uuid::new_v4(), "a1", "r1")).await?;

        assert!(store.rotate(&session, &rotation("a2", "r2")).await?.is_some());
        // Same pre-rotation snapshot: the refresh jti no longer matches.
        assert!(store.rotate(&session, &rotation("a3", "r3")).await?.is_none());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotations_have_one_winner() -> Result<()> {
        let store = Arc::new(MemorySessionStore::new());
        let session = store.create(new_session(Uuid::new_v4(), "a1", "r1")).await?;

        let mut handles = Vec::new();
        for n in 0..8 {
            let store = Arc::clone(&store);
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                store
                    .rotate(&session, &rotation(&format!("a-{n}"), &format!("r-{n}")))
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await??.is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }

    #[tokio::test]
    async fn revoked_session_cannot_rotate() -> Result<()> {
        let store = MemorySessionStore::new();
        let session = store.create(new_session(Uuid::new_v4(), "a1", "r1")).await?;
        store.revoke(session.id).await?;
        assert!(store.rotate(&session, &rotation("a2", "r2")).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent() -> Result<()> {
        let store = MemorySessionStore::new();
        let session = store.create(new_session(Uuid::new_v4(), "a1", "r1")).await?;

        store.revoke(session.id).await?;
        let first = store.find_by_access_jti("a1").await?;
        store.revoke(session.id).await?;
        let second = store.find_by_access_jti("a1").await?;

        assert_eq!(first.as_ref().map(|s| s.is_revoked), Some(true));
        assert_eq!(
            first.and_then(|s| s.revoked_at),
            second.and_then(|s| s.revoked_at)
        );
        store.revoke(Uuid::new_v4()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_only_touches_the_user() -> Result<()> {
        let store = MemorySessionStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.create(new_session(alice, "a1", "r1")).await?;
        store.create(new_session(alice, "a2", "r2")).await?;
        store.create(new_session(bob, "b1", "rb1")).await?;

        assert_eq!(store.revoke_all_for_user(alice).await?, 2);
        assert_eq!(store.revoke_all_for_user(alice).await?, 0);
        assert_eq!(
            store.find_by_access_jti("b1").await?.map(|s| s.is_revoked),
            Some(false)
        );
        Ok(())
    }
}
