//! Redis implementation of [`SessionCache`].
//!
//! Connects lazily and keeps one multiplexed connection. Connection and
//! response timeouts are short so a slow or unreachable Redis turns into a
//! fast error, which the auth service treats as a cache miss. After a failed
//! connect or a dropped connection, commands fail with
//! [`CacheError::Unavailable`] until [`RECONNECT_BACKOFF`] has passed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::{FromRedisValue, aio::MultiplexedConnection};
use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use super::{
    cache::{
        CacheError, CacheStats, KEY_PREFIX, SessionCache, decode_snapshot, session_key,
        snapshot_ttl,
    },
    models::{CachedSession, Session, User},
};

const SCAN_BATCH: u32 = 100;

/// How long commands skip Redis after it failed.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Link {
    connection: Option<MultiplexedConnection>,
    retry_at: Option<Instant>,
}

pub struct RedisSessionCache {
    client: redis::Client,
    ttl: Duration,
    connect_timeout: Duration,
    response_timeout: Duration,
    link: Mutex<Link>,
}

impl std::fmt::Debug for RedisSessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionCache")
            .field("ttl", &self.ttl)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisSessionCache {
    /// # Errors
    /// Returns an error if the URL is not a valid Redis URL.
    pub fn new(
        url: &str,
        ttl: Duration,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis URL")?;
        Ok(Self {
            client,
            ttl,
            connect_timeout,
            response_timeout,
            link: Mutex::new(Link::default()),
        })
    }

    /// The lock is never held across the connect, so concurrent callers wait
    /// at most one `connect_timeout`.
    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        {
            let link = self.link.lock().await;
            if let Some(connection) = link.connection.as_ref() {
                return Ok(connection.clone());
            }
            if link.retry_at.is_some_and(|at| Instant::now() < at) {
                return Err(CacheError::Unavailable);
            }
        }

        let attempt = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await;

        let connection = match attempt {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => {
                self.mark_down().await;
                return Err(CacheError::Redis(err));
            }
            Err(_) => {
                self.mark_down().await;
                return Err(CacheError::Timeout);
            }
        };

        let mut link = self.link.lock().await;
        link.retry_at = None;
        // Another caller may have connected meanwhile; keep the first.
        let connection = link.connection.get_or_insert(connection).clone();
        debug!("Connected to redis session cache");
        Ok(connection)
    }

    /// Drop the connection and skip Redis for [`RECONNECT_BACKOFF`].
    async fn mark_down(&self) {
        let mut link = self.link.lock().await;
        link.connection = None;
        link.retry_at = Some(Instant::now() + RECONNECT_BACKOFF);
    }

    async fn run<T: FromRedisValue>(
        &self,
        operation: &'static str,
        cmd: &redis::Cmd,
    ) -> Result<T, CacheError> {
        let mut connection = self.connection().await?;
        let span = info_span!(
            "cache.command",
            cache.system = "redis",
            cache.operation = operation
        );

        let result: Result<redis::RedisResult<T>, _> = tokio::time::timeout(
            self.response_timeout,
            cmd.query_async(&mut connection).instrument(span),
        )
        .await;

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
                    self.mark_down().await;
                }
                Err(CacheError::Redis(err))
            }
            Err(_) => {
                self.mark_down().await;
                Err(CacheError::Timeout)
            }
        }
    }

    async fn scan_session_keys(&self) -> Result<Vec<String>, CacheError> {
        let pattern = format!("{KEY_PREFIX}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) = self.run("SCAN", &cmd).await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    async fn delete(&self, key: &str) -> Result<u64, CacheError> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.run("DEL", &cmd).await
    }
}

/// Pull `used_memory_human` out of an `INFO memory` reply.
fn used_memory(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory_human:"))
        .map(|value| value.trim().to_string())
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn put(&self, session: &Session, user: &User) -> Result<(), CacheError> {
        let Some(ttl) = snapshot_ttl(self.ttl, session.expires_at, Utc::now()) else {
            return Ok(());
        };
        let payload = serde_json::to_string(&CachedSession::new(session, user))?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(session_key(&session.access_jti))
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs());
        self.run::<()>("SET", &cmd).await
    }

    async fn get(&self, access_jti: &str) -> Result<Option<CachedSession>, CacheError> {
        let key = session_key(access_jti);
        let mut cmd = redis::cmd("GET");
        cmd.arg(&key);
        let Some(payload) = self.run::<Option<String>>("GET", &cmd).await? else {
            return Ok(None);
        };

        let snapshot = decode_snapshot(&key, &payload);
        if snapshot.is_none() {
            self.delete(&key).await?;
        }
        Ok(snapshot)
    }

    async fn invalidate(&self, access_jti: &str) -> Result<(), CacheError> {
        self.delete(&session_key(access_jti)).await.map(|_| ())
    }

    async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<u64, CacheError> {
        let mut deleted = 0;
        for key in self.scan_session_keys().await? {
            let mut cmd = redis::cmd("GET");
            cmd.arg(&key);
            let Some(payload) = self.run::<Option<String>>("GET", &cmd).await? else {
                continue;
            };
            let owned_or_corrupt = decode_snapshot(&key, &payload)
                .is_none_or(|snapshot| snapshot.user_id == user_id);
            if owned_or_corrupt {
                deleted += self.delete(&key).await?;
            }
        }
        Ok(deleted)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let session_count = u64::try_from(self.scan_session_keys().await?.len()).unwrap_or(u64::MAX);
        let mut cmd = redis::cmd("INFO");
        cmd.arg("memory");
        let info: String = self.run("INFO", &cmd).await?;

        Ok(CacheStats {
            status: "ok".to_string(),
            session_count,
            used_memory: used_memory(&info),
        })
    }
}
