//! Lock/status store backends.
//!
//! The coordinator needs exactly four operations, each atomic on its own:
//! conditional set with expiry, delete, hash upsert and hash read.
//! [`RedisStore`] maps them to `SET NX EX`, `DEL`, `HSET` and `HGETALL`;
//! [`MemoryStore`] keeps them in process for tests and single-node runs.

use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Shared key/value store used for locks and task records.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Set `key` to `value` only if absent; the key expires after `ttl`.
    /// Returns whether the key was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Upsert fields of the hash at `key`.
    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// All fields of the hash at `key`; empty when absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
}

// ── In-memory ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, (String, Instant)>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// In-process [`StatusStore`].
///
/// Expiry is measured with [`tokio::time::Instant`], so tests running with
/// paused time can advance the clock past a lock's TTL.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = state.values.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
            debug!("Key '{}' expired", key);
        }
        state
            .values
            .insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.values.remove(key);
        state.hashes.remove(key);
        Ok(())
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }
}

// ── Redis ────────────────────────────────────────────────────────────────────

/// [`StatusStore`] backed by Redis over a multiplexed async connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url` (`redis://host:port/db`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid Redis URL: {e}")))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!("Connected to Redis");
        Ok(Self { connection })
    }
}

fn command_error(command: &'static str) -> impl Fn(redis::RedisError) -> StoreError {
    move |e| StoreError::Command {
        command,
        detail: e.to_string(),
    }
}

#[async_trait]
impl StatusStore for RedisStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        // `SET NX` replies OK when set and nil otherwise.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(command_error("SET"))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("DEL"))?;
        Ok(())
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value.as_str());
        }
        let _: i64 = cmd
            .query_async(&mut conn)
            .await
            .map_err(command_error("HSET"))?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error("HGETALL"))
    }
}
