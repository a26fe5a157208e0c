//! Redis-backed counter store for multi-instance deployments.
//!
//! The whole roll/estimate/increment sequence runs server-side as a Lua
//! script, so concurrent callers on the same key are serialized by Redis
//! itself and no read-then-write window exists. Records are hashes
//! (`cur`, `prev`, `start`) expired to twice the window on every touch.
//!
//! Window timing uses the Redis server clock (`TIME`), making the store the
//! single source of truth across application instances regardless of their
//! clock skew.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::{CounterStore, StoreError};
use crate::ratelimit::window::WindowSnapshot;

/// Roll, estimate, and conditionally increment, atomically per key.
/// Returns `{admitted, cur, prev, elapsed_ms}`.
const CHECK_AND_INCREMENT: &str = r#"
redis.replicate_commands()

local window_ms = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])

local time = redis.call('TIME')
local now_ms = time[1] * 1000 + math.floor(time[2] / 1000)

local record = redis.call('HMGET', KEYS[1], 'cur', 'prev', 'start')
local cur = tonumber(record[1]) or 0
local prev = tonumber(record[2]) or 0
local start = tonumber(record[3]) or now_ms

local elapsed = now_ms - start
if elapsed >= 2 * window_ms then
    cur = 0
    prev = 0
    elapsed = 0
    start = now_ms
elseif elapsed >= window_ms then
    prev = cur
    cur = 0
    elapsed = 0
    start = now_ms
end

local fraction = elapsed / window_ms
if fraction > 1 then fraction = 1 end
local estimated = cur + prev * (1 - fraction)

local admitted = 0
if estimated < limit then
    cur = cur + 1
    admitted = 1
end

redis.call('HSET', KEYS[1], 'cur', cur, 'prev', prev, 'start', start)
redis.call('PEXPIRE', KEYS[1], 2 * window_ms)

return {admitted, cur, prev, elapsed}
"#;

/// The same estimate with no mutation: nothing written, no TTL refresh.
const CURRENT_USAGE: &str = r#"
local window_ms = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])

local time = redis.call('TIME')
local now_ms = time[1] * 1000 + math.floor(time[2] / 1000)

local record = redis.call('HMGET', KEYS[1], 'cur', 'prev', 'start')
local cur = tonumber(record[1]) or 0
local prev = tonumber(record[2]) or 0
local start = tonumber(record[3]) or now_ms

local elapsed = now_ms - start
if elapsed >= 2 * window_ms then
    cur = 0
    prev = 0
    elapsed = 0
elseif elapsed >= window_ms then
    prev = cur
    cur = 0
    elapsed = 0
end

local fraction = elapsed / window_ms
if fraction > 1 then fraction = 1 end
local estimated = cur + prev * (1 - fraction)

local admitted = 0
if estimated < limit then
    admitted = 1
end

return {admitted, cur, prev, elapsed}
"#;

/// Connection parameters for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://127.0.0.1/`.
    pub url: String,
    /// Prefix applied to every stored key.
    pub key_prefix: String,
    /// Bound on any single store operation.
    pub op_timeout: Duration,
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: "turnstile:".to_string(),
            op_timeout: Duration::from_millis(250),
        }
    }
}

/// Shared networked counter store.
pub struct RedisStore {
    conn: ConnectionManager,
    check_script: Script,
    usage_script: Script,
    key_prefix: String,
    op_timeout: Duration,
}

impl RedisStore {
    /// Connect and verify the server is reachable.
    pub async fn connect(config: RedisStoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url = %config.url, "connected to redis counter store");

        Ok(Self {
            conn,
            check_script: Script::new(CHECK_AND_INCREMENT),
            usage_script: Script::new(CURRENT_USAGE),
            key_prefix: config.key_prefix,
            op_timeout: config.op_timeout,
        })
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Run a store operation under the configured time bound.
    async fn bounded<F, T>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }

    async fn eval_window_script(
        &self,
        script: &Script,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot, StoreError> {
        let mut conn = self.conn.clone();
        let storage_key = self.storage_key(key);
        let window_ms = window.as_millis() as u64;

        let (admitted, current_count, previous_count, elapsed_ms): (u8, u64, u64, u64) = self
            .bounded(
                script
                    .key(&storage_key)
                    .arg(window_ms)
                    .arg(limit)
                    .invoke_async(&mut conn),
            )
            .await?;

        Ok(WindowSnapshot {
            admitted: admitted == 1,
            current_count,
            previous_count,
            elapsed_ms,
            window_ms,
        })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn check_and_increment(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot, StoreError> {
        self.eval_window_script(&self.check_script, key, window, limit)
            .await
    }

    async fn current_usage(
        &self,
        key: &str,
        window: Duration,
        limit: u64,
    ) -> Result<WindowSnapshot, StoreError> {
        self.eval_window_script(&self.usage_script, key, window, limit)
            .await
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let storage_key = self.storage_key(key);
        let _: i64 = self
            .bounded(redis::cmd("DEL").arg(&storage_key).query_async(&mut conn))
            .await?;
        Ok(())
    }
}
