//! Redis session backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use tracing::debug;

use crate::backend::{CasOutcome, SessionBackend};
use crate::error::SessionStoreResult;

/// Versioned write: -1 missing, 0 version mismatch, 1 applied.
const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
local decoded = cjson.decode(current)
local version = tonumber(decoded['version']) or 0
if version ~= tonumber(ARGV[1]) then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
return 1
"#;

/// Session records stored as JSON strings with `EX` expiry.
pub struct RedisSessionBackend {
    client: redis::Client,
    cas: Script,
}

impl RedisSessionBackend {
    pub fn new(redis_url: &str) -> SessionStoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            cas: Script::new(CAS_SCRIPT),
        })
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl SessionBackend for RedisSessionBackend {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn load(&self, key: &str) -> SessionStoreResult<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn insert(&self, key: &str, value: &str, ttl: Duration) -> SessionStoreResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        value: &str,
        ttl: Duration,
    ) -> SessionStoreResult<CasOutcome> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: i64 = self
            .cas
            .key(key)
            .arg(expected_version)
            .arg(value)
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;

        let outcome = match result {
            1 => CasOutcome::Applied,
            0 => CasOutcome::VersionMismatch,
            _ => CasOutcome::Missing,
        };
        debug!(key = key, expected_version = expected_version, outcome = ?outcome, "Session CAS");
        Ok(outcome)
    }

    async fn ping(&self) -> SessionStoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
