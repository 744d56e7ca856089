//! Redis-backed state store for fleet-wide sharing.
//!
//! # Data Structures
//!
//! - `{ns}:rec:{collection}:{key}` (HASH): `value`, `version`, `expires_at`, `updated_at`
//! - `{ns}:idx:{collection}` (ZSET, all scores 0): lexicographic key index for range scans
//! - `{ns}:seq` (STRING): global version sequence
//!
//! Expiry is native (`PEXPIRE` on the record hash). Index members whose hash
//! has expired are dropped lazily by scans and by [`StateStore::purge_expired`].
//!
//! Versions come from a single `INCR` sequence, so a record that expires and
//! is recreated never reuses a version an old reader might still hold.
//! Writes run as Lua scripts, which Redis executes atomically.

use super::{error::Result, error::StorageError, Record, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_NAMESPACE: &str = "praxis";

/// KEYS: record, index, sequence.
/// ARGV: mode ("put" | "cas"), expected version ("" = absent), value, ttl ms ("0" = none), now ms, member.
const WRITE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if ARGV[1] == 'cas' then
  if ARGV[2] == '' then
    if current then return false end
  elseif current ~= ARGV[2] then
    return false
  end
end
local version = redis.call('INCR', KEYS[3])
local ttl = tonumber(ARGV[4])
local expires_at = ''
if ttl > 0 then expires_at = tostring(tonumber(ARGV[5]) + ttl) end
redis.call('HSET', KEYS[1], 'value', ARGV[3], 'version', version, 'expires_at', expires_at, 'updated_at', ARGV[5])
if ttl > 0 then
  redis.call('PEXPIRE', KEYS[1], ttl)
else
  redis.call('PERSIST', KEYS[1])
end
redis.call('ZADD', KEYS[2], 0, ARGV[6])
return version
"#;

/// KEYS: record, index. ARGV: expected version ("" = any), member.
const DELETE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then
  redis.call('ZREM', KEYS[2], ARGV[2])
  return 0
end
if ARGV[1] ~= '' and current ~= ARGV[1] then return 0 end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[2])
return 1
"#;

type RawRecord = (
    Option<Vec<u8>>,
    Option<u64>,
    Option<String>,
    Option<i64>,
);

/// Redis state store using async connection pooling.
pub struct RedisStateStore {
    pool: Pool,
    namespace: String,
}

impl RedisStateStore {
    /// Connects to `redis_url` (e.g. `redis://127.0.0.1:6379`) under the default namespace.
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_namespace(redis_url, DEFAULT_NAMESPACE).await
    }

    /// Connects using a custom key namespace, so independent deployments
    /// (or test runs) can share one Redis instance.
    pub async fn with_namespace(redis_url: &str, namespace: &str) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            namespace: namespace.to_string(),
        };

        // Fail fast on an unreachable server.
        let mut conn = store.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

        info!("Connected Redis state store (namespace={})", store.namespace);
        Ok(store)
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn record_key(&self, collection: &str, key: &str) -> String {
        format!("{}:rec:{}:{}", self.namespace, collection, key)
    }

    fn index_key(&self, collection: &str) -> String {
        format!("{}:idx:{}", self.namespace, collection)
    }

    fn sequence_key(&self) -> String {
        format!("{}:seq", self.namespace)
    }

    fn validate_collection(collection: &str) -> Result<()> {
        if collection.is_empty() || collection.contains(':') {
            return Err(StorageError::InvalidParameter(format!(
                "collection name must be non-empty and free of ':' (got {:?})",
                collection
            )));
        }
        Ok(())
    }

    fn decode(key: &str, raw: RawRecord) -> Option<Record> {
        let (value, version, expires_at, updated_at) = raw;
        let value = value?;
        let version = version?;
        Some(Record {
            key: key.to_string(),
            value,
            version,
            expires_at: expires_at
                .filter(|s| !s.is_empty())
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(DateTime::from_timestamp_millis),
            updated_at: updated_at
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_default(),
        })
    }

    async fn write(
        &self,
        mode: &str,
        collection: &str,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Option<Record>> {
        Self::validate_collection(collection)?;

        let now = Utc::now();
        let ttl_ms = match ttl {
            Some(ttl) => u64::try_from(ttl.as_millis())
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| {
                    StorageError::InvalidParameter(format!("ttl out of range: {:?}", ttl))
                })?,
            None => 0,
        };

        let mut conn = self.conn().await?;
        let version: Option<u64> = redis::Script::new(WRITE_SCRIPT)
            .key(self.record_key(collection, key))
            .key(self.index_key(collection))
            .key(self.sequence_key())
            .arg(mode)
            .arg(expected.map(|v| v.to_string()).unwrap_or_default())
            .arg(value)
            .arg(ttl_ms)
            .arg(now.timestamp_millis())
            .arg(key)
            .invoke_async(&mut *conn)
            .await?;

        Ok(version.map(|version| Record {
            key: key.to_string(),
            value: value.to_vec(),
            version,
            expires_at: (ttl_ms > 0)
                .then(|| now + chrono::Duration::milliseconds(ttl_ms as i64)),
            updated_at: now,
        }))
    }

    async fn remove(&self, collection: &str, key: &str, expected: Option<u64>) -> Result<bool> {
        Self::validate_collection(collection)?;

        let mut conn = self.conn().await?;
        let removed: i64 = redis::Script::new(DELETE_SCRIPT)
            .key(self.record_key(collection, key))
            .key(self.index_key(collection))
            .arg(expected.map(|v| v.to_string()).unwrap_or_default())
            .arg(key)
            .invoke_async(&mut *conn)
            .await?;

        Ok(removed == 1)
    }

    /// Lists every key matching `pattern` using cursor-based SCAN.
    async fn scan_keys(&self, conn: &mut Connection, pattern: &str) -> Result<Vec<String>> {
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut **conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        Self::validate_collection(collection)?;

        let mut conn = self.conn().await?;
        let raw: RawRecord = redis::cmd("HMGET")
            .arg(self.record_key(collection, key))
            .arg(&["value", "version", "expires_at", "updated_at"])
            .query_async(&mut *conn)
            .await?;

        let now = Utc::now();
        Ok(Self::decode(key, raw).filter(|r| r.is_live(now)))
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Record> {
        self.write("put", collection, key, None, value, ttl)
            .await?
            .ok_or_else(|| StorageError::Backend("unconditional write returned no version".into()))
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Option<Record>> {
        let written = self.write("cas", collection, key, expected, value, ttl).await?;
        if written.is_none() {
            debug!(
                "CAS conflict on {}/{} (expected version {:?})",
                collection, key, expected
            );
        }
        Ok(written)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        self.remove(collection, key, None).await
    }

    async fn compare_and_delete(
        &self,
        collection: &str,
        key: &str,
        expected: u64,
    ) -> Result<bool> {
        self.remove(collection, key, Some(expected)).await
    }

    async fn scan_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Record>> {
        Self::validate_collection(collection)?;

        let (min, max) = if prefix.is_empty() {
            (b"-".to_vec(), b"+".to_vec())
        } else {
            let mut min = b"[".to_vec();
            min.extend_from_slice(prefix.as_bytes());
            let mut max = b"(".to_vec();
            max.extend_from_slice(prefix.as_bytes());
            max.push(0xff);
            (min, max)
        };

        let mut conn = self.conn().await?;
        let index_key = self.index_key(collection);
        let members: Vec<String> = redis::cmd("ZRANGEBYLEX")
            .arg(&index_key)
            .arg(min)
            .arg(max)
            .query_async(&mut *conn)
            .await?;

        if members.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for member in &members {
            pipe.cmd("HMGET")
                .arg(self.record_key(collection, member))
                .arg(&["value", "version", "expires_at", "updated_at"]);
        }
        let raws: Vec<RawRecord> = pipe.query_async(&mut *conn).await?;

        let now = Utc::now();
        let mut records = Vec::with_capacity(members.len());
        let mut stale = Vec::new();
        for (member, raw) in members.iter().zip(raws) {
            match Self::decode(member, raw) {
                Some(record) if record.is_live(now) => records.push(record),
                Some(_) => {}
                None => stale.push(member.clone()),
            }
        }

        if !stale.is_empty() {
            let _: i64 = redis::cmd("ZREM")
                .arg(&index_key)
                .arg(&stale)
                .query_async(&mut *conn)
                .await?;
        }

        Ok(records)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64> {
        // Records expire natively; only dangling index members remain to clean up.
        let mut conn = self.conn().await?;
        let index_keys = self
            .scan_keys(&mut conn, &format!("{}:idx:*", self.namespace))
            .await?;

        let mut purged = 0u64;
        for index_key in index_keys {
            let Some(collection) = index_key.rsplit(':').next().map(str::to_string) else {
                continue;
            };
            let members: Vec<String> = redis::cmd("ZRANGE")
                .arg(&index_key)
                .arg(0)
                .arg(-1)
                .query_async(&mut *conn)
                .await?;
            if members.is_empty() {
                continue;
            }

            let mut pipe = redis::pipe();
            for member in &members {
                pipe.cmd("EXISTS").arg(self.record_key(&collection, member));
            }
            let exists: Vec<bool> = pipe.query_async(&mut *conn).await?;

            let dangling: Vec<&String> = members
                .iter()
                .zip(exists)
                .filter_map(|(member, exists)| (!exists).then_some(member))
                .collect();
            if !dangling.is_empty() {
                let removed: u64 = redis::cmd("ZREM")
                    .arg(&index_key)
                    .arg(&dangling)
                    .query_async(&mut *conn)
                    .await?;
                purged += removed;
            }
        }

        Ok(purged)
    }

    async fn reset(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let keys = self
            .scan_keys(&mut conn, &format!("{}:*", self.namespace))
            .await?;
        for chunk in keys.chunks(500) {
            let _: i64 = redis::cmd("DEL").arg(chunk).query_async(&mut *conn).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}
