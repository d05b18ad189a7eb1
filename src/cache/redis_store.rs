//! Shared Redis backend.
//!
//! Entries are stored as a JSON envelope under `SET .. EX ttl`, so Redis
//! expires them on its own. Pattern lookups walk the keyspace with `SCAN`
//! rather than the blocking `KEYS`.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::backend::{BackendKind, CacheBackend, CacheEntry};
use super::error::CacheError;

const SCAN_BATCH: usize = 200;

#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    scan_batch: usize,
}

impl RedisBackend {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            scan_batch: SCAN_BATCH,
        }
    }

    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    pub fn with_scan_batch(mut self, scan_batch: usize) -> Self {
        self.scan_batch = scan_batch.max(1);
        self
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let ttl = entry.ttl_seconds.max(1);
        let raw = serde_json::to_string(&entry)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, raw, ttl).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let mut removed = 0;
        for chunk in keys.chunks(self.scan_batch) {
            let dropped: u64 = conn.del(chunk).await?;
            removed += dropped;
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_batch)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once across iterations.
        found.sort();
        found.dedup();
        debug!(pattern, matched = found.len(), "Redis pattern scan complete");
        Ok(found)
    }
}
