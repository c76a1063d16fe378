// Ephemeral dashboard snapshot caches
// Lets other processes read a recent dashboard without touching the engine

use super::dashboard::DashboardSnapshot;
use super::SnapshotCache;
use crate::utils::error::{MonitorError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

const DASHBOARD_KEY: &str = "dashboard";

/// Redis-backed snapshot cache using a deadpool connection pool
pub struct RedisSnapshotCache {
    pool: deadpool_redis::Pool,
    key: String,
}

impl RedisSnapshotCache {
    /// Build the pool; connections are opened lazily on first use
    pub fn new(redis_url: &str, key_prefix: &str) -> Result<Self> {
        let pool = deadpool_redis::Config::from_url(redis_url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| MonitorError::cache(format!("failed to create Redis pool: {}", e)))?;

        Ok(Self {
            pool,
            key: format!("{}{}", key_prefix, DASHBOARD_KEY),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Verify connectivity with a PING
    pub async fn connect(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(key = %self.key, "Connected to Redis snapshot cache");
        Ok(())
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| MonitorError::cache(format!("failed to get connection: {}", e)))
    }
}

#[async_trait::async_trait]
impl SnapshotCache for RedisSnapshotCache {
    fn name(&self) -> &str {
        "redis"
    }

    async fn push(&self, snapshot: &DashboardSnapshot, ttl: Duration) -> Result<()> {
        let data = serde_json::to_vec(snapshot)?;
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("SETEX")
            .arg(&self.key)
            .arg(ttl.as_secs().max(1))
            .arg(&data)
            .query_async(&mut conn)
            .await?;
        debug!(key = %self.key, bytes = data.len(), "Pushed dashboard snapshot");
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<DashboardSnapshot>> {
        let mut conn = self.connection().await?;
        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        match data {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// In-process cache with the same TTL semantics as the Redis one
#[derive(Default)]
pub struct MemorySnapshotCache {
    entry: Arc<RwLock<Option<(DashboardSnapshot, Instant)>>>,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SnapshotCache for MemorySnapshotCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn push(&self, snapshot: &DashboardSnapshot, ttl: Duration) -> Result<()> {
        *self.entry.write().await = Some((snapshot.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<DashboardSnapshot>> {
        let entry = self.entry.read().await;
        Ok(entry
            .as_ref()
            .filter(|(_, expires_at)| Instant::now() < *expires_at)
            .map(|(snapshot, _)| snapshot.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::dashboard::DashboardAggregator;
    use crate::monitoring::store::MetricStore;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn snapshot() -> DashboardSnapshot {
        DashboardAggregator::new(chrono::Duration::hours(1)).aggregate(
            &MetricStore::new(1),
            &BTreeMap::new(),
            0,
            Vec::new(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_memory_cache_ttl() {
        let cache = MemorySnapshotCache::new();
        assert!(cache.fetch().await.unwrap().is_none());

        let snap = snapshot();
        cache.push(&snap, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.fetch().await.unwrap(), Some(snap.clone()));

        cache.push(&snap, Duration::from_millis(0)).await.unwrap();
        assert!(cache.fetch().await.unwrap().is_none());
    }

    #[test]
    fn test_redis_key_prefix() {
        let cache = RedisSnapshotCache::new("redis://127.0.0.1:6379", "location_monitor:").unwrap();
        assert_eq!(cache.key(), "location_monitor:dashboard");
    }

    #[test]
    fn test_invalid_redis_url() {
        assert!(RedisSnapshotCache::new("not a url", "p:").is_err());
    }
}
