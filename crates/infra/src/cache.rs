use std::time::Duration;

use kanal_domain::ports::cache::{CacheError, CacheStore};
use kanal_domain::ports::lock::LockStore;
use kanal_domain::ports::BoxFuture;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

const DEFAULT_PREFIX: &str = "kanal";

fn ttl_ms(ttl: Duration) -> u64 {
    let ms = ttl.as_millis() as u64;
    if ms == 0 {
        1
    } else {
        ms
    }
}

/// Redis-backed page/unread cache. Values are JSON blobs keyed by the
/// builders in `kanal_domain::cache`.
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisCacheStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

impl CacheStore for RedisCacheStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<serde_json::Value>, CacheError>> {
        let cache_key = self.cache_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: Option<String> = conn
                .get(cache_key)
                .await
                .map_err(|err| CacheError::Store(err.to_string()))?;
            match value {
                Some(payload) => serde_json::from_str(&payload)
                    .map(Some)
                    .map_err(|err| CacheError::Serialization(err.to_string())),
                None => Ok(None),
            }
        })
    }

    fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let cache_key = self.cache_key(key);
        let value = value.clone();
        Box::pin(async move {
            let payload = serde_json::to_string(&value)
                .map_err(|err| CacheError::Serialization(err.to_string()))?;
            let mut conn = self.manager.clone();
            let _: String = redis::cmd("SET")
                .arg(&cache_key)
                .arg(payload)
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|err| CacheError::Store(err.to_string()))?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>> {
        let cache_key = self.cache_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: u64 = conn
                .del(cache_key)
                .await
                .map_err(|err| CacheError::Store(err.to_string()))?;
            Ok(())
        })
    }
}

/// SET NX PX mutual exclusion; the TTL only bounds a crashed holder.
#[derive(Clone)]
pub struct RedisLockStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisLockStore {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: DEFAULT_PREFIX.to_string(),
        })
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

impl LockStore for RedisLockStore {
    fn acquire(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<bool, CacheError>> {
        let lock_key = self.lock_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let result: Option<String> = redis::cmd("SET")
                .arg(&lock_key)
                .arg("1")
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|err| CacheError::Store(err.to_string()))?;
            Ok(result.is_some())
        })
    }

    fn release(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>> {
        let lock_key = self.lock_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: u64 = conn
                .del(lock_key)
                .await
                .map_err(|err| CacheError::Store(err.to_string()))?;
            Ok(())
        })
    }
}
