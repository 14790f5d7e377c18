use std::time::Duration;

use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache serialization error: {0}")]
    Serialization(String),
    #[error("cache store error: {0}")]
    Store(String),
}

/// Shared best-effort TTL key/value store. Reads may return stale data within
/// TTL; writers invalidate affected keys explicitly on correctness-sensitive
/// paths instead of waiting for expiry.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<serde_json::Value>, CacheError>>;

    fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>>;

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>>;
}
