use std::time::Duration;

use super::cache::CacheError;
use super::BoxFuture;

/// Short-lived mutual-exclusion lock keyed by an arbitrary string. The TTL is
/// a crash bound: holders release explicitly on completion.
pub trait LockStore: Send + Sync {
    /// Returns `false` when the key is already held.
    fn acquire(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<bool, CacheError>>;

    fn release(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>>;
}
