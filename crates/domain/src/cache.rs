use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::ports::cache::{CacheError, CacheStore};
use crate::ports::lock::LockStore;
use crate::ports::BoxFuture;

pub const DEFAULT_PAGE_SIZE: usize = 50;

pub fn unread_key(user_id: &str) -> String {
    format!("kanal:unread:{user_id}")
}

pub fn message_page_key(
    channel_id: i64,
    page: usize,
    page_size: usize,
    after_id: Option<i64>,
) -> String {
    let after = after_id.unwrap_or(0);
    format!("kanal:msgs:{channel_id}:{page}:{page_size}:{after}")
}

/// The canonical first-page key writers invalidate on send/delete. Pages
/// requested with a non-default size ride out their short TTL instead.
pub fn first_page_key(channel_id: i64) -> String {
    message_page_key(channel_id, 1, DEFAULT_PAGE_SIZE, None)
}

pub fn reaction_lock_key(user_id: &str, target_id: i64, is_thread: bool, emoji: &str) -> String {
    let scope = if is_thread { "thread" } else { "main" };
    format!("kanal:lock:react:{user_id}:{scope}:{target_id}:{emoji}")
}

#[derive(Clone, Debug)]
struct MemoryEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Process-local stand-in for the shared cache collaborator, used by tests and
/// single-node deployments.
#[derive(Clone, Default)]
pub struct InMemoryCacheStore {
    inner: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<serde_json::Value>, CacheError>> {
        let key = key.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut entries = inner
                .lock()
                .map_err(|_| CacheError::Store("cache mutex poisoned".into()))?;
            match entries.get(&key) {
                Some(entry) if Instant::now() < entry.expires_at => Ok(Some(entry.value.clone())),
                Some(_) => {
                    entries.remove(&key);
                    Ok(None)
                }
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
        let key = key.to_string();
        let value = value.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut entries = inner
                .lock()
                .map_err(|_| CacheError::Store("cache mutex poisoned".into()))?;
            entries.insert(
                key,
                MemoryEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut entries = inner
                .lock()
                .map_err(|_| CacheError::Store("cache mutex poisoned".into()))?;
            entries.remove(&key);
            Ok(())
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLockStore {
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for InMemoryLockStore {
    fn acquire(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = key.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut locks = inner
                .lock()
                .map_err(|_| CacheError::Store("lock mutex poisoned".into()))?;
            let now = Instant::now();
            match locks.get(&key) {
                Some(deadline) if now < *deadline => Ok(false),
                _ => {
                    locks.insert(key, now + ttl);
                    Ok(true)
                }
            }
        })
    }

    fn release(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>> {
        let key = key.to_string();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut locks = inner
                .lock()
                .map_err(|_| CacheError::Store("lock mutex poisoned".into()))?;
            locks.remove(&key);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_entries_expire() {
        let cache = InMemoryCacheStore::new();
        cache
            .set("k", &serde_json::json!(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let locks = InMemoryLockStore::new();
        assert!(locks.acquire("k", Duration::from_secs(10)).await.unwrap());
        assert!(!locks.acquire("k", Duration::from_secs(10)).await.unwrap());
        locks.release("k").await.unwrap();
        assert!(locks.acquire("k", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let locks = InMemoryLockStore::new();
        assert!(locks.acquire("k", Duration::from_millis(5)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(locks.acquire("k", Duration::from_secs(10)).await.unwrap());
    }
}
