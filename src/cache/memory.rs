use crate::cache::{decode_stored, encode_stored, CacheStore};
use crate::error::FolioError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    raw: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process cache store.
///
/// Values are kept in their serialized text form so that reads behave like a
/// networked store: every `get` decodes a fresh value. Expired entries are
/// dropped lazily on read and in bulk by `purge_expired`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged = purged, remaining = self.entries.len(), "Purged expired cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, FolioError> {
        let now = Instant::now();
        // Copy out so the shard guard is released before any removal.
        let entry = self.entries.get(key).map(|entry| entry.value().clone());
        match entry {
            Some(entry) if !entry.is_expired(now) => Ok(Some(decode_stored(&entry.raw))),
            Some(_) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), FolioError> {
        let raw = encode_stored(value)?;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                raw,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), FolioError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = MemoryStore::new();
        store
            .set("isbn_1", &json!({"name": "T"}), None)
            .await
            .unwrap();

        assert_eq!(store.get("isbn_1").await.unwrap(), Some(json!({"name": "T"})));
        assert_eq!(store.get("isbn_2").await.unwrap(), None);

        store.del("isbn_1").await.unwrap();
        assert_eq!(store.get("isbn_1").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_raw_text_round_trip() {
        let store = MemoryStore::new();
        store.set("token", &json!("abc{"), None).await.unwrap();
        assert_eq!(store.get("token").await.unwrap(), Some(json!("abc{")));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set("short", &json!(1), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        store.set("forever", &json!(2), None).await.unwrap();

        assert!(store.get("short").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.get("forever").await.unwrap(), Some(json!(2)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .set(&format!("k{i}"), &json!(i), Some(Duration::from_millis(10)))
                .await
                .unwrap();
        }
        store.set("keep", &json!("v"), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired(), 3);
        assert_eq!(store.len(), 1);
    }
}
