use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

pub const DEFAULT_TTL_SECS: u64 = 3_600;

type CacheKey = (String, String);
type CacheEntry = (Value, Instant);

/// TTL cache for per-(instance, model) field metadata.
///
/// Expiry is lazy: entries are checked on read. Duplicate concurrent misses
/// are acceptable; the last writer wins.
#[derive(Clone)]
pub struct MetadataCache {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Configured TTL in seconds; 0 disables caching.
    pub fn ttl_secs() -> u64 {
        std::env::var("ODOO_METADATA_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECS)
    }

    pub async fn get(&self, instance: &str, model: &str) -> Option<Value> {
        let key = (instance.to_string(), model.to_string());
        let guard = self.entries.read().await;
        if let Some((value, expires)) = guard.get(&key)
            && Instant::now() < *expires
        {
            return Some(value.clone());
        }
        None
    }

    pub async fn insert(&self, instance: &str, model: &str, value: Value, ttl_secs: u64) {
        let key = (instance.to_string(), model.to_string());
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries.write().await.insert(key, (value, expires));
    }

    /// Drop every model entry for one instance; called when its descriptor
    /// changes.
    pub async fn purge_instance(&self, instance: &str) {
        self.entries
            .write()
            .await
            .retain(|(inst, _), _| inst != instance);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
