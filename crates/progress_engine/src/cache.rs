//! In-memory result cache with TTL expiry and a capacity bound, optionally
//! mirrored to a RON file.
//!
//! Capacity eviction removes the entry with the smallest creation time, i.e.
//! insertion order. Reads do not refresh an entry, so this is not an LRU.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use progress_logging::{progress_debug, progress_info, progress_warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::persist::write_atomically;

/// Milliseconds since the Unix epoch. Injected so tests control expiry.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_size: usize,
    /// Applied when `set` is called without an explicit TTL.
    pub ttl: Duration,
    /// RON file mirroring the entries. `None` keeps the cache memory-only.
    pub persist_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl: Duration::from_secs(60 * 60),
            persist_path: None,
        }
    }
}

impl CacheConfig {
    /// Plain API responses: small and short-lived.
    pub fn api() -> Self {
        Self {
            max_size: 50,
            ttl: Duration::from_secs(5 * 60),
            persist_path: None,
        }
    }

    /// Text-analysis results.
    pub fn ai() -> Self {
        Self {
            max_size: 20,
            ttl: Duration::from_secs(60 * 60),
            persist_path: None,
        }
    }

    /// Synthesized speech results.
    pub fn tts() -> Self {
        Self {
            max_size: 30,
            ttl: Duration::from_secs(24 * 60 * 60),
            persist_path: None,
        }
    }

    pub fn with_persist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub hit_count: u64,
    /// Breaks eviction ties between entries created in the same millisecond.
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_size: usize,
    pub valid_size: usize,
    pub expired_count: usize,
    pub total_hits: u64,
    pub max_size: usize,
    /// Sorted.
    pub keys: Vec<String>,
}

/// One producer for [`CacheManager::warmup`].
pub struct WarmupItem<Fut> {
    pub key: String,
    pub ttl: Option<Duration>,
    pub producer: Fut,
}

/// Builds `"{prefix}_{hash}"` from a stable hash of the request parameters.
pub fn generate_key(prefix: &str, params: &serde_json::Value) -> String {
    let digest = Sha256::digest(params.to_string().as_bytes());
    let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}_{hash}")
}

pub struct CacheManager<V> {
    config: CacheConfig,
    clock: Clock,
    inner: Mutex<CacheInner<V>>,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    next_seq: u64,
}

impl<V> CacheManager<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(system_now_ms))
    }

    /// Loads the mirror file if one is configured, drops expired entries and
    /// trims the oldest ones down to `max_size`.
    pub fn with_clock(config: CacheConfig, clock: Clock) -> Self {
        let entries = config
            .persist_path
            .as_deref()
            .map(load_entries)
            .unwrap_or_default();
        let next_seq = entries.values().map(|e| e.seq + 1).max().unwrap_or(0);
        let manager = Self {
            config,
            clock,
            inner: Mutex::new(CacheInner { entries, next_seq }),
        };
        manager.cleanup_expired();
        manager.shrink_to_capacity();
        manager
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Stores `value`, evicting the oldest entry first when a new key would
    /// exceed `max_size`. Overwriting an existing key never evicts.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        if self.config.max_size == 0 {
            return;
        }
        let key = key.into();
        let now = self.now();
        let ttl_ms =
            u64::try_from(ttl.unwrap_or(self.config.ttl).as_millis()).unwrap_or(u64::MAX);

        let mut inner = self.lock();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_size {
            let evicted = evict_min_by_key(&mut inner.entries, |e| (e.created_at_ms, e.seq));
            if let Some(evicted) = evicted {
                progress_debug!("cache full, evicted oldest entry {}", evicted);
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created_at_ms: now,
                expires_at_ms: now.saturating_add(ttl_ms),
                hit_count: 0,
                seq,
            },
        );
        self.save(&inner);
    }

    /// Returns a clone of the value and counts a hit. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.now();
        let mut inner = self.lock();
        let expired = inner.entries.get(key)?.is_expired(now);
        if expired {
            inner.entries.remove(key);
            self.save(&inner);
            return None;
        }
        let entry = inner.entries.get_mut(key)?;
        entry.hit_count += 1;
        Some(entry.value.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        let now = self.now();
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            None => return false,
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            inner.entries.remove(key);
            self.save(&inner);
        }
        !expired
    }

    /// Inspects an entry without counting a hit or checking expiry.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.lock().entries.get(key).cloned()
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            self.save(&inner);
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        self.save(&inner);
    }

    pub fn clear_by_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - inner.entries.len();
        if removed > 0 {
            self.save(&inner);
        }
        removed
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        if removed > 0 {
            progress_debug!("cache cleanup removed {} expired entries", removed);
            self.save(&inner);
        }
        removed
    }

    pub fn evict_oldest(&self) -> Option<String> {
        let mut inner = self.lock();
        let evicted = evict_min_by_key(&mut inner.entries, |e| (e.created_at_ms, e.seq));
        if evicted.is_some() {
            self.save(&inner);
        }
        evicted
    }

    pub fn evict_least_used(&self) -> Option<String> {
        let mut inner = self.lock();
        let evicted = evict_min_by_key(&mut inner.entries, |e| (e.hit_count, e.seq));
        if evicted.is_some() {
            self.save(&inner);
        }
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.now();
        let inner = self.lock();
        let expired_count = inner
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .count();
        let mut keys: Vec<String> = inner.entries.keys().cloned().collect();
        keys.sort();
        CacheStats {
            total_size: inner.entries.len(),
            valid_size: inner.entries.len() - expired_count,
            expired_count,
            total_hits: inner.entries.values().map(|entry| entry.hit_count).sum(),
            max_size: self.config.max_size,
            keys,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached value for `key`, or runs `producer` and caches its
    /// `Ok` value. Errors are passed through and not cached.
    ///
    /// Concurrent calls for the same key are not coalesced: each one that
    /// misses runs its own producer, and the last to finish wins the slot.
    pub async fn with_cache<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(cached) = self.get(key) {
            return Ok(cached);
        }
        let value = producer().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Runs all producers concurrently and caches each success. The result
    /// holds one flag per item, in order.
    pub async fn warmup<I, Fut, E>(&self, items: I) -> Vec<bool>
    where
        I: IntoIterator<Item = WarmupItem<Fut>>,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        let tasks = items.into_iter().map(|item| async move {
            match item.producer.await {
                Ok(value) => {
                    self.set(item.key, value, item.ttl);
                    true
                }
                Err(err) => {
                    progress_warn!("cache warmup failed for key {}: {}", item.key, err);
                    false
                }
            }
        });
        join_all(tasks).await
    }

    /// A mirror written under a larger `max_size` may hold more entries than allowed.
    fn shrink_to_capacity(&self) {
        let mut inner = self.lock();
        let mut evicted = 0;
        while inner.entries.len() > self.config.max_size {
            if evict_min_by_key(&mut inner.entries, |e| (e.created_at_ms, e.seq)).is_none() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            progress_info!("cache over capacity after load, evicted {} oldest entries", evicted);
            self.save(&inner);
        }
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, inner: &CacheInner<V>) {
        let Some(path) = self.config.persist_path.as_deref() else {
            return;
        };
        let ordered: BTreeMap<&String, &CacheEntry<V>> = inner.entries.iter().collect();
        let content = match ron::ser::to_string_pretty(&ordered, ron::ser::PrettyConfig::new()) {
            Ok(text) => text,
            Err(err) => {
                progress_warn!("failed to serialize cache for {:?}: {}", path, err);
                return;
            }
        };
        if let Err(err) = write_atomically(path, &content) {
            progress_warn!("failed to write cache to {:?}: {}", path, err);
        }
    }
}

/// The cache namespaces used by the workbench, each independently owned.
pub struct CacheNamespaces {
    pub api: Arc<CacheManager<serde_json::Value>>,
    pub ai: Arc<CacheManager<serde_json::Value>>,
    pub tts: Arc<CacheManager<serde_json::Value>>,
}

impl CacheNamespaces {
    /// With a storage directory, the ai and tts caches are mirrored to
    /// `ai_cache.ron` and `tts_cache.ron` inside it. The api cache is always
    /// memory-only.
    pub fn new(storage_dir: Option<&Path>) -> Self {
        let persisted = |config: CacheConfig, file: &str| match storage_dir {
            Some(dir) => config.with_persist_path(dir.join(file)),
            None => config,
        };
        Self {
            api: Arc::new(CacheManager::new(CacheConfig::api())),
            ai: Arc::new(CacheManager::new(persisted(CacheConfig::ai(), "ai_cache.ron"))),
            tts: Arc::new(CacheManager::new(persisted(CacheConfig::tts(), "tts_cache.ron"))),
        }
    }
}

fn evict_min_by_key<V, K: Ord>(
    entries: &mut HashMap<String, CacheEntry<V>>,
    rank: impl Fn(&CacheEntry<V>) -> K,
) -> Option<String> {
    let key = entries
        .iter()
        .min_by_key(|(_, entry)| rank(entry))
        .map(|(key, _)| key.clone())?;
    entries.remove(&key);
    Some(key)
}

fn load_entries<V: DeserializeOwned>(path: &Path) -> HashMap<String, CacheEntry<V>> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(err) => {
            progress_warn!("failed to read cache from {:?}: {}", path, err);
            return HashMap::new();
        }
    };
    match ron::from_str::<HashMap<String, CacheEntry<V>>>(&content) {
        Ok(entries) => {
            progress_info!("loaded {} cache entries from {:?}", entries.len(), path);
            entries
        }
        Err(err) => {
            progress_warn!("failed to parse cache from {:?}: {}", path, err);
            HashMap::new()
        }
    }
}

fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
