use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use progress_engine::{
    generate_key, CacheConfig, CacheManager, CacheNamespaces, CacheStats, Clock, WarmupItem,
};
use serde_json::json;
use tempfile::TempDir;

struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    fn clock(&self) -> Clock {
        let now_ms = Arc::clone(&self.now_ms);
        Arc::new(move || now_ms.load(Ordering::SeqCst))
    }

    fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

fn cache_with(max_size: usize, clock: &ManualClock) -> CacheManager<String> {
    let config = CacheConfig {
        max_size,
        ttl: Duration::from_secs(60),
        persist_path: None,
    };
    CacheManager::with_clock(config, clock.clock())
}

#[derive(Debug)]
struct Unavailable;

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend unavailable")
    }
}

#[test]
fn get_counts_hits() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(10, &clock);
    cache.set("tts_a", "audio-a".to_string(), None);

    assert_eq!(cache.get("tts_a"), Some("audio-a".to_string()));
    assert_eq!(cache.get("tts_a"), Some("audio-a".to_string()));
    assert_eq!(cache.entry("tts_a").unwrap().hit_count, 2);
    assert_eq!(cache.get("missing"), None);
}

#[test]
fn expired_entry_is_removed_on_get() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(10, &clock);
    cache.set("k", "v".to_string(), Some(Duration::from_millis(500)));

    clock.advance(Duration::from_millis(500));
    assert!(cache.has("k"), "expiry is exclusive of the boundary");

    clock.advance(Duration::from_millis(1));
    assert_eq!(cache.get("k"), None);
    assert!(!cache.has("k"));
    assert!(cache.entry("k").is_none());
}

#[test]
fn full_cache_evicts_the_earliest_created_entry() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(3, &clock);
    for key in ["first", "second", "third"] {
        cache.set(key, key.to_string(), None);
        clock.advance(Duration::from_millis(10));
    }

    // Reading the oldest entry does not protect it: this is not an LRU.
    assert!(cache.get("first").is_some());
    cache.set("fourth", "fourth".to_string(), None);

    assert_eq!(cache.len(), 3);
    assert!(!cache.has("first"));
    assert!(cache.has("second"));
    assert!(cache.has("fourth"));
}

#[test]
fn same_millisecond_entries_evict_in_insertion_order() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(2, &clock);
    cache.set("a", "a".to_string(), None);
    cache.set("b", "b".to_string(), None);
    cache.set("c", "c".to_string(), None);

    assert!(!cache.has("a"));
    assert!(cache.has("b"));
    assert!(cache.has("c"));
}

#[test]
fn overwriting_a_key_does_not_evict() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(2, &clock);
    cache.set("a", "a".to_string(), None);
    cache.set("b", "b".to_string(), None);
    cache.set("b", "b2".to_string(), None);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("a"), Some("a".to_string()));
    assert_eq!(cache.get("b"), Some("b2".to_string()));
}

#[test]
fn least_used_eviction_and_prefix_clear() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(10, &clock);
    cache.set("ai_x", "x".to_string(), None);
    cache.set("ai_y", "y".to_string(), None);
    cache.set("tts_z", "z".to_string(), None);
    cache.get("ai_x");
    cache.get("tts_z");

    assert_eq!(cache.evict_least_used(), Some("ai_y".to_string()));
    assert_eq!(cache.clear_by_prefix("ai_"), 1);
    assert_eq!(cache.evict_oldest(), Some("tts_z".to_string()));
    assert!(cache.is_empty());
    assert_eq!(cache.evict_oldest(), None);
}

#[test]
fn stats_and_cleanup() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(5, &clock);
    cache.set("short", "s".to_string(), Some(Duration::from_secs(1)));
    cache.set("long", "l".to_string(), Some(Duration::from_secs(100)));
    cache.get("long");
    clock.advance(Duration::from_secs(2));

    assert_eq!(
        cache.stats(),
        CacheStats {
            total_size: 2,
            valid_size: 1,
            expired_count: 1,
            total_hits: 1,
            max_size: 5,
            keys: vec!["long".to_string(), "short".to_string()],
        }
    );
    assert_eq!(cache.cleanup_expired(), 1);
    assert_eq!(cache.len(), 1);

    assert!(cache.delete("long"));
    assert!(!cache.delete("long"));
    cache.set("again", "a".to_string(), None);
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn generated_keys_are_stable_and_distinct() {
    let a = generate_key("ai", &json!({ "text": "hello", "mode": "summary" }));
    let b = generate_key("ai", &json!({ "text": "hello", "mode": "summary" }));
    let c = generate_key("ai", &json!({ "text": "hello", "mode": "keywords" }));

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.starts_with("ai_"));
    assert_eq!(a.len(), "ai_".len() + 16);
}

#[tokio::test]
async fn with_cache_runs_producer_once_and_skips_errors() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(10, &clock);
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value = cache
            .with_cache("ai_summary", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Unavailable>("summary".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "summary");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let err = cache
        .with_cache("ai_other", None, || async { Err::<String, _>(Unavailable) })
        .await;
    assert!(err.is_err());
    assert!(!cache.has("ai_other"));
}

#[tokio::test]
async fn concurrent_misses_each_run_their_producer() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(10, &clock);
    let calls = AtomicUsize::new(0);

    let produce = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok::<_, Unavailable>("value".to_string())
    };
    let (first, second) = tokio::join!(
        cache.with_cache("same", None, produce),
        cache.with_cache("same", None, produce),
    );

    assert_eq!(first.unwrap(), "value");
    assert_eq!(second.unwrap(), "value");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn warmup_reports_each_item() {
    let clock = ManualClock::new(1_000);
    let cache = cache_with(10, &clock);

    let item = |key: &str, result: Result<String, Unavailable>| WarmupItem {
        key: key.to_string(),
        ttl: None,
        producer: async move { result },
    };
    let flags = cache
        .warmup(vec![
            item("tts_1", Ok("one".to_string())),
            item("tts_2", Err(Unavailable)),
            item("tts_3", Ok("three".to_string())),
        ])
        .await;

    assert_eq!(flags, vec![true, false, true]);
    assert_eq!(cache.stats().keys, vec!["tts_1".to_string(), "tts_3".to_string()]);
}

#[test]
fn persisted_cache_survives_reload_and_drops_expired() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("tts_cache.ron");
    let clock = ManualClock::new(10_000);
    let config = CacheConfig::tts().with_persist_path(&path);

    {
        let cache: CacheManager<String> = CacheManager::with_clock(config.clone(), clock.clock());
        cache.set("tts_keep", "keep".to_string(), None);
        cache.set("tts_drop", "drop".to_string(), Some(Duration::from_secs(1)));
    }
    assert!(path.exists());

    clock.advance(Duration::from_secs(5));
    let reloaded: CacheManager<String> = CacheManager::with_clock(config, clock.clock());
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.get("tts_keep"), Some("keep".to_string()));

    // New entries keep sorting after the reloaded ones.
    reloaded.set("tts_new", "new".to_string(), None);
    assert_eq!(reloaded.evict_oldest(), Some("tts_keep".to_string()));
}

#[test]
fn corrupt_mirror_file_starts_empty() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ai_cache.ron");
    std::fs::write(&path, "not ron at all {").unwrap();

    let cache: CacheManager<String> =
        CacheManager::new(CacheConfig::ai().with_persist_path(&path));
    assert!(cache.is_empty());
}

#[test]
fn namespaces_are_independent() {
    let temp = TempDir::new().unwrap();
    let caches = CacheNamespaces::new(Some(temp.path()));

    caches.api.set("api_1", json!({ "ok": true }), None);
    assert!(caches.ai.is_empty());
    assert!(caches.tts.is_empty());
    assert_eq!(caches.api.config().max_size, 50);
    assert_eq!(caches.ai.config().max_size, 20);
    assert_eq!(caches.tts.config().max_size, 30);
    assert_eq!(caches.api.config().persist_path, None);
    assert_eq!(
        caches.tts.config().persist_path,
        Some(temp.path().join("tts_cache.ron"))
    );
}

#[test]
fn reload_into_smaller_cache_keeps_the_newest_entries() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ai_cache.ron");
    let clock = ManualClock::new(10_000);
    let wide = CacheConfig {
        max_size: 10,
        ttl: Duration::from_secs(60),
        persist_path: Some(path.clone()),
    };
    {
        let cache: CacheManager<String> = CacheManager::with_clock(wide, clock.clock());
        for i in 0..10 {
            cache.set(format!("ai_{i}"), i.to_string(), None);
            clock.advance(Duration::from_millis(1));
        }
    }

    let narrow = CacheConfig {
        max_size: 3,
        ttl: Duration::from_secs(60),
        persist_path: Some(path.clone()),
    };
    let reloaded: CacheManager<String> = CacheManager::with_clock(narrow.clone(), clock.clock());
    assert_eq!(reloaded.len(), 3);
    assert_eq!(
        reloaded.stats().keys,
        vec!["ai_7".to_string(), "ai_8".to_string(), "ai_9".to_string()]
    );

    reloaded.set("ai_new", "new".to_string(), None);
    assert_eq!(reloaded.len(), 3);
    assert!(!reloaded.has("ai_7"));

    // The trimmed state was written back to the mirror.
    drop(reloaded);
    let again: CacheManager<String> = CacheManager::with_clock(narrow, clock.clock());
    assert_eq!(again.len(), 3);
}
