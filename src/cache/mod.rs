// =============================================================================
// Kline Cache -- TTL-bounded in-memory cache with a durable mirror
// =============================================================================
//
// Maps a fingerprint ("{SYMBOL}_{interval}_{limit}") to a processed kline
// payload. The in-memory map is authoritative: `set` commits locally first,
// then mirrors the whole entry set to the durable store from a blocking task.
// A mirror failure (quota, disk gone) shrinks the local cache and is
// otherwise swallowed; it never fails the `set`.
//
// Eviction happens on `set`, not on `get`: expired entries are swept first,
// then the oldest entries are dropped until the size cap holds. Age ties are
// broken by insertion order so eviction stays deterministic.
// =============================================================================

pub mod persist;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::MarketError;

pub use persist::{BackendKind, DurableStore, FileStore, NullStore, StoreStats, StoredEntry};

use crate::types::KlinePayload;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// In-memory tier statistics for the cache-statistics endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub expiry_ms: u64,
    pub keys: Vec<String>,
}

struct CacheSlot {
    entry: StoredEntry,
    /// Monotonic insertion counter; breaks eviction ties between entries
    /// stamped in the same millisecond.
    seq: u64,
}

struct Inner {
    slots: HashMap<String, CacheSlot>,
    next_seq: u64,
}

pub struct KlineCache {
    ttl: Duration,
    max_size: usize,
    store: Arc<dyn DurableStore>,
    /// Weak self-handle captured by the blocking mirror task.
    me: Weak<KlineCache>,
    inner: Mutex<Inner>,
}

impl KlineCache {
    /// Build the cache and warm-load it from the durable store, keeping only
    /// entries still valid under the TTL. A store that cannot be read just
    /// means a cold start.
    pub fn new(ttl: Duration, max_size: usize, store: Arc<dyn DurableStore>) -> Arc<Self> {
        let mut inner = Inner {
            slots: HashMap::new(),
            next_seq: 0,
        };

        match store.get_all() {
            Ok(persisted) => {
                let now = now_ms();
                let ttl_ms = ttl.as_millis() as i64;
                let total = persisted.len();
                for (key, entry) in persisted {
                    if now - entry.timestamp < ttl_ms {
                        let seq = inner.next_seq;
                        inner.next_seq += 1;
                        inner.slots.insert(key, CacheSlot { entry, seq });
                    }
                }
                info!(
                    loaded = inner.slots.len(),
                    expired = total - inner.slots.len(),
                    "kline cache hydrated from durable store"
                );
            }
            Err(e) => {
                let err = format!("{e:#}");
                warn!(error = %err, "cache hydration failed; starting cold");
            }
        }

        Arc::new_cyclic(|me| Self {
            ttl,
            max_size,
            store,
            me: me.clone(),
            inner: Mutex::new(inner),
        })
    }

    /// Payload for `key` if present and still fresh. A stale entry reads as
    /// absent but stays in place until the next `set` sweeps it.
    pub fn get(&self, key: &str) -> Option<KlinePayload> {
        let inner = self.inner.lock();
        let slot = inner.slots.get(key)?;
        if now_ms() - slot.entry.timestamp < self.ttl.as_millis() as i64 {
            debug!(key = %key, "cache hit");
            Some(slot.entry.data.clone())
        } else {
            None
        }
    }

    /// Insert or refresh `key`. The in-memory commit is unconditional; the
    /// durable mirror runs on a blocking task afterwards and, if it fails,
    /// shrinks the local cache instead of propagating.
    pub fn set(&self, key: &str, payload: KlinePayload) {
        let snapshot: Vec<(String, StoredEntry)> = {
            let mut inner = self.inner.lock();
            self.sweep_expired_locked(&mut inner);

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.slots.insert(
                key.to_string(),
                CacheSlot {
                    entry: StoredEntry {
                        data: payload,
                        timestamp: now_ms(),
                    },
                    seq,
                },
            );
            self.enforce_cap_locked(&mut inner);

            inner
                .slots
                .iter()
                .map(|(k, slot)| (k.clone(), slot.entry.clone()))
                .collect()
        };

        let cache = match self.me.upgrade() {
            Some(cache) => cache,
            None => return,
        };
        tokio::task::spawn_blocking(move || {
            if let Err(e) = cache.mirror(&snapshot) {
                let err = MarketError::Storage(format!("{e:#}"));
                warn!(error = %err, "durable mirror failed; shrinking in-memory cache");
                cache.shrink();
            }
        });
    }

    /// Empty both tiers. A durable clear failure is logged, never surfaced.
    pub fn clear(&self) {
        self.inner.lock().slots.clear();
        if let Err(e) = self.store.clear() {
            let err = format!("{e:#}");
            warn!(error = %err, "durable store clear failed");
        }
        info!("kline cache cleared");
    }

    pub fn memory_stats(&self) -> MemoryCacheStats {
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner.slots.keys().cloned().collect();
        keys.sort();
        MemoryCacheStats {
            size: keys.len(),
            max_size: self.max_size,
            expiry_ms: self.ttl.as_millis() as u64,
            keys,
        }
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Write the given entry set through to the durable store.
    fn mirror(&self, entries: &[(String, StoredEntry)]) -> anyhow::Result<()> {
        for (key, entry) in entries {
            self.store.save(key, entry)?;
        }
        Ok(())
    }

    /// TTL sweep plus size-cap enforcement, run after a failed mirror.
    fn shrink(&self) {
        let mut inner = self.inner.lock();
        self.sweep_expired_locked(&mut inner);
        self.enforce_cap_locked(&mut inner);
    }

    fn sweep_expired_locked(&self, inner: &mut Inner) {
        let now = now_ms();
        let ttl_ms = self.ttl.as_millis() as i64;
        let before = inner.slots.len();
        inner
            .slots
            .retain(|_, slot| now - slot.entry.timestamp < ttl_ms);
        let removed = before - inner.slots.len();
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
    }

    fn enforce_cap_locked(&self, inner: &mut Inner) {
        while inner.slots.len() > self.max_size {
            let oldest = inner
                .slots
                .iter()
                .min_by_key(|(_, slot)| (slot.entry.timestamp, slot.seq))
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    inner.slots.remove(&key);
                    debug!(key = %key, "evicted oldest entry over the size cap");
                }
                None => break,
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, VolumeBar};
    use tempfile::TempDir;

    fn sample_payload(bar_count: usize) -> KlinePayload {
        let bars = (0..bar_count)
            .map(|i| Bar::new(1_700_000_000 + i as i64 * 60, 1.0, 2.0, 0.5, 1.5))
            .collect::<Vec<_>>();
        let volume_bars = bars
            .iter()
            .map(|b| VolumeBar::new(b.time, 10.0, 4.0, 15.0))
            .collect();
        KlinePayload {
            bars,
            volume_bars,
            is_time_series: false,
        }
    }

    fn memory_cache() -> Arc<KlineCache> {
        KlineCache::new(Duration::from_secs(300), 50, Arc::new(NullStore))
    }

    fn inject(cache: &KlineCache, key: &str, timestamp: i64) {
        let mut inner = cache.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.slots.insert(
            key.to_string(),
            CacheSlot {
                entry: StoredEntry {
                    data: sample_payload(1),
                    timestamp,
                },
                seq,
            },
        );
    }

    struct FailingStore;

    impl DurableStore for FailingStore {
        fn save(&self, _key: &str, _entry: &StoredEntry) -> anyhow::Result<()> {
            anyhow::bail!("quota exceeded")
        }

        fn get(&self, _key: &str) -> anyhow::Result<Option<StoredEntry>> {
            Ok(None)
        }

        fn get_all(&self) -> anyhow::Result<HashMap<String, StoredEntry>> {
            anyhow::bail!("store offline")
        }

        fn clear(&self) -> anyhow::Result<()> {
            anyhow::bail!("store offline")
        }

        fn stats(&self) -> StoreStats {
            StoreStats {
                backend_kind: BackendKind::Disabled,
                item_count: 0,
                estimated_size_bytes: 0,
                keys: Vec::new(),
            }
        }
    }

    #[test]
    fn get_returns_only_fresh_entries() {
        let cache = memory_cache();
        inject(&cache, "BTCUSDT_1m_1000", now_ms());
        inject(&cache, "ETHUSDT_1m_1000", now_ms() - 301_000);

        assert!(cache.get("BTCUSDT_1m_1000").is_some());
        assert!(cache.get("ETHUSDT_1m_1000").is_none());
        assert!(cache.get("SOLUSDT_1m_1000").is_none());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = memory_cache();
        cache.set("BTCUSDT_1m_1000", sample_payload(3));

        let payload = cache.get("BTCUSDT_1m_1000").unwrap();
        assert_eq!(payload.bars.len(), 3);
        assert_eq!(payload.volume_bars.len(), 3);
    }

    #[tokio::test]
    async fn overwriting_a_key_refreshes_instead_of_duplicating() {
        let cache = memory_cache();
        cache.set("BTCUSDT_1m_1000", sample_payload(3));
        cache.set("BTCUSDT_1m_1000", sample_payload(7));

        assert_eq!(cache.memory_stats().size, 1);
        assert_eq!(cache.get("BTCUSDT_1m_1000").unwrap().bars.len(), 7);
    }

    #[tokio::test]
    async fn fifty_one_sets_leave_fifty_keys_with_the_earliest_evicted() {
        let cache = memory_cache();
        for i in 0..51 {
            cache.set(&format!("SYM{i:02}_1m_1000"), sample_payload(1));
        }

        let stats = cache.memory_stats();
        assert_eq!(stats.size, 50);
        assert!(cache.get("SYM00_1m_1000").is_none());
        assert!(cache.get("SYM01_1m_1000").is_some());
        assert!(cache.get("SYM50_1m_1000").is_some());
    }

    #[tokio::test]
    async fn expired_entries_are_swept_on_set() {
        let cache = memory_cache();
        inject(&cache, "STALE_1m_1000", now_ms() - 600_000);
        cache.set("FRESH_1m_1000", sample_payload(1));

        let stats = cache.memory_stats();
        assert_eq!(stats.keys, vec!["FRESH_1m_1000"]);
    }

    #[test]
    fn hydrates_fresh_entries_from_the_durable_store() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path().join("cache")));
        store
            .save(
                "BTCUSDT_1m_1000",
                &StoredEntry {
                    data: sample_payload(2),
                    timestamp: now_ms(),
                },
            )
            .unwrap();
        store
            .save(
                "ETHUSDT_1m_1000",
                &StoredEntry {
                    data: sample_payload(2),
                    timestamp: now_ms() - 600_000,
                },
            )
            .unwrap();

        let cache = KlineCache::new(Duration::from_secs(300), 50, store);
        assert_eq!(cache.memory_stats().size, 1);
        assert!(cache.get("BTCUSDT_1m_1000").is_some());
        assert!(cache.get("ETHUSDT_1m_1000").is_none());
    }

    #[test]
    fn hydration_failure_starts_cold() {
        let cache = KlineCache::new(Duration::from_secs(300), 50, Arc::new(FailingStore));
        assert_eq!(cache.memory_stats().size, 0);
    }

    #[test]
    fn clear_empties_memory_and_durable_store() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::open(dir.path().join("cache")));
        store
            .save(
                "BTCUSDT_1m_1000",
                &StoredEntry {
                    data: sample_payload(1),
                    timestamp: now_ms(),
                },
            )
            .unwrap();

        let cache = KlineCache::new(
            Duration::from_secs(300),
            50,
            Arc::clone(&store) as Arc<dyn DurableStore>,
        );
        assert_eq!(cache.memory_stats().size, 1);

        cache.clear();
        assert_eq!(cache.memory_stats().size, 0);
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn mirror_failure_path_shrinks_stale_entries() {
        let cache = KlineCache::new(Duration::from_secs(300), 50, Arc::new(FailingStore));
        inject(&cache, "STALE_1m_1000", now_ms() - 600_000);
        inject(&cache, "FRESH_1m_1000", now_ms());

        let snapshot = vec![(
            "FRESH_1m_1000".to_string(),
            StoredEntry {
                data: sample_payload(1),
                timestamp: now_ms(),
            },
        )];
        assert!(cache.mirror(&snapshot).is_err());

        cache.shrink();
        assert_eq!(cache.memory_stats().keys, vec!["FRESH_1m_1000"]);
    }

    #[tokio::test]
    async fn set_commits_in_memory_even_when_the_store_fails() {
        let cache = KlineCache::new(Duration::from_secs(300), 50, Arc::new(FailingStore));
        cache.set("BTCUSDT_1m_1000", sample_payload(2));
        assert!(cache.get("BTCUSDT_1m_1000").is_some());
    }
}
