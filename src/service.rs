// =============================================================================
// Market Data Service -- the facade the renderer talks to
// =============================================================================
//
// One service object, constructed at startup and shared as `Arc`, ties the
// subsystems together: REST client for history, the TTL cache in front of it,
// the live Bar Store for the current view, the stream manager feeding it, and
// the indicator engine reading from it.
//
// State changes reach consumers through an explicit publish step: the service
// builds a `MarketUpdate` (full snapshot or single-bar delta) and pushes it to
// every registered listener. Listeners own their copy; there is no shared
// reactive state.
//
// Thread safety follows the usual split: `parking_lot` locks for the mutable
// collections, `Arc`-held subsystems managing their own interior mutability.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{DurableStore, FileStore, KlineCache, MemoryCacheStats, NullStore, StoreStats};
use crate::config::Config;
use crate::error::Result;
use crate::indicators::{self, IndicatorKind, IndicatorOutput, IndicatorValue};
use crate::market_data::{
    BarCallback, BarStore, KlineClient, StreamManager, StreamStats, UpsertOutcome,
};
use crate::types::{Bar, KlineKey, KlinePayload, MarketUpdate, Ticker24h, VolumeBar};

/// Renderer-side listener: receives every published update.
pub type UpdateCallback = Arc<dyn Fn(&MarketUpdate) + Send + Sync>;

/// Combined statistics over both cache tiers and the stream slot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsReport {
    pub memory: MemoryCacheStats,
    pub persistent: StoreStats,
    pub reconnect: StreamStats,
}

/// The view currently backing the Bar Store and the stream subscription.
struct ViewState {
    key: Option<KlineKey>,
    limit: u32,
    stream_handle: Option<Uuid>,
}

pub struct MarketDataService {
    client: KlineClient,
    cache: Arc<KlineCache>,
    stream: Arc<StreamManager>,
    /// Weak self-handle handed to stream callbacks.
    me: Weak<MarketDataService>,

    store: RwLock<BarStore>,
    view: Mutex<ViewState>,
    listeners: Mutex<HashMap<Uuid, UpdateCallback>>,
    active_indicators: Mutex<HashSet<IndicatorKind>>,
}

impl MarketDataService {
    /// Wire the full service from configuration. The durable mirror is a
    /// directory store unless persistence is switched off.
    pub fn new(config: &Config) -> Arc<Self> {
        let durable: Arc<dyn DurableStore> = if config.persist_enabled {
            Arc::new(FileStore::open(&config.storage_dir))
        } else {
            Arc::new(NullStore)
        };
        let cache = KlineCache::new(config.cache_ttl, config.cache_max_entries, durable);
        let stream = StreamManager::new(
            config.ws_endpoint.clone(),
            config.reconnect_base_delay,
            config.max_reconnect_attempts,
        );
        Self::with_parts(
            KlineClient::new(config.rest_endpoint.clone()),
            cache,
            stream,
            config.max_bars,
        )
    }

    /// Assemble from pre-built parts. Tests use this to substitute stores and
    /// endpoints.
    pub fn with_parts(
        client: KlineClient,
        cache: Arc<KlineCache>,
        stream: Arc<StreamManager>,
        max_bars: usize,
    ) -> Arc<Self> {
        let mut active = HashSet::new();
        active.insert(IndicatorKind::Ma);

        Arc::new_cyclic(|me| Self {
            client,
            cache,
            stream,
            me: me.clone(),
            store: RwLock::new(BarStore::new(max_bars)),
            view: Mutex::new(ViewState {
                key: None,
                limit: 0,
                stream_handle: None,
            }),
            listeners: Mutex::new(HashMap::new()),
            active_indicators: Mutex::new(active),
        })
    }

    // -------------------------------------------------------------------------
    // Historical data
    // -------------------------------------------------------------------------

    /// Cached-or-fetched history for any key, independent of the live view.
    ///
    /// A failed fetch degrades to a well-formed empty payload; callers never
    /// see the error.
    pub async fn history(&self, key: &KlineKey, limit: u32) -> KlinePayload {
        let fingerprint = key.fingerprint(limit);
        if let Some(payload) = self.cache.get(&fingerprint) {
            return payload;
        }

        match self.client.get_klines(key, limit).await {
            Ok(payload) => {
                self.cache.set(&fingerprint, payload.clone());
                payload
            }
            Err(e) => {
                error!(key = %key, limit, error = %e, "historical load failed; serving empty payload");
                KlinePayload::empty(key.interval.is_time_series())
            }
        }
    }

    /// Switch the live view: load history, replace the Bar Store, restart
    /// streaming on the new key, and publish a full snapshot.
    pub async fn switch_view(&self, key: KlineKey, limit: u32) -> KlinePayload {
        info!(key = %key, limit, "switching market view");
        let payload = self.history(&key, limit).await;

        self.store.write().replace_all(payload.clone());

        {
            let mut view = self.view.lock();
            if let Some(handle) = view.stream_handle.take() {
                self.stream.unsubscribe(handle);
            }
            let handle = self.stream.subscribe(key.clone(), self.stream_callback());
            view.key = Some(key.clone());
            view.limit = limit;
            view.stream_handle = Some(handle);
        }

        self.publish(&MarketUpdate::Snapshot {
            symbol: key.symbol.clone(),
            interval: key.interval,
            payload: payload.clone(),
        });
        payload
    }

    /// Current Bar Store content.
    pub fn snapshot(&self) -> KlinePayload {
        self.store.read().snapshot()
    }

    /// Full-snapshot update for the current view, or `None` before the first
    /// `switch_view`. The WebSocket feed sends this on connect.
    pub fn snapshot_update(&self) -> Option<MarketUpdate> {
        let key = self.view.lock().key.clone()?;
        Some(MarketUpdate::Snapshot {
            symbol: key.symbol.clone(),
            interval: key.interval,
            payload: self.snapshot(),
        })
    }

    pub fn current_view(&self) -> Option<(KlineKey, u32)> {
        let view = self.view.lock();
        view.key.clone().map(|key| (key, view.limit))
    }

    // -------------------------------------------------------------------------
    // Live stream plumbing
    // -------------------------------------------------------------------------

    fn stream_callback(&self) -> BarCallback {
        // Weak, so the stream manager's callback map never keeps the service
        // alive on its own.
        let weak = self.me.clone();
        Arc::new(move |bar, volume, is_final| {
            if let Some(service) = weak.upgrade() {
                service.apply_stream_update(bar, volume, is_final);
            }
        })
    }

    /// Route one live bar through the Bar Store and publish what changed:
    /// appends and in-place replacements go out as deltas, an out-of-order
    /// rewrite forces a full snapshot, and stale updates publish nothing.
    fn apply_stream_update(&self, bar: Bar, volume: VolumeBar, is_final: bool) {
        let key = match self.view.lock().key.clone() {
            Some(key) => key,
            None => return,
        };

        let outcome = self.store.write().upsert(bar, volume);
        let update = match outcome {
            UpsertOutcome::Appended | UpsertOutcome::ReplacedLast => Some(MarketUpdate::Delta {
                symbol: key.symbol.clone(),
                interval: key.interval,
                bar,
                volume,
                is_final,
            }),
            UpsertOutcome::Rewrote => Some(MarketUpdate::Snapshot {
                symbol: key.symbol.clone(),
                interval: key.interval,
                payload: self.store.read().snapshot(),
            }),
            UpsertOutcome::Ignored => None,
        };

        if let Some(update) = update {
            self.publish(&update);
        }
    }

    // -------------------------------------------------------------------------
    // Update notification
    // -------------------------------------------------------------------------

    /// Register a listener for published updates and return its handle.
    pub fn subscribe_updates(&self, callback: UpdateCallback) -> Uuid {
        let handle = Uuid::new_v4();
        self.listeners.lock().insert(handle, callback);
        debug!(%handle, "renderer listener registered");
        handle
    }

    pub fn unsubscribe_updates(&self, handle: Uuid) {
        if self.listeners.lock().remove(&handle).is_none() {
            warn!(%handle, "unsubscribe for unknown renderer listener");
        }
    }

    /// Push one update to every listener. A panicking listener is contained
    /// so the rest still hear about the change.
    fn publish(&self, update: &MarketUpdate) {
        let listeners: Vec<UpdateCallback> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(update))).is_err() {
                error!("renderer listener panicked; continuing delivery");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Indicators
    // -------------------------------------------------------------------------

    /// Active kinds in the fixed display order.
    pub fn active_indicators(&self) -> Vec<IndicatorKind> {
        let active = self.active_indicators.lock();
        IndicatorKind::ALL
            .iter()
            .copied()
            .filter(|kind| active.contains(kind))
            .collect()
    }

    /// Flip one indicator by name; returns the kind and its new state, or
    /// `None` for a name outside the closed set (warned, ignored).
    pub fn toggle_indicator(&self, name: &str) -> Option<(IndicatorKind, bool)> {
        let kind = match IndicatorKind::parse(name) {
            Some(kind) => kind,
            None => {
                warn!(name = %name, "ignoring unknown indicator");
                return None;
            }
        };

        let mut active = self.active_indicators.lock();
        let enabled = if active.remove(&kind) {
            false
        } else {
            active.insert(kind);
            true
        };
        info!(kind = %kind, enabled, "indicator toggled");
        Some((kind, enabled))
    }

    /// Series for every active indicator over the current Bar Store.
    pub fn active_indicator_series(&self) -> Result<Vec<(IndicatorKind, IndicatorOutput)>> {
        let kinds = self.active_indicators();
        let store = self.store.read();
        kinds
            .into_iter()
            .map(|kind| indicators::compute(kind, store.bars(), store.volumes()).map(|s| (kind, s)))
            .collect()
    }

    pub fn indicator_series(&self, kind: IndicatorKind) -> Result<IndicatorOutput> {
        let store = self.store.read();
        indicators::compute(kind, store.bars(), store.volumes())
    }

    pub fn indicator_value_at(&self, kind: IndicatorKind, index: usize) -> Result<IndicatorValue> {
        let store = self.store.read();
        indicators::value_at(kind, store.bars(), store.volumes(), index)
    }

    // -------------------------------------------------------------------------
    // Passthroughs
    // -------------------------------------------------------------------------

    /// 24-hour rolling stats. Unlike the kline path this surfaces fetch
    /// failures; there is no meaningful empty fallback for a ticker.
    pub async fn ticker_24h(&self, symbol: &str) -> Result<Ticker24h> {
        self.client.get_ticker_24h(symbol).await
    }

    pub fn cache_stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            memory: self.cache.memory_stats(),
            persistent: self.cache.store_stats(),
            reconnect: self.stream.stats(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
