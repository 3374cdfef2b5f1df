// =============================================================================
// StreamManager -- single-slot live kline subscription with reconnect
// =============================================================================
//
// The manager owns at most one physical stream connection at a time. Multiple
// subscriber handles share it; subscribing to a different (instrument,
// interval) tears the current connection down with a normal close before the
// new one opens. Only abnormal closes enter the reconnect path: linear
// backoff (base delay times attempt number), capped attempts, and a pending
// timer that dies with the slot generation that scheduled it.
//
// Every stale task -- an old connection's reader, an outdated reconnect
// timer -- self-cancels by comparing its captured generation against the
// slot's current one, so teardown is a synchronous counter bump plus a close
// signal, never a join.
// =============================================================================

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::fetch::parse_str_f64;
use crate::error::{MarketError, Result};
use crate::types::{Bar, KlineKey, VolumeBar};

/// Subscriber callback: one live bar update with its volume counterpart and
/// the completion flag.
pub type BarCallback = Arc<dyn Fn(Bar, VolumeBar, bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Idle,
    Connecting,
    Open,
}

/// Decision taken after an abnormal close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectPlan {
    Schedule { attempt: u32 },
    AlreadyPending,
    NoSubscribers,
    OutOfAttempts,
}

/// Snapshot of the slot for diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub state: &'static str,
    pub subscribers: usize,
    pub is_reconnecting: bool,
    pub attempts: u32,
    pub max_attempts: u32,
}

struct Inner {
    key: Option<KlineKey>,
    callbacks: HashMap<Uuid, BarCallback>,
    conn: ConnState,
    /// Bumped on every teardown and every new connection; stale tasks check it.
    generation: u64,
    attempts: u32,
    reconnect_pending: bool,
    close_tx: Option<watch::Sender<bool>>,
}

pub struct StreamManager {
    ws_endpoint: String,
    base_delay: Duration,
    max_attempts: u32,
    /// Weak self-handle cloned into the reader and timer tasks this manager
    /// spawns; it only fails to upgrade once the last owner is gone.
    me: Weak<StreamManager>,
    inner: Mutex<Inner>,
}

impl StreamManager {
    pub fn new(
        ws_endpoint: impl Into<String>,
        base_delay: Duration,
        max_attempts: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            ws_endpoint: ws_endpoint.into(),
            base_delay,
            max_attempts,
            me: me.clone(),
            inner: Mutex::new(Inner {
                key: None,
                callbacks: HashMap::new(),
                conn: ConnState::Idle,
                generation: 0,
                attempts: 0,
                reconnect_pending: false,
                close_tx: None,
            }),
        })
    }

    // -------------------------------------------------------------------------
    // Subscription surface
    // -------------------------------------------------------------------------

    /// Register a callback for `key` and return its handle.
    ///
    /// An existing live connection for the same key is shared; anything else
    /// (different key, dead slot, pending reconnect) is torn down first and a
    /// fresh connection opened.
    pub fn subscribe(&self, key: KlineKey, callback: BarCallback) -> Uuid {
        let handle = Uuid::new_v4();
        let mut inner = self.inner.lock();
        inner.callbacks.insert(handle, callback);

        let shares_live_slot = inner.key.as_ref() == Some(&key)
            && matches!(inner.conn, ConnState::Connecting | ConnState::Open);

        if shares_live_slot {
            debug!(key = %key, %handle, subscribers = inner.callbacks.len(), "joined live stream");
        } else {
            self.teardown_locked(&mut inner);
            inner.attempts = 0;
            inner.reconnect_pending = false;
            self.spawn_connection_locked(&mut inner, key);
        }
        handle
    }

    /// Drop a handle. When the last one goes, the connection closes with a
    /// normal close code and any pending reconnect dies with it.
    pub fn unsubscribe(&self, handle: Uuid) {
        let mut inner = self.inner.lock();
        if inner.callbacks.remove(&handle).is_none() {
            warn!(%handle, "unsubscribe for unknown handle");
            return;
        }
        if inner.callbacks.is_empty() {
            debug!(key = ?inner.key, "last subscriber left; closing stream");
            self.teardown_locked(&mut inner);
            inner.key = None;
            inner.attempts = 0;
            inner.reconnect_pending = false;
        }
    }

    pub fn stats(&self) -> StreamStats {
        let inner = self.inner.lock();
        StreamStats {
            state: match inner.conn {
                ConnState::Idle => "idle",
                ConnState::Connecting => "connecting",
                ConnState::Open => "open",
            },
            subscribers: inner.callbacks.len(),
            is_reconnecting: inner.reconnect_pending,
            attempts: inner.attempts,
            max_attempts: self.max_attempts,
        }
    }

    // -------------------------------------------------------------------------
    // Slot lifecycle
    // -------------------------------------------------------------------------

    /// Invalidate whatever the slot is doing. The generation bump makes every
    /// in-flight task for the old connection a no-op; the close signal lets
    /// the reader shut the socket with a normal close code.
    fn teardown_locked(&self, inner: &mut Inner) {
        inner.generation = inner.generation.wrapping_add(1);
        if let Some(tx) = inner.close_tx.take() {
            let _ = tx.send(true);
        }
        inner.conn = ConnState::Idle;
    }

    fn spawn_connection_locked(&self, inner: &mut Inner, key: KlineKey) {
        let manager = match self.me.upgrade() {
            Some(manager) => manager,
            None => return,
        };
        inner.generation = inner.generation.wrapping_add(1);
        let generation = inner.generation;
        let (close_tx, close_rx) = watch::channel(false);
        inner.close_tx = Some(close_tx);
        inner.conn = ConnState::Connecting;
        inner.key = Some(key.clone());

        tokio::spawn(async move {
            manager.run_connection(key, generation, close_rx).await;
        });
    }

    async fn run_connection(
        self: Arc<Self>,
        key: KlineKey,
        generation: u64,
        mut close_rx: watch::Receiver<bool>,
    ) {
        let url = format!("{}/ws/{}", self.ws_endpoint, key.stream_name());
        info!(key = %key, url = %url, "connecting to kline stream");

        let ws = match connect_async(&url).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                let err = MarketError::from(e);
                error!(key = %key, error = %err, "kline stream connection failed");
                self.handle_disconnect(&key, generation, true);
                return;
            }
        };

        let stale = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                true
            } else {
                inner.conn = ConnState::Open;
                inner.attempts = 0;
                false
            }
        };
        if stale {
            debug!(key = %key, "connection superseded before opening; dropping");
            let (mut write, _read) = ws.split();
            let _ = write.close().await;
            return;
        }
        info!(key = %key, "kline stream open");

        let time_series = key.interval.is_time_series();
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = close_rx.changed() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = write.close().await;
                    debug!(key = %key, "kline stream closed normally");
                    return;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_stream_bar(&text, time_series) {
                            Ok((bar, volume, is_final)) => {
                                self.deliver(generation, bar, volume, is_final);
                            }
                            Err(e) => {
                                warn!(key = %key, error = %e, "dropping malformed stream frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let normal = frame
                            .as_ref()
                            .map_or(false, |f| f.code == CloseCode::Normal);
                        if normal {
                            info!(key = %key, "server closed kline stream normally");
                        } else {
                            warn!(key = %key, frame = ?frame, "kline stream closed abnormally");
                        }
                        self.handle_disconnect(&key, generation, !normal);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = MarketError::from(e);
                        error!(key = %key, error = %err, "kline stream read error");
                        self.handle_disconnect(&key, generation, true);
                        return;
                    }
                    None => {
                        warn!(key = %key, "kline stream ended");
                        self.handle_disconnect(&key, generation, true);
                        return;
                    }
                }
            }
        }
    }

    /// Fan one update out to every subscriber. A panicking callback is
    /// contained so the rest still get the bar.
    fn deliver(&self, generation: u64, bar: Bar, volume: VolumeBar, is_final: bool) {
        let callbacks: Vec<BarCallback> = {
            let inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.callbacks.values().cloned().collect()
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(bar, volume, is_final))).is_err() {
                error!("subscriber callback panicked; continuing delivery");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reconnect policy
    // -------------------------------------------------------------------------

    fn handle_disconnect(&self, key: &KlineKey, generation: u64, abnormal: bool) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            // A teardown or newer connection already superseded this one.
            return;
        }
        inner.conn = ConnState::Idle;
        inner.close_tx = None;
        if !abnormal {
            return;
        }

        match plan_reconnect(
            inner.callbacks.len(),
            inner.reconnect_pending,
            inner.attempts,
            self.max_attempts,
        ) {
            ReconnectPlan::Schedule { attempt } => {
                let manager = match self.me.upgrade() {
                    Some(manager) => manager,
                    None => return,
                };
                inner.attempts = attempt;
                inner.reconnect_pending = true;
                let delay = backoff_delay(self.base_delay, attempt);
                info!(
                    key = %key,
                    attempt,
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling stream reconnect"
                );

                let key = key.clone();
                let scheduled_generation = inner.generation;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    manager.fire_reconnect(key, scheduled_generation);
                });
            }
            ReconnectPlan::AlreadyPending => {
                debug!(key = %key, "reconnect already pending");
            }
            ReconnectPlan::NoSubscribers => {
                debug!(key = %key, "no subscribers left; not reconnecting");
            }
            ReconnectPlan::OutOfAttempts => {
                error!(
                    key = %key,
                    attempts = inner.attempts,
                    "reconnect attempts exhausted; stream stays down until resubscribed"
                );
            }
        }
    }

    fn fire_reconnect(&self, key: KlineKey, scheduled_generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != scheduled_generation {
            debug!(key = %key, "scheduled reconnect superseded; skipping");
            return;
        }
        inner.reconnect_pending = false;
        if inner.callbacks.is_empty() {
            debug!(key = %key, "subscribers gone before reconnect fired; skipping");
            return;
        }
        info!(key = %key, attempt = inner.attempts, "reconnecting kline stream");
        self.spawn_connection_locked(&mut inner, key);
    }
}

fn plan_reconnect(
    subscribers: usize,
    pending: bool,
    attempts: u32,
    max_attempts: u32,
) -> ReconnectPlan {
    if subscribers == 0 {
        ReconnectPlan::NoSubscribers
    } else if pending {
        ReconnectPlan::AlreadyPending
    } else if attempts >= max_attempts {
        ReconnectPlan::OutOfAttempts
    } else {
        ReconnectPlan::Schedule {
            attempt: attempts + 1,
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt
}

// -----------------------------------------------------------------------------
// Frame parsing
// -----------------------------------------------------------------------------

/// Parse one inbound kline frame into a (bar, volume, is_final) triple.
///
/// Accepts both the bare single-stream payload and the combined-stream
/// envelope with an outer `data` wrapper:
/// ```json
/// { "e": "kline", "s": "BTCUSDT", "k": { "t": ..., "o": "...", "x": false } }
/// ```
fn parse_stream_bar(text: &str, time_series: bool) -> Result<(Bar, VolumeBar, bool)> {
    let root: Value = serde_json::from_str(text)?;
    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let k = data
        .get("k")
        .ok_or_else(|| MarketError::Parse("missing field k".into()))?;

    let time = k["t"]
        .as_i64()
        .ok_or_else(|| MarketError::Parse("missing field k.t".into()))?
        / 1000;
    let open = parse_str_f64(&k["o"], "k.o")?;
    let high = parse_str_f64(&k["h"], "k.h")?;
    let low = parse_str_f64(&k["l"], "k.l")?;
    let close = parse_str_f64(&k["c"], "k.c")?;
    let volume = parse_str_f64(&k["v"], "k.v")?;
    let buy_volume = parse_str_f64(&k["V"], "k.V")?;
    let quote_volume = parse_str_f64(&k["q"], "k.q")?;
    let is_final = k["x"]
        .as_bool()
        .ok_or_else(|| MarketError::Parse("missing field k.x".into()))?;

    let bar = if time_series {
        Bar::from_value(time, close)
    } else {
        Bar::new(time, open, high, low, close)
    };
    Ok((bar, VolumeBar::new(time, volume, buy_volume, quote_volume), is_final))
}

// =============================================================================
// Tests
// =============================================================================
