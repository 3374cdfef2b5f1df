// =============================================================================
// Core Data Model
// =============================================================================
//
// Shared types for the whole service: price bars, paired volume bars, the
// interval enumeration (including the synthetic "time" display mode), cache
// payloads, series keys, and the update notification pushed to the renderer.
//
// Wire shapes use camelCase field names; the renderer consumes them as-is.
// =============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MarketError;

// =============================================================================
// Bar
// =============================================================================

/// One interval's price record. `time` is the exchange bar open time
/// truncated to whole seconds.
///
/// In "time-series" display mode there is no OHLC: all four fields collapse
/// to the last trade price and `value()` is the reading that matters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Bar {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
        }
    }

    /// Collapsed single-value bar for time-series mode.
    pub fn from_value(time: i64, value: f64) -> Self {
        Self {
            time,
            open: value,
            high: value,
            low: value,
            close: value,
        }
    }

    /// Last trade price of the bar (the whole bar in time-series mode).
    pub fn value(&self) -> f64 {
        self.close
    }
}

// =============================================================================
// VolumeBar
// =============================================================================

/// Wire form of a volume bar. `sellVolume` appears on output for the
/// renderer but is ignored on input: it is always derived from the stored
/// fields, never trusted from a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeBarWire {
    time: i64,
    total: f64,
    buy_volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sell_volume: Option<f64>,
    quote_volume: f64,
}

/// Per-bar traded volume, keyed 1:1 by `time` with a [`Bar`].
///
/// The sell side is not stored; `sell_volume()` derives it from the total
/// and the taker-buy portion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "VolumeBarWire", into = "VolumeBarWire")]
pub struct VolumeBar {
    pub time: i64,
    pub total: f64,
    pub buy_volume: f64,
    pub quote_volume: f64,
}

impl VolumeBar {
    pub fn new(time: i64, total: f64, buy_volume: f64, quote_volume: f64) -> Self {
        Self {
            time,
            total,
            buy_volume,
            quote_volume,
        }
    }

    pub fn sell_volume(&self) -> f64 {
        self.total - self.buy_volume
    }
}

impl From<VolumeBarWire> for VolumeBar {
    fn from(wire: VolumeBarWire) -> Self {
        Self {
            time: wire.time,
            total: wire.total,
            buy_volume: wire.buy_volume,
            quote_volume: wire.quote_volume,
        }
    }
}

impl From<VolumeBar> for VolumeBarWire {
    fn from(v: VolumeBar) -> Self {
        Self {
            time: v.time,
            total: v.total,
            buy_volume: v.buy_volume,
            sell_volume: Some(v.sell_volume()),
            quote_volume: v.quote_volume,
        }
    }
}

// =============================================================================
// KlinePayload
// =============================================================================

/// A processed snapshot of one series: price bars, their paired volume bars,
/// and the display-mode flag. This is what the cache stores and the facade
/// hands out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlinePayload {
    pub bars: Vec<Bar>,
    pub volume_bars: Vec<VolumeBar>,
    pub is_time_series: bool,
}

impl KlinePayload {
    /// Well-formed empty payload, served when a fetch fails.
    pub fn empty(is_time_series: bool) -> Self {
        Self {
            bars: Vec::new(),
            volume_bars: Vec::new(),
            is_time_series,
        }
    }
}

// =============================================================================
// Interval
// =============================================================================

/// Supported chart intervals. `Time` is the synthetic no-OHLC display mode;
/// on the wire it maps to the finest real interval (1m).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    Time,
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
    Week1,
    Month1,
}

impl Interval {
    pub const ALL: [Interval; 10] = [
        Interval::Time,
        Interval::Min1,
        Interval::Min5,
        Interval::Min15,
        Interval::Min30,
        Interval::Hour1,
        Interval::Hour4,
        Interval::Day1,
        Interval::Week1,
        Interval::Month1,
    ];

    /// Logical name, as used in cache fingerprints and the renderer API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Time => "time",
            Interval::Min1 => "1m",
            Interval::Min5 => "5m",
            Interval::Min15 => "15m",
            Interval::Min30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1M",
        }
    }

    /// Exchange-facing interval name. The synthetic time mode rides on 1m.
    pub fn wire_str(&self) -> &'static str {
        match self {
            Interval::Time => "1m",
            other => other.as_str(),
        }
    }

    pub fn is_time_series(&self) -> bool {
        matches!(self, Interval::Time)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Interval {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(Interval::Time),
            "1m" => Ok(Interval::Min1),
            "5m" => Ok(Interval::Min5),
            "15m" => Ok(Interval::Min15),
            "30m" => Ok(Interval::Min30),
            "1h" => Ok(Interval::Hour1),
            "4h" => Ok(Interval::Hour4),
            "1d" => Ok(Interval::Day1),
            "1w" => Ok(Interval::Week1),
            "1M" => Ok(Interval::Month1),
            other => Err(MarketError::Parse(format!("unknown interval: {other}"))),
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = MarketError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Interval> for String {
    fn from(i: Interval) -> Self {
        i.as_str().to_string()
    }
}

// =============================================================================
// KlineKey
// =============================================================================

/// Identifies one (instrument, interval) series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KlineKey {
    pub symbol: String,
    pub interval: Interval,
}

impl KlineKey {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into().to_uppercase(),
            interval,
        }
    }

    /// Deterministic cache fingerprint. The logical interval is used, so a
    /// "time" payload never aliases the 1m payload it rides on.
    pub fn fingerprint(&self, limit: u32) -> String {
        format!("{}_{}_{}", self.symbol, self.interval, limit)
    }

    /// Exchange stream name for this series.
    pub fn stream_name(&self) -> String {
        format!(
            "{}@kline_{}",
            self.symbol.to_lowercase(),
            self.interval.wire_str()
        )
    }
}

impl fmt::Display for KlineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// =============================================================================
// MarketUpdate
// =============================================================================

/// Notification published to renderer listeners on every material change:
/// either a full immutable snapshot (historical load, view switch) or a
/// single-bar delta from the stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MarketUpdate {
    #[serde(rename_all = "camelCase")]
    Snapshot {
        symbol: String,
        interval: Interval,
        payload: KlinePayload,
    },
    #[serde(rename_all = "camelCase")]
    Delta {
        symbol: String,
        interval: Interval,
        bar: Bar,
        volume: VolumeBar,
        is_final: bool,
    },
}

// =============================================================================
// Ticker24h
// =============================================================================

/// Normalized 24-hour rolling statistics for one instrument.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub last_price: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub high_price: f64,
    pub low_price: f64,
}

// =============================================================================
// Tests
// =============================================================================
