// =============================================================================
// KlineClient — historical bars and ticker stats over REST
// =============================================================================
//
// The provider returns klines as an array of fixed-position arrays with
// numeric fields encoded as strings:
//
//   [0] openTime(ms), [1] open, [2] high, [3] low, [4] close, [5] volume,
//   [6] closeTime(ms), [7] quoteAssetVolume, [8] numberOfTrades,
//   [9] takerBuyBaseVolume, [10] takerBuyQuoteVolume
//
// Normalization truncates open time to seconds and, for the synthetic
// time-series mode, collapses OHLC onto the close.
// =============================================================================

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{MarketError, Result};
use crate::types::{Bar, Interval, KlineKey, KlinePayload, Ticker24h, VolumeBar};

#[derive(Clone)]
pub struct KlineClient {
    base_url: String,
    client: reqwest::Client,
}

impl KlineClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// GET /api/v3/klines — fetch and normalize up to `limit` bars.
    #[instrument(skip(self), fields(key = %key), name = "kline::get_klines")]
    pub async fn get_klines(&self, key: &KlineKey, limit: u32) -> Result<KlinePayload> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            key.symbol,
            key.interval.wire_str(),
            limit
        );

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Fetch(format!("failed to read klines response: {e}")))?;

        if !status.is_success() {
            return Err(MarketError::Fetch(format!(
                "klines request returned {status}: {body}"
            )));
        }

        let raw = body
            .as_array()
            .ok_or_else(|| MarketError::Parse("klines response is not an array".into()))?;

        let payload = normalize_klines(raw, key.interval)?;
        debug!(count = payload.bars.len(), "klines fetched");
        Ok(payload)
    }

    /// GET /api/v3/ticker/24hr — rolling 24-hour statistics for one symbol.
    #[instrument(skip(self), name = "kline::get_ticker_24h")]
    pub async fn get_ticker_24h(&self, symbol: &str) -> Result<Ticker24h> {
        let url = format!(
            "{}/api/v3/ticker/24hr?symbol={}",
            self.base_url,
            symbol.to_uppercase()
        );

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Fetch(format!("failed to read ticker response: {e}")))?;

        if !status.is_success() {
            return Err(MarketError::Fetch(format!(
                "ticker request returned {status}: {body}"
            )));
        }

        Ok(Ticker24h {
            symbol: field_str(&body, "symbol")?.to_string(),
            price_change: field_f64(&body, "priceChange")?,
            price_change_percent: field_f64(&body, "priceChangePercent")?,
            last_price: field_f64(&body, "lastPrice")?,
            volume: field_f64(&body, "volume")?,
            quote_volume: field_f64(&body, "quoteVolume")?,
            high_price: field_f64(&body, "highPrice")?,
            low_price: field_f64(&body, "lowPrice")?,
        })
    }
}

impl std::fmt::Debug for KlineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlineClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Reshape the provider's array-of-arrays into a bar/volume payload.
/// Entries with too few elements are skipped with a warning; entries with
/// unparseable numerics fail the whole fetch.
fn normalize_klines(raw: &[Value], interval: Interval) -> Result<KlinePayload> {
    let is_time_series = interval.is_time_series();
    let mut bars = Vec::with_capacity(raw.len());
    let mut volume_bars = Vec::with_capacity(raw.len());

    for entry in raw {
        let arr = match entry.as_array() {
            Some(arr) if arr.len() >= 11 => arr,
            Some(arr) => {
                warn!(elements = arr.len(), "skipping malformed kline entry");
                continue;
            }
            None => {
                return Err(MarketError::Parse("kline entry is not an array".into()));
            }
        };

        let time = arr[0]
            .as_i64()
            .ok_or_else(|| MarketError::Parse("kline open time is not an integer".into()))?
            / 1000;

        let open = parse_str_f64(&arr[1], "open")?;
        let high = parse_str_f64(&arr[2], "high")?;
        let low = parse_str_f64(&arr[3], "low")?;
        let close = parse_str_f64(&arr[4], "close")?;
        let volume = parse_str_f64(&arr[5], "volume")?;
        let quote_volume = parse_str_f64(&arr[7], "quoteVolume")?;
        let buy_volume = parse_str_f64(&arr[9], "takerBuyVolume")?;

        let bar = if is_time_series {
            Bar::from_value(time, close)
        } else {
            Bar::new(time, open, high, low, close)
        };
        bars.push(bar);
        volume_bars.push(VolumeBar::new(time, volume, buy_volume, quote_volume));
    }

    Ok(KlinePayload {
        bars,
        volume_bars,
        is_time_series,
    })
}

/// Numeric fields arrive as JSON strings; tolerate plain numbers too.
pub(crate) fn parse_str_f64(val: &Value, name: &str) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .map_err(|_| MarketError::Parse(format!("failed to parse {name} as f64: {s}")))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        Err(MarketError::Parse(format!(
            "field {name} has unexpected JSON type: {val}"
        )))
    }
}

fn field_str<'a>(body: &'a Value, name: &str) -> Result<&'a str> {
    body[name]
        .as_str()
        .ok_or_else(|| MarketError::Parse(format!("ticker response missing field {name}")))
}

fn field_f64(body: &Value, name: &str) -> Result<f64> {
    parse_str_f64(&body[name], name)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn kline_entry(open_time_ms: i64, close: &str) -> Value {
        serde_json::json!([
            open_time_ms,
            "37000.00",
            "37050.00",
            "36990.00",
            close,
            "123.456",
            open_time_ms + 59_999,
            "4567890.12",
            1500,
            "60.123",
            "2224455.66",
            "0"
        ])
    }

    #[test]
    fn normalize_truncates_time_to_seconds() {
        let raw = vec![kline_entry(1_700_000_000_000, "37020.00")];
        let payload = normalize_klines(&raw, Interval::Min1).unwrap();
        assert_eq!(payload.bars.len(), 1);
        assert_eq!(payload.bars[0].time, 1_700_000_000);
        assert!((payload.bars[0].close - 37020.0).abs() < 1e-9);
        assert!(!payload.is_time_series);
    }

    #[test]
    fn normalize_pairs_volume_with_each_bar() {
        let raw = vec![
            kline_entry(1_700_000_000_000, "37020.00"),
            kline_entry(1_700_000_060_000, "37030.00"),
        ];
        let payload = normalize_klines(&raw, Interval::Min1).unwrap();
        assert_eq!(payload.volume_bars.len(), 2);
        let v = &payload.volume_bars[0];
        assert_eq!(v.time, payload.bars[0].time);
        assert!((v.total - 123.456).abs() < 1e-9);
        assert!((v.buy_volume - 60.123).abs() < 1e-9);
        assert!((v.quote_volume - 4_567_890.12).abs() < 1e-6);
    }

    #[test]
    fn time_series_mode_collapses_ohlc_onto_close() {
        let raw = vec![kline_entry(1_700_000_000_000, "37020.00")];
        let payload = normalize_klines(&raw, Interval::Time).unwrap();
        assert!(payload.is_time_series);
        let bar = &payload.bars[0];
        assert_eq!(bar.open, bar.close);
        assert_eq!(bar.high, bar.close);
        assert_eq!(bar.low, bar.close);
        assert!((bar.value() - 37020.0).abs() < 1e-9);
    }

    #[test]
    fn short_entries_are_skipped_not_fatal() {
        let raw = vec![
            serde_json::json!([1_700_000_000_000i64, "1.0"]),
            kline_entry(1_700_000_060_000, "37030.00"),
        ];
        let payload = normalize_klines(&raw, Interval::Min1).unwrap();
        assert_eq!(payload.bars.len(), 1);
        assert_eq!(payload.bars[0].time, 1_700_000_060);
    }

    #[test]
    fn garbage_numerics_fail_the_fetch() {
        let mut entry = kline_entry(1_700_000_000_000, "37020.00");
        entry[4] = Value::String("not-a-price".into());
        let err = normalize_klines(&[entry], Interval::Min1).unwrap_err();
        assert!(matches!(err, MarketError::Parse(_)));
    }

    #[test]
    fn plain_numbers_are_tolerated() {
        let mut entry = kline_entry(1_700_000_000_000, "37020.00");
        entry[4] = serde_json::json!(37020.5);
        let payload = normalize_klines(&[entry], Interval::Min1).unwrap();
        assert!((payload.bars[0].close - 37020.5).abs() < 1e-9);
    }
}
