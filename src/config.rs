// =============================================================================
// Service Configuration
// =============================================================================
//
// All settings come from `CANDLEFLOW_*` environment variables (a `.env` file
// is honoured via dotenv in main). Every field has a hard default: a missing
// or malformed variable falls back rather than aborting, so the binary always
// starts with a usable configuration.
// =============================================================================

use std::env;
use std::time::Duration;

/// Runtime configuration for the whole service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the exchange REST API.
    pub rest_endpoint: String,
    /// Base URL of the exchange WebSocket streams.
    pub ws_endpoint: String,
    /// Bind address for the renderer-facing API server.
    pub bind_addr: String,

    /// Cache entry time-to-live.
    pub cache_ttl: Duration,
    /// Maximum number of in-memory cache entries.
    pub cache_max_entries: usize,
    /// Directory for the durable cache mirror.
    pub storage_dir: String,
    /// Set to false to run without a durable mirror.
    pub persist_enabled: bool,

    /// Base delay for linear reconnect backoff.
    pub reconnect_base_delay: Duration,
    /// Reconnect attempt ceiling; beyond it the stream stays down.
    pub max_reconnect_attempts: u32,

    /// Maximum bars retained per live series.
    pub max_bars: usize,

    /// Instrument shown before the renderer picks one.
    pub default_symbol: String,
    /// Interval shown before the renderer picks one.
    pub default_interval: String,
    /// Historical depth requested per fetch.
    pub default_limit: u32,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn load() -> Self {
        Self {
            rest_endpoint: env_or("CANDLEFLOW_REST_ENDPOINT", "https://api.binance.com"),
            ws_endpoint: env_or("CANDLEFLOW_WS_ENDPOINT", "wss://stream.binance.com:9443/ws"),
            bind_addr: env_or("CANDLEFLOW_BIND_ADDR", "0.0.0.0:3001"),
            cache_ttl: Duration::from_secs(env_parse_or("CANDLEFLOW_CACHE_TTL_SECS", 300)),
            cache_max_entries: env_parse_or("CANDLEFLOW_CACHE_MAX_ENTRIES", 50),
            storage_dir: env_or("CANDLEFLOW_STORAGE_DIR", "kline_cache"),
            persist_enabled: env_parse_or("CANDLEFLOW_PERSIST", true),
            reconnect_base_delay: Duration::from_millis(env_parse_or(
                "CANDLEFLOW_RECONNECT_BASE_DELAY_MS",
                3000,
            )),
            max_reconnect_attempts: env_parse_or("CANDLEFLOW_MAX_RECONNECT_ATTEMPTS", 5),
            max_bars: env_parse_or("CANDLEFLOW_MAX_BARS", 1000),
            default_symbol: env_or("CANDLEFLOW_DEFAULT_SYMBOL", "BTCUSDT").to_uppercase(),
            default_interval: env_or("CANDLEFLOW_DEFAULT_INTERVAL", "1m"),
            default_limit: env_parse_or("CANDLEFLOW_DEFAULT_LIMIT", 1000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // Defaults are defined once: an empty environment yields them.
        Self {
            rest_endpoint: "https://api.binance.com".to_string(),
            ws_endpoint: "wss://stream.binance.com:9443/ws".to_string(),
            bind_addr: "0.0.0.0:3001".to_string(),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 50,
            storage_dir: "kline_cache".to_string(),
            persist_enabled: true,
            reconnect_base_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
            max_bars: 1000,
            default_symbol: "BTCUSDT".to_string(),
            default_interval: "1m".to_string(),
            default_limit: 1000,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Tests
// =============================================================================
