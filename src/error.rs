// =============================================================================
// Error Taxonomy
// =============================================================================
//
// Every failure in this core falls into one of a small set of categories, and
// none of them is fatal to the process:
//
//   - Fetch:          HTTP failure or non-2xx status on historical data. The
//                     facade recovers by serving an empty payload.
//   - Parse:          malformed historical or streaming payload. Logged, the
//                     offending message dropped; connections stay open.
//   - Storage:        durable mirror failure (including quota exhaustion).
//                     Triggers a local cache shrink and is swallowed.
//   - Connection:     abnormal WebSocket close. Drives the reconnect state
//                     machine, which gives up silently after its ceiling.
//   - SeriesMismatch: bar and volume series diverged during an explicit
//                     time join. Surfaced to the caller; never papered over
//                     with positional indexing.
// =============================================================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("historical fetch failed: {0}")]
    Fetch(String),

    #[error("failed to parse market payload: {0}")]
    Parse(String),

    #[error("durable store failure: {0}")]
    Storage(String),

    #[error("stream connection error: {0}")]
    Connection(String),

    #[error("bar and volume series diverge at time {time}")]
    SeriesMismatch { time: i64 },
}

impl From<reqwest::Error> for MarketError {
    fn from(err: reqwest::Error) -> Self {
        MarketError::Fetch(err.to_string())
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(err: serde_json::Error) -> Self {
        MarketError::Parse(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketError::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
