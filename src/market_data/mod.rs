pub mod bar_store;
pub mod fetch;
pub mod stream;

// Re-export the working set (e.g. `use crate::market_data::BarStore`).
pub use bar_store::{BarStore, UpsertOutcome};
pub use fetch::KlineClient;
pub use stream::{BarCallback, StreamManager, StreamStats};
