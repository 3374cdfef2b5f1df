// =============================================================================
// Candleflow — Main Entry Point
// =============================================================================
//
// Market data backend for the chart renderer: REST history with a two-tier
// cache in front of it, a single live kline stream feeding the Bar Store,
// and an indicator engine over the stored series. The renderer talks to it
// over HTTP and one push WebSocket.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod cache;
mod config;
mod error;
mod indicators;
mod market_data;
mod service;
mod types;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::service::MarketDataService;
use crate::types::{Interval, KlineKey};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Candleflow Market Data Backend — Starting         ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = Config::load();
    info!(
        rest = %config.rest_endpoint,
        ws = %config.ws_endpoint,
        persist = config.persist_enabled,
        "Configuration loaded"
    );

    // ── 2. Build the service ─────────────────────────────────────────────
    let service = MarketDataService::new(&config);

    // ── 3. Bootstrap the default view ────────────────────────────────────
    let interval = config
        .default_interval
        .parse::<Interval>()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Invalid default interval — falling back to 1m");
            Interval::Min1
        });
    let key = KlineKey::new(config.default_symbol.clone(), interval);
    let payload = service.switch_view(key, config.default_limit).await;
    info!(
        symbol = %config.default_symbol,
        interval = %interval,
        bars = payload.bars.len(),
        "Default view loaded"
    );

    // ── 4. Start the API server ──────────────────────────────────────────
    let api_service = service.clone();
    let bind_addr = config.bind_addr.clone();
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_service);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    info!("Candleflow shut down complete.");
    Ok(())
}
