// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The layer is deliberately thin: parse
// the query, call `MarketDataService`, shape the JSON.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::indicators::IndicatorKind;
use crate::service::MarketDataService;
use crate::types::{Interval, KlineKey};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(service: Arc<MarketDataService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Health ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Klines & the live view ──────────────────────────────────
        .route("/api/v1/klines", get(klines))
        .route("/api/v1/view", post(switch_view))
        .route("/api/v1/snapshot", get(snapshot))
        // ── Indicators ──────────────────────────────────────────────
        .route("/api/v1/indicators", get(active_indicators))
        .route("/api/v1/indicators/:name/toggle", post(toggle_indicator))
        .route("/api/v1/indicators/value", get(indicator_value))
        // ── Ticker ──────────────────────────────────────────────────
        .route("/api/v1/ticker", get(ticker))
        // ── Cache ───────────────────────────────────────────────────
        .route("/api/v1/cache/stats", get(cache_stats))
        .route("/api/v1/cache", delete(clear_cache))
        // ── WebSocket (handled in the ws module but mounted here) ───
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(service)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
    view: Option<String>,
}

async fn health(State(service): State<Arc<MarketDataService>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
        view: service.current_view().map(|(key, _)| key.to_string()),
    };
    Json(resp)
}

// =============================================================================
// Klines & the live view
// =============================================================================

#[derive(Deserialize)]
struct KlineQuery {
    symbol: String,
    #[serde(default = "default_interval")]
    interval: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_limit() -> u32 {
    1000
}

fn parse_interval(raw: &str) -> Result<Interval, (StatusCode, Json<serde_json::Value>)> {
    raw.parse::<Interval>().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
    })
}

/// Cached-or-fetched history for any symbol/interval, independent of the view.
async fn klines(
    State(service): State<Arc<MarketDataService>>,
    Query(query): Query<KlineQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let interval = parse_interval(&query.interval)?;
    let key = KlineKey::new(query.symbol, interval);
    let payload = service.history(&key, query.limit).await;
    Ok(Json(payload))
}

/// Point the live view (Bar Store + stream) at a new symbol/interval and
/// return the loaded history.
async fn switch_view(
    State(service): State<Arc<MarketDataService>>,
    Query(query): Query<KlineQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let interval = parse_interval(&query.interval)?;
    let key = KlineKey::new(query.symbol, interval);
    let payload = service.switch_view(key, query.limit).await;
    Ok(Json(payload))
}

async fn snapshot(State(service): State<Arc<MarketDataService>>) -> impl IntoResponse {
    Json(service.snapshot())
}

// =============================================================================
// Indicators
// =============================================================================

async fn active_indicators(
    State(service): State<Arc<MarketDataService>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let series = service.active_indicator_series().map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
    })?;

    // `active` carries the display order; the series map is keyed by name.
    let active: Vec<&'static str> = series.iter().map(|(kind, _)| kind.as_str()).collect();
    let mut body = serde_json::Map::new();
    for (kind, output) in series {
        body.insert(
            kind.as_str().to_string(),
            serde_json::to_value(output).unwrap_or_default(),
        );
    }
    Ok(Json(serde_json::json!({ "active": active, "series": body })))
}

async fn toggle_indicator(
    State(service): State<Arc<MarketDataService>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let toggled = service.toggle_indicator(&name);
    let active: Vec<&'static str> = service
        .active_indicators()
        .iter()
        .map(|kind| kind.as_str())
        .collect();

    match toggled {
        Some((kind, enabled)) => Json(serde_json::json!({
            "indicator": kind.as_str(),
            "enabled": enabled,
            "active": active,
        })),
        // Unknown names leave the active set untouched.
        None => Json(serde_json::json!({
            "indicator": serde_json::Value::Null,
            "enabled": false,
            "active": active,
        })),
    }
}

#[derive(Deserialize)]
struct ValueQuery {
    kind: String,
    index: usize,
}

async fn indicator_value(
    State(service): State<Arc<MarketDataService>>,
    Query(query): Query<ValueQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let kind = IndicatorKind::parse(&query.kind).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("unknown indicator: '{}'", query.kind),
            })),
        )
    })?;
    let value = service.indicator_value_at(kind, query.index).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
    })?;
    Ok(Json(serde_json::json!({
        "kind": kind.as_str(),
        "index": query.index,
        "value": value,
    })))
}

// =============================================================================
// Ticker
// =============================================================================

#[derive(Deserialize)]
struct TickerQuery {
    symbol: String,
}

async fn ticker(
    State(service): State<Arc<MarketDataService>>,
    Query(query): Query<TickerQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    // Ticker fetches surface upstream failures; there is no empty fallback.
    let ticker = service.ticker_24h(&query.symbol).await.map_err(|e| {
        (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
    })?;
    Ok(Json(ticker))
}

// =============================================================================
// Cache
// =============================================================================

async fn cache_stats(State(service): State<Arc<MarketDataService>>) -> impl IntoResponse {
    Json(service.cache_stats())
}

async fn clear_cache(State(service): State<Arc<MarketDataService>>) -> impl IntoResponse {
    service.clear_cache();
    Json(serde_json::json!({ "cleared": true }))
}
