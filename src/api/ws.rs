// =============================================================================
// WebSocket Handler — Push-based market updates
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate full snapshot of the current view on connect (if a view
//      is active).
//   2. Every update the service publishes afterwards, as JSON: full snapshots
//      for view switches and out-of-order rewrites, single-bar deltas for
//      everything else.
//
// The handler registers an update listener on the service and forwards its
// output through an unbounded channel, so a slow socket never blocks the
// publishing thread. It also:
//   - Responds to Ping frames with Pong frames.
//   - Treats inbound text as a heartbeat and otherwise ignores it.
//   - Unsubscribes the listener on disconnect.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::service::MarketDataService;
use crate::types::MarketUpdate;

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(service): State<Arc<MarketDataService>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, service))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// Runs two concurrent tasks via `tokio::select!`:
///   1. **Push loop** — forward every update published by the service.
///   2. **Recv loop** — process incoming client messages (Ping/Pong, Close,
///      heartbeat text messages).
async fn handle_ws_connection(socket: WebSocket, service: Arc<MarketDataService>) {
    let (mut sender, mut receiver) = socket.split();
    use futures_util::{SinkExt, StreamExt};

    // Register the listener before the initial snapshot goes out; updates
    // published while it is in flight queue up behind it in order.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let listener = service.subscribe_updates(Arc::new(move |update| {
        match serde_json::to_string(update) {
            Ok(json) => {
                // The receiver half is gone once the client disconnects.
                let _ = tx.send(json);
            }
            Err(e) => debug!(error = %e, "failed to serialize market update"),
        }
    }));

    // Send the initial full snapshot immediately, if a view is active yet.
    if let Some(update) = service.snapshot_update() {
        if let Err(e) = send_update(&mut sender, &update).await {
            warn!(error = %e, "Failed to send initial WebSocket snapshot");
            service.unsubscribe_updates(listener);
            return;
        }
    }

    loop {
        tokio::select! {
            // ── Push loop: forward published updates ────────────────────
            update = rx.recv() => {
                match update {
                    Some(json) => {
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    None => break,
                }
            }

            // ── Recv loop: process incoming messages ────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        // Treat any text message as a heartbeat.
                        debug!(msg = %text, "WebSocket text message received (heartbeat)");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!("WebSocket Ping received — sending Pong");
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Pong received — no action needed.
                        debug!("WebSocket Pong received");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket Close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        // Ignore binary messages.
                        debug!("WebSocket binary message ignored");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended (None)");
                        break;
                    }
                }
            }
        }
    }

    service.unsubscribe_updates(listener);
    info!("WebSocket connection closed — cleanup complete");
}

// =============================================================================
// Helpers
// =============================================================================

/// Serialize and send one market update over the WebSocket.
async fn send_update<S>(sender: &mut S, update: &MarketUpdate) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    use futures_util::SinkExt;

    match serde_json::to_string(update) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "Failed to serialize market update");
            // Serialisation errors are not network errors; don't disconnect.
            Ok(())
        }
    }
}
