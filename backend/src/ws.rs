//! WebSocket transport: wires one [`Dispatcher`] session per connection onto
//! an `axum` websocket, following the split-sink/outbound-task shape the
//! teacher's `tower-http`-layered router already uses for its HTTP routes.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};

use crate::dispatcher::Dispatcher;
use crate::elevation::ElevationOracle;
use crate::graph_store::GraphStore;

#[derive(Clone)]
pub struct AppState {
    pub graphs_dir: PathBuf,
    pub oracle: Arc<dyn ElevationOracle>,
    pub pbf_path: Option<PathBuf>,
    pub min_component_length_m: f64,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new().route("/ws", get(ws_handler)).layer(cors).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One session for the lifetime of the connection. Every message is
/// dispatched against a fresh, session-owned [`Dispatcher`]; `GRAPHS_LIST`
/// is sent immediately on connect (spec.md §7).
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);

    let mut dispatcher = Dispatcher::new(
        GraphStore::new(state.graphs_dir.clone()),
        state.oracle.clone(),
        state.pbf_path.clone(),
        state.min_component_length_m,
    );

    let outbound = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode server message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    dispatcher.send_initial_graphs_list(&tx).await;

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => dispatcher.handle_text(&text, &tx).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    drop(tx);
    let _ = outbound.await;
}
