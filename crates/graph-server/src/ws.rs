//! The WebSocket transport (SPEC_FULL.md §4.9.2): one `axum` upgrade route,
//! origin allow-list enforced before the upgrade completes, one task per
//! connection thereafter. Grounded on
//! `moire_web::main::api_snapshot_symbolication_ws`'s
//! `WebSocketUpgrade::on_upgrade` pattern.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, info, warn};

use crate::config::origin_allowed;
use crate::dispatch::{dispatch, Dispatcher};
use crate::state::AppState;

#[derive(Clone)]
struct WsState {
    dispatcher: Arc<Dispatcher>,
    app: AppState,
}

pub fn build_router(dispatcher: Arc<Dispatcher>, app: AppState) -> Router {
    Router::new().route("/", get(upgrade)).with_state(WsState { dispatcher, app })
}

async fn upgrade(State(state): State<WsState>, headers: HeaderMap, ws: WebSocketUpgrade) -> impl IntoResponse {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok()).map(|s| s.to_string());
    if !origin_allowed(state.app.config(), origin.as_deref()) {
        warn!(?origin, "rejected websocket upgrade: origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| connection_task(state, socket))
}

async fn connection_task(state: WsState, mut socket: WebSocket) {
    let max_bytes = state.app.config().max_message_bytes;
    info!("websocket connection opened");
    loop {
        let message = match socket.recv().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(%e, "websocket read error");
                break;
            }
            None => {
                debug!("websocket closed by peer");
                break;
            }
        };
        let payload = match message {
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Binary(bytes) => bytes.to_vec(),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if payload.len() > max_bytes {
            let error = malformed_response("message exceeds max-message-bytes");
            if socket.send(Message::Text(error.into())).await.is_err() {
                break;
            }
            continue;
        }

        let request = match graph_wire::decode(&payload) {
            Ok(value) => value,
            Err(e) => {
                let error = malformed_response(&e.to_string());
                if socket.send(Message::Text(error.into())).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let response = dispatch(&state.dispatcher, &state.app, &request).await;
        let encoded = graph_wire::encode(&response);
        let text = String::from_utf8_lossy(&encoded).into_owned();
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

fn malformed_response(message: &str) -> String {
    let response = graph_wire::Value::Map(vec![
        (graph_wire::Value::keyword("type"), graph_wire::Value::str("response")),
        (graph_wire::Value::keyword("ok?"), graph_wire::Value::Bool(false)),
        (graph_wire::Value::keyword("error-type"), graph_wire::Value::keyword("malformed")),
        (graph_wire::Value::keyword("message"), graph_wire::Value::Str(message.to_string())),
    ]);
    String::from_utf8_lossy(&graph_wire::encode(&response)).into_owned()
}
