use crate::feed_logic::config::Config;
use crate::feed_logic::model::{ClientMessage, KeySpec, ServerMessage};
use crate::feed_logic::state::AppState;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::StreamExt;
use lib_feed::{FeedValue, RemoteApi, ResourceKey};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub async fn run<P: RemoteApi>(
    config: Config,
    app_state: AppState<P>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/ws", get(ws_handler::<P>))
        .route("/health", get(health_handler::<P>))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port.unwrap_or(9003)));
    log::info!("Downstream server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await?;
    Ok(())
}

async fn ws_handler<P: RemoteApi>(ws: WebSocketUpgrade, State(state): State<AppState<P>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn health_handler<P: RemoteApi>(State(state): State<AppState<P>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, format!("OK {}", state.feed.status_label()))
}

async fn send(socket: &mut WebSocket, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json_str) => socket.send(Message::Text(json_str.into())).await.is_ok(),
        Err(e) => {
            log::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

fn to_keys(specs: Vec<KeySpec>) -> Vec<ResourceKey> {
    specs.iter().map(KeySpec::to_key).collect()
}

/// Applies one client request and returns the replies.
async fn handle_request<P: RemoteApi>(state: &AppState<P>, client_id: usize, request: ClientMessage) -> Vec<ServerMessage> {
    let mut replies = Vec::new();

    if let Some(specs) = request.subscribe {
        for (key, result) in state.subscribe(client_id, to_keys(specs)).await {
            replies.push(match result {
                Ok(label) => ServerMessage::ack(json!({
                    "subscribed": key.to_string(),
                    "status": label.to_string(),
                })),
                Err(e) => ServerMessage::error(format!("{}: {}", key, e)),
            });
        }
    }
    if let Some(specs) = request.unsubscribe {
        let keys = to_keys(specs);
        let names: Vec<String> = keys.iter().map(ResourceKey::to_string).collect();
        replies.push(match state.unsubscribe(client_id, keys).await {
            Ok(()) => ServerMessage::ack(json!({ "unsubscribed": names })),
            Err(e) => ServerMessage::error(e),
        });
    }
    if request.toggle == Some(true) {
        let enabled = state.feed.on_user_toggle();
        replies.push(ServerMessage::ack(json!({ "enabled": enabled })));
    }
    replies
}

async fn handle_socket<P: RemoteApi>(mut socket: WebSocket, state: AppState<P>) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let listener_id = format!("client-{}", client_id);
    state.add_client(client_id).await;
    log::info!("Client {} connected", client_id);

    let mut frames = state.feed.listen(&listener_id);
    let mut telemetry = state.feed.telemetry();

    loop {
        tokio::select! {
            // Handle incoming messages from the client
            incoming = socket.next() => {
                let Some(Ok(msg)) = incoming else {
                    // client disconnected
                    break;
                };
                match msg {
                    Message::Text(text) => {
                        let replies = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(request) => handle_request(&state, client_id, request).await,
                            Err(e) => vec![ServerMessage::error(format!("invalid request: {}", e))],
                        };
                        for reply in &replies {
                            if !send(&mut socket, reply).await {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            // Values pushed by the feed
            Some(frame) = frames.recv() => {
                let mut open = true;
                for (key, value) in state.route(client_id, &frame.values).await {
                    let msg = match &value {
                        FeedValue::Status(label) => ServerMessage::status(&key, label),
                        other => ServerMessage::value(&key, other),
                    };
                    if !send(&mut socket, &msg).await {
                        open = false;
                        break;
                    }
                }
                if !open {
                    break; // client disconnected
                }
            }
            Ok(snapshot) = telemetry.recv() => {
                if state.subscription_count(client_id).await > 0
                    && !send(&mut socket, &ServerMessage::telemetry(&snapshot)).await
                {
                    break;
                }
            }
        }
    }

    state.feed.remove_listener(&listener_id);
    state.remove_client(client_id).await;
    log::info!("Client {} disconnected", client_id);
}
