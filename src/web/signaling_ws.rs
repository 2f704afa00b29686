//! Signaling WebSocket
//!
//! One session per connection. Requests are handled one at a time in arrival
//! order; events of the connection's own session are pushed back as
//! notifications. The session is closed when the socket goes away.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::SystemEvent;
use crate::signaling::{dispatch_text, Notification, ResponseEnvelope};
use crate::state::AppState;

/// WebSocket upgrade handler for the signaling path
pub async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_signaling_socket(socket, state))
}

async fn handle_signaling_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let session_id = state.registry.open().await;
    let mut event_rx = state.events.subscribe();
    let mut shutdown_rx = state.shutdown_signal();

    info!("Signaling client connected: {}", session_id);

    let mut heartbeat_interval = tokio::time::interval(tokio::time::Duration::from_secs(30));

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response =
                            dispatch_text(&state.registry, &state.source, &session_id, &text).await;
                        if send_json(&mut sender, &response).await.is_err() {
                            warn!("Failed to send response to {}, disconnecting", session_id);
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let response = ResponseEnvelope::rejected(None, "binary frames are not supported");
                        if send_json(&mut sender, &response).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Signaling client disconnected: {}", session_id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Signaling receive error ({}): {}", session_id, e);
                        break;
                    }
                    _ => {}
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) if event.session_id() == Some(session_id.as_str()) => {
                        let Some(notification) = to_notification(&event) else {
                            continue;
                        };
                        if send_json(&mut sender, &notification).await.is_err() {
                            warn!("Failed to send notification to {}, disconnecting", session_id);
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Signaling connection {} lagged by {} events", session_id, n);
                    }
                    Err(_) => {
                        warn!("Event bus closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Failed to send ping to {}, disconnecting", session_id);
                    break;
                }
            }

            _ = shutdown_rx.recv() => {
                debug!("Shutdown, closing signaling connection {}", session_id);
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.registry.close(&session_id).await;
}

async fn send_json<S, T>(sender: &mut S, value: &T) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    T: serde::Serialize,
{
    match serde_json::to_string(value) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!("Failed to serialize signaling message: {}", e);
            Ok(())
        }
    }
}

/// Notification named after the event, carrying the event data
fn to_notification(event: &SystemEvent) -> Option<Notification> {
    let mut value = serde_json::to_value(event).ok()?;
    Some(Notification {
        kind: event.event_name().to_string(),
        data: value.get_mut("data").map(serde_json::Value::take).unwrap_or_default(),
    })
}
