//! Client half of the signaling channel
//!
//! Requests are numbered from 1 and correlated with responses by id only.
//! A reader task routes responses to waiting callers and forwards
//! notifications; a writer task owns the socket sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{ClientError, ClientResult};
use crate::signaling::{Notification, RequestEnvelope, ResponseEnvelope, ServerMessage};

/// Something that can carry signaling requests
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send a request and wait for its response data (`None` for an ack)
    async fn request(&self, method: &str, data: Value) -> ClientResult<Option<Value>>;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long a request waits for its response
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<ResponseEnvelope>>,
}

/// WebSocket signaling client
pub struct SignalingClient {
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<String>,
    pending: Arc<Mutex<Pending>>,
    notifications: broadcast::Sender<Notification>,
    cancel: CancellationToken,
    options: ClientOptions,
}

impl SignalingClient {
    /// Connect to a signaling endpoint such as `ws://127.0.0.1:8080/server`
    pub async fn connect(url: &str, options: ClientOptions) -> ClientResult<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Signaling(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        info!("Signaling channel connected to {}", url);

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let pending = Arc::new(Mutex::new(Pending::default()));
        let (notifications, _) = broadcast::channel(64);
        let cancel = CancellationToken::new();

        // Writer
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    frame = outgoing_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            warn!("Signaling send failed: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        // Reader
        let reader_cancel = cancel.clone();
        let reader_pending = pending.clone();
        let reader_notifications = notifications.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                route_frame(&text, &reader_pending, &reader_notifications);
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Signaling channel closed by server");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("Signaling receive error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }

            // Dropping the senders wakes every waiter with ChannelClosed
            let mut pending = reader_pending.lock();
            pending.closed = true;
            pending.waiters.clear();
            reader_cancel.cancel();
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            outgoing,
            pending,
            notifications,
            cancel,
            options,
        })
    }

    /// Server-pushed notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Send a request that can be abandoned through `cancel`
    pub async fn request_with_cancel(
        &self,
        method: &str,
        data: Value,
        cancel: &CancellationToken,
    ) -> ClientResult<Option<Value>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(ClientError::ChannelClosed);
            }
            pending.waiters.insert(id, tx);
        }

        let frame = serde_json::to_string(&RequestEnvelope::new(id, method, data))
            .map_err(|e| ClientError::Signaling(e.to_string()))?;
        if self.outgoing.send(frame).is_err() {
            self.pending.lock().waiters.remove(&id);
            return Err(ClientError::ChannelClosed);
        }
        debug!("Signaling request {} sent: {}", id, method);

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            response = tokio::time::timeout(self.options.request_timeout, rx) => match response {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(ClientError::ChannelClosed),
                Err(_) => Err(ClientError::Timeout(method.to_string())),
            },
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.pending.lock().waiters.remove(&id);
                return Err(e);
            }
        };

        match response.error {
            Some(error) => Err(ClientError::Rejected(error)),
            None => Ok(response.data),
        }
    }

    /// Close the socket; pending requests fail with `ChannelClosed`
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl SignalingChannel for SignalingClient {
    async fn request(&self, method: &str, data: Value) -> ClientResult<Option<Value>> {
        let never = CancellationToken::new();
        self.request_with_cancel(method, data, &never).await
    }
}

fn route_frame(
    text: &str,
    pending: &Mutex<Pending>,
    notifications: &broadcast::Sender<Notification>,
) {
    match ServerMessage::parse(text) {
        Ok(ServerMessage::Response(response)) => {
            let Some(id) = response.id else {
                warn!("Server error without request id: {:?}", response.error);
                return;
            };
            match pending.lock().waiters.remove(&id) {
                Some(waiter) => {
                    let _ = waiter.send(response);
                }
                None => debug!("Response for unknown or abandoned request {}", id),
            }
        }
        Ok(ServerMessage::Notification(notification)) => {
            let _ = notifications.send(notification);
        }
        Err(e) => warn!("Invalid signaling frame: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// One-connection server driven by `reply`; `None` swallows the request
    async fn spawn_server<F>(reply: F) -> String
    where
        F: Fn(RequestEnvelope) -> Option<String> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let req: RequestEnvelope = serde_json::from_str(&text).unwrap();
                    if req.method == "hangup" {
                        let _ = ws.close(None).await;
                        break;
                    }
                    if let Some(out) = reply(req) {
                        ws.send(Message::Text(out)).await.unwrap();
                    }
                }
            }
        });
        format!("ws://{}", addr)
    }

    fn options(ms: u64) -> ClientOptions {
        ClientOptions {
            request_timeout: Duration::from_millis(ms),
        }
    }

    #[tokio::test]
    async fn test_request_response() {
        let url = spawn_server(|req| {
            let resp = match req.method.as_str() {
                "echo" => ResponseEnvelope::ok(req.id, req.data),
                "ack" => ResponseEnvelope::ack(req.id),
                _ => ResponseEnvelope::rejected(req.id, "unknown request type"),
            };
            Some(serde_json::to_string(&resp).unwrap())
        })
        .await;
        let client = SignalingClient::connect(&url, options(2000)).await.unwrap();

        let data = client.request("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(data, Some(json!({"x": 1})));
        assert_eq!(client.request("ack", json!({})).await.unwrap(), None);
        assert_eq!(
            client.request("nope", json!({})).await.unwrap_err(),
            ClientError::Rejected("unknown request type".to_string())
        );
    }

    #[tokio::test]
    async fn test_notifications_are_forwarded() {
        let url = spawn_server(|req| {
            Some(
                json!({"type": "transport.connecting", "data": {"n": req.id}}).to_string(),
            )
        })
        .await;
        let client = SignalingClient::connect(&url, options(200)).await.unwrap();
        let mut rx = client.subscribe();

        // The server answers with a notification only, so the request times out
        let err = client.request("poke", json!({})).await.unwrap_err();
        assert_eq!(err, ClientError::Timeout("poke".to_string()));

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.kind, "transport.connecting");
        assert_eq!(notification.data["n"], 1);
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_ignored() {
        let url = spawn_server(|_| None).await;
        let client = SignalingClient::connect(&url, options(100)).await.unwrap();

        let err = client.request("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
        assert!(client.pending.lock().waiters.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation() {
        let url = spawn_server(|_| None).await;
        let client = SignalingClient::connect(&url, options(5000)).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = client
            .request_with_cancel("slow", json!({}), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Cancelled);
    }

    #[tokio::test]
    async fn test_server_close_fails_pending() {
        let url = spawn_server(|_| None).await;
        let client = Arc::new(SignalingClient::connect(&url, options(5000)).await.unwrap());

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.request("slow", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = client.request("hangup", json!({})).await;

        assert_eq!(waiting.await.unwrap().unwrap_err(), ClientError::ChannelClosed);
        assert!(client.is_closed());
        assert_eq!(
            client.request("after", json!({})).await.unwrap_err(),
            ClientError::ChannelClosed
        );
    }
}
