//! Client-side negotiation state machine
//!
//! ```text
//! Init -> CapabilitiesLoaded -> TransportProvisioned -> Consuming -> Playing
//!   \______________________________\_______________________\______-> Failed
//! ```
//!
//! `Playing` joins two independent events: the local transport reporting
//! `connected` and the local consumer being ready. They may arrive in either
//! order. The `resume` request is sent once, by whichever side completes the
//! join. `Failed` is terminal.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::SignalingChannel;
use super::device::{MediaDevice, Playback, RecvTransport, TransportEvent};
use super::error::{ClientError, ClientResult};
use crate::media::{RtpCapabilities, TransportInfo, TransportState};
use crate::signaling::{methods, ConsumeResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    Init,
    CapabilitiesLoaded,
    TransportProvisioned,
    Consuming,
    Playing,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Playing | Self::Failed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::CapabilitiesLoaded => "capabilities-loaded",
            Self::TransportProvisioned => "transport-provisioned",
            Self::Consuming => "consuming",
            Self::Playing => "playing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Ask the server for a TCP candidate
    pub force_tcp: bool,
}

struct Progress {
    state: NegotiationState,
    transport_connected: bool,
    consumer_ready: bool,
    /// Set by whoever completes the join, so `resume` goes out once
    joined: bool,
    error: Option<ClientError>,
}

struct Inner {
    channel: Arc<dyn SignalingChannel>,
    playback: Arc<dyn Playback>,
    progress: Mutex<Progress>,
    state_tx: watch::Sender<NegotiationState>,
}

impl Inner {
    fn state(&self) -> NegotiationState {
        self.progress.lock().state
    }

    /// Move forward; never out of a terminal state. Returns whether it moved.
    fn advance(&self, to: NegotiationState) -> bool {
        let mut progress = self.progress.lock();
        self.advance_locked(&mut progress, to)
    }

    fn advance_locked(&self, progress: &mut Progress, to: NegotiationState) -> bool {
        if progress.state.is_terminal() || to <= progress.state {
            return false;
        }
        debug!("Negotiation: {} -> {}", progress.state, to);
        progress.state = to;
        self.state_tx.send_replace(to);
        true
    }

    // Terminal status updates happen under the progress lock.
    fn fail(&self, error: ClientError) {
        let mut progress = self.progress.lock();
        if progress.state == NegotiationState::Failed {
            return;
        }
        warn!("Negotiation failed in {}: {}", progress.state, error);
        progress.state = NegotiationState::Failed;
        progress.error = Some(error);
        self.state_tx.send_replace(NegotiationState::Failed);
        self.playback.set_status("failed");
    }

    fn ensure_active(&self) -> ClientResult<()> {
        let progress = self.progress.lock();
        if progress.state == NegotiationState::Failed {
            return Err(progress
                .error
                .clone()
                .unwrap_or(ClientError::TransportFailed));
        }
        Ok(())
    }

    /// Record one half of the join; true if this call completed it
    fn mark(&self, update: impl FnOnce(&mut Progress)) -> bool {
        let mut progress = self.progress.lock();
        if progress.state == NegotiationState::Failed {
            return false;
        }
        update(&mut progress);
        if progress.transport_connected && progress.consumer_ready && !progress.joined {
            progress.joined = true;
            return true;
        }
        false
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, data: Value) -> ClientResult<T> {
        let data = self
            .channel
            .request(method, data)
            .await?
            .ok_or_else(|| ClientError::InvalidResponse(format!("empty {} reply", method)))?;
        Ok(serde_json::from_value(data)?)
    }

    /// Both halves are in: let media flow
    async fn start_playing(&self) {
        match self.channel.request(methods::RESUME, json!({})).await {
            Ok(_) => {
                let mut progress = self.progress.lock();
                if self.advance_locked(&mut progress, NegotiationState::Playing) {
                    self.playback.set_status("playing");
                    info!("Negotiation complete, playing");
                } else {
                    debug!("resume acknowledged in {}, not playing", progress.state);
                }
            }
            Err(e) => self.fail(e),
        }
    }
}

/// Drives one negotiation against the signaling server
pub struct Orchestrator {
    inner: Arc<Inner>,
    device: Arc<dyn MediaDevice>,
    options: OrchestratorOptions,
    transport: Mutex<Option<Arc<dyn RecvTransport>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        channel: Arc<dyn SignalingChannel>,
        device: Arc<dyn MediaDevice>,
        playback: Arc<dyn Playback>,
        options: OrchestratorOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(NegotiationState::Init);
        Self {
            inner: Arc::new(Inner {
                channel,
                playback,
                progress: Mutex::new(Progress {
                    state: NegotiationState::Init,
                    transport_connected: false,
                    consumer_ready: false,
                    joined: false,
                    error: None,
                }),
                state_tx,
            }),
            device,
            options,
            transport: Mutex::new(None),
            event_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.inner.state()
    }

    /// Why the negotiation failed, once it has
    pub fn error(&self) -> Option<ClientError> {
        self.inner.progress.lock().error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationState> {
        self.inner.state_tx.subscribe()
    }

    /// Wait until the negotiation is `Playing` or `Failed`
    pub async fn wait_settled(&self) -> NegotiationState {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        settled.unwrap_or_else(|_| self.state())
    }

    /// Run the request sequence up to a ready consumer.
    ///
    /// Returns once the consumer is bound locally; `Playing` follows when the
    /// transport reports `connected` (possibly already).
    pub async fn run(&self) -> ClientResult<()> {
        match self.negotiate().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.fail(e.clone());
                Err(e)
            }
        }
    }

    async fn negotiate(&self) -> ClientResult<()> {
        let inner = &self.inner;

        let router_caps: RtpCapabilities = inner
            .request(methods::GET_ROUTER_RTP_CAPABILITIES, json!({}))
            .await?;
        self.device.load(router_caps).await?;
        inner.ensure_active()?;
        inner.advance(NegotiationState::CapabilitiesLoaded);

        let reply: Value = inner
            .request(
                methods::CREATE_CONSUMER_TRANSPORT,
                json!({ "forceTcp": self.options.force_tcp }),
            )
            .await?;
        if let Some(error) = reply.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ClientError::Provisioning(message));
        }
        let params: TransportInfo = serde_json::from_value(reply)?;
        let transport = self.device.create_recv_transport(params).await?;
        let events = transport
            .take_events()
            .ok_or_else(|| ClientError::Device("transport events already taken".to_string()))?;

        let task = tokio::spawn(handle_transport_events(
            inner.clone(),
            transport.clone(),
            events,
        ));
        *self.event_task.lock() = Some(task);
        *self.transport.lock() = Some(transport.clone());

        inner.ensure_active()?;
        inner.advance(NegotiationState::TransportProvisioned);

        info!("Transport {} provisioned, consuming", transport.id());
        inner.advance(NegotiationState::Consuming);

        let rtp_capabilities = self.device.rtp_capabilities()?;
        let consume: ConsumeResponse = inner
            .request(
                methods::CONSUME,
                json!({ "rtpCapabilities": rtp_capabilities }),
            )
            .await?;
        let track = transport.consume(&consume).await?;
        inner.ensure_active()?;
        inner.playback.add_track(track);

        if inner.mark(|p| p.consumer_ready = true) {
            inner.start_playing().await;
        }
        inner.ensure_active()
    }

    /// Stop reacting to transport events and close the local transport
    pub async fn close(&self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}

async fn handle_transport_events(
    inner: Arc<Inner>,
    transport: Arc<dyn RecvTransport>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connect {
                dtls_parameters,
                reply,
            } => {
                if let Err(e) = inner.ensure_active() {
                    let _ = reply.send(Err(e));
                    continue;
                }
                let data = json!({
                    "transportId": transport.id(),
                    "dtlsParameters": dtls_parameters,
                });
                let result = inner
                    .channel
                    .request(methods::CONNECT_CONSUMER_TRANSPORT, data)
                    .await
                    .map(|_| ());
                if let Err(e) = &result {
                    warn!("connectConsumerTransport failed: {}", e);
                }
                let _ = reply.send(result);
            }
            TransportEvent::ConnectionStateChange(state) => {
                if inner.ensure_active().is_err() {
                    continue;
                }
                debug!("Transport {} state: {}", transport.id(), state);
                match state {
                    TransportState::Connecting => inner.playback.set_status("subscribing..."),
                    TransportState::Connected => {
                        inner.playback.set_status("connected");
                        inner.playback.attach();
                        if inner.mark(|p| p.transport_connected = true) {
                            inner.start_playing().await;
                        }
                    }
                    TransportState::Failed => {
                        transport.close().await;
                        inner.fail(ClientError::TransportFailed);
                    }
                    TransportState::New | TransportState::Closed => {}
                }
            }
        }
    }
}
