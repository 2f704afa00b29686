//! Collaborators of the orchestrator that live outside this crate: the
//! WebRTC media-client library (device and receive transport) and the
//! playback element.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::error::ClientResult;
use crate::media::{DtlsParameters, MediaKind, RtpCapabilities, TransportInfo, TransportState};
use crate::signaling::ConsumeResponse;

/// Events raised by a local receive transport
#[derive(Debug)]
pub enum TransportEvent {
    /// Local setup needs the server to apply `dtls_parameters`.
    /// Raised once; `reply` completes the local handshake step.
    Connect {
        dtls_parameters: DtlsParameters,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    ConnectionStateChange(TransportState),
}

/// Track produced by a local consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: MediaKind,
}

#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Load the router capabilities; must precede everything else
    async fn load(&self, router_rtp_capabilities: RtpCapabilities) -> ClientResult<()>;

    /// Receive capabilities of the loaded device
    fn rtp_capabilities(&self) -> ClientResult<RtpCapabilities>;

    async fn create_recv_transport(&self, params: TransportInfo)
        -> ClientResult<Arc<dyn RecvTransport>>;
}

#[async_trait]
pub trait RecvTransport: Send + Sync {
    fn id(&self) -> &str;

    /// Event stream of this transport. Can be taken once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Build a local consumer from the server's consume reply
    async fn consume(&self, params: &ConsumeResponse) -> ClientResult<MediaTrack>;

    async fn close(&self);
}

/// The element that renders the received stream
pub trait Playback: Send + Sync {
    fn set_status(&self, status: &str);

    /// Bind the element to the accumulated stream
    fn attach(&self);

    fn add_track(&self, track: MediaTrack);
}
