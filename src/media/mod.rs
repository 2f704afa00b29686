//! Media engine boundary
//!
//! The signaling server never touches media packets. Everything it needs from
//! the SFU is expressed by the [`MediaEngine`] trait: read router capabilities,
//! create/connect/close receive transports, and create/resume/close consumers.
//!
//! ```text
//! Browser <---- signaling (WebSocket) ----> SessionRegistry
//!    |                                           |
//!    |                                           v
//!    +<====== ICE/DTLS/SRTP (media) ====== MediaEngine <-- MediaSource
//! ```

pub mod local;
pub mod ortc;
pub mod types;

use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalMediaEngine;
pub use types::{
    ConsumerType, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    MediaKind, Protocol, RtcpFeedback, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpParameters, TransportState,
};

/// Errors reported by the media engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to create transport: {0}")]
    TransportCreation(String),

    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    #[error("Transport already connected: {0}")]
    AlreadyConnected(String),

    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    #[error("Cannot consume: {0}")]
    CannotConsume(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Options for a new receive transport
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Local interface the transport binds to
    pub listen_ip: IpAddr,
    /// Address advertised in ICE candidates instead of `listen_ip`
    pub announced_ip: Option<String>,
    /// Offer a TCP candidate instead of UDP
    pub prefer_tcp: bool,
}

/// Connection parameters of a freshly created transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub id: String,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// A producer registered with the engine, available for consumption
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSource {
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
}

/// Description of a consumer created on a transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub id: String,
    pub producer_id: String,
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(rename = "type")]
    pub consumer_type: ConsumerType,
    pub paused: bool,
    pub producer_paused: bool,
}

/// Control-plane interface of the SFU
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Capabilities of the router
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Register a media source
    async fn produce(&self, kind: MediaKind, rtp_parameters: RtpParameters)
        -> EngineResult<MediaSource>;

    /// Create a receive-capable WebRTC transport
    async fn create_webrtc_transport(&self, options: &TransportOptions)
        -> EngineResult<TransportInfo>;

    /// Apply the remote DTLS parameters to a transport
    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> EngineResult<()>;

    /// Bind `source` to a new consumer on `transport_id`
    async fn consume(
        &self,
        transport_id: &str,
        source: &MediaSource,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> EngineResult<ConsumerInfo>;

    async fn resume_consumer(&self, consumer_id: &str) -> EngineResult<()>;

    /// Close a consumer. Unknown ids are ignored.
    async fn close_consumer(&self, consumer_id: &str);

    /// Close a transport and every consumer on it. Unknown ids are ignored.
    async fn close_transport(&self, transport_id: &str);
}
