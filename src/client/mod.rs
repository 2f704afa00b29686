//! Receiving client
//!
//! [`SignalingClient`] speaks the signaling protocol over a WebSocket and
//! [`Orchestrator`] drives the negotiation on top of it. The WebRTC stack and
//! the playback element are supplied by the embedder through the traits in
//! [`device`].

pub mod channel;
pub mod device;
mod error;
pub mod orchestrator;

pub use channel::{ClientOptions, SignalingChannel, SignalingClient};
pub use device::{MediaDevice, MediaTrack, Playback, RecvTransport, TransportEvent};
pub use error::{ClientError, ClientResult};
pub use orchestrator::{NegotiationState, Orchestrator, OrchestratorOptions};
