//! Signaling protocol and request dispatch
//!
//! Requests are plain JSON envelopes over a WebSocket; see [`protocol`] for
//! the wire format and [`dispatch`] for how they reach the session registry.

pub mod dispatch;
pub mod protocol;

pub use dispatch::{dispatch, dispatch_text};
pub use protocol::{
    methods, ConnectTransportRequest, ConsumeRequest, ConsumeResponse, CreateTransportRequest,
    Notification, ProvisioningError, RequestEnvelope, ResponseEnvelope, ServerMessage,
};
