//! Wire format of the signaling channel
//!
//! Every WebSocket text frame carries one JSON envelope:
//!
//! ```text
//! request       {"id": 7, "type": "consume", "data": {...}}
//! response      {"id": 7, "data": {...}}        (ack: data omitted)
//! rejection     {"id": 7, "error": "..."}
//! notification  {"type": "transport.connecting", "data": {...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media::{
    ConsumerInfo, ConsumerType, DtlsParameters, MediaKind, RtpCapabilities, RtpParameters,
};

/// Request type names
pub mod methods {
    pub const GET_ROUTER_RTP_CAPABILITIES: &str = "getRouterRtpCapabilities";
    pub const CREATE_CONSUMER_TRANSPORT: &str = "createConsumerTransport";
    pub const CONNECT_CONSUMER_TRANSPORT: &str = "connectConsumerTransport";
    pub const CONSUME: &str = "consume";
    pub const RESUME: &str = "resume";
}

/// Client request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

impl RequestEnvelope {
    pub fn new(id: u64, method: impl Into<String>, data: Value) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            data,
        }
    }
}

/// Server reply to a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(id: Option<u64>, data: Value) -> Self {
        Self {
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn ack(id: Option<u64>) -> Self {
        Self {
            id,
            data: None,
            error: None,
        }
    }

    pub fn rejected(id: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            id,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.error.is_some()
    }
}

/// Server push without a request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Any frame the client can receive
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Response(ResponseEnvelope),
    Notification(Notification),
}

impl ServerMessage {
    /// Classify a text frame: anything with an `id` is a response.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("id").is_some_and(|id| !id.is_null()) || value.get("type").is_none() {
            Ok(Self::Response(serde_json::from_value(value)?))
        } else {
            Ok(Self::Notification(serde_json::from_value(value)?))
        }
    }
}

// ============================================================================
// Request / response payloads
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    #[serde(default)]
    pub force_tcp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub rtp_capabilities: RtpCapabilities,
}

/// Reply to `consume`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub producer_id: String,
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(rename = "type")]
    pub consumer_type: ConsumerType,
    pub producer_paused: bool,
}

impl From<ConsumerInfo> for ConsumeResponse {
    fn from(consumer: ConsumerInfo) -> Self {
        Self {
            producer_id: consumer.producer_id,
            id: consumer.id,
            kind: consumer.kind,
            rtp_parameters: consumer.rtp_parameters,
            consumer_type: consumer.consumer_type,
            producer_paused: consumer.producer_paused,
        }
    }
}

/// Data of a `createConsumerTransport` reply when the engine failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningError {
    pub error: String,
}
