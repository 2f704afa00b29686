//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

/// System event enum
///
/// Serialized as:
/// ```json
/// {
///   "event": "consumer.created",
///   "data": { "session_id": "…", "consumer_id": "…", "producer_id": "…" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Session Events
    // ============================================================================
    /// A signaling connection was established
    #[serde(rename = "session.opened")]
    SessionOpened { session_id: String },

    /// A signaling connection went away and its resources were released
    #[serde(rename = "session.closed")]
    SessionClosed { session_id: String },

    // ============================================================================
    // Transport Events
    // ============================================================================
    #[serde(rename = "transport.created")]
    TransportCreated {
        session_id: String,
        transport_id: String,
        /// Transport this one replaced, if any
        replaced: Option<String>,
    },

    /// Remote DTLS parameters were applied
    #[serde(rename = "transport.connecting")]
    TransportConnecting {
        session_id: String,
        transport_id: String,
    },

    #[serde(rename = "transport.closed")]
    TransportClosed {
        session_id: String,
        transport_id: String,
    },

    // ============================================================================
    // Consumer Events
    // ============================================================================
    #[serde(rename = "consumer.created")]
    ConsumerCreated {
        session_id: String,
        consumer_id: String,
        producer_id: String,
    },

    #[serde(rename = "consumer.resumed")]
    ConsumerResumed {
        session_id: String,
        consumer_id: String,
    },

    // ============================================================================
    // Source Events
    // ============================================================================
    /// Control action requested for the video source
    #[serde(rename = "source.action")]
    SourceAction { action: String },

    /// WebSocket error notification (for connection-level errors like lag)
    #[serde(rename = "error")]
    Error {
        /// Error message
        message: String,
    },
}

impl SystemEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionOpened { .. } => "session.opened",
            Self::SessionClosed { .. } => "session.closed",
            Self::TransportCreated { .. } => "transport.created",
            Self::TransportConnecting { .. } => "transport.connecting",
            Self::TransportClosed { .. } => "transport.closed",
            Self::ConsumerCreated { .. } => "consumer.created",
            Self::ConsumerResumed { .. } => "consumer.resumed",
            Self::SourceAction { .. } => "source.action",
            Self::Error { .. } => "error",
        }
    }

    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SessionOpened { session_id }
            | Self::SessionClosed { session_id }
            | Self::TransportCreated { session_id, .. }
            | Self::TransportConnecting { session_id, .. }
            | Self::TransportClosed { session_id, .. }
            | Self::ConsumerCreated { session_id, .. }
            | Self::ConsumerResumed { session_id, .. } => Some(session_id),
            Self::SourceAction { .. } | Self::Error { .. } => None,
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards: `*` matches everything, `session.*` matches every
    /// event whose name starts with `session.`.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches('*');
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}
