use thiserror::Error;

/// Errors seen by the negotiating client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Signaling channel closed")]
    ChannelClosed,

    /// The server answered the request with an error
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The server could not create a transport
    #[error("Transport provisioning failed: {0}")]
    Provisioning(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Transport failed")]
    TransportFailed,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::InvalidResponse(e.to_string())
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
