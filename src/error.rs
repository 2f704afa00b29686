use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::media::EngineError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// The media engine could not create a transport
    #[error("{0}")]
    Provisioning(String),

    #[error("Session has no transport")]
    MissingTransport,

    #[error("Session has no consumer")]
    MissingConsumer,

    #[error("Session already has an active transport")]
    TransportAlreadyExists,

    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error response body (unified success format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MissingTransport
            | AppError::MissingConsumer
            | AppError::TransportAlreadyExists => StatusCode::CONFLICT,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::error!(
            error_type = std::any::type_name_of_val(&self),
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::MissingTransport.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Timeout("consume".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_provisioning_message_is_bare() {
        // Provisioning errors are sent to clients as `{error: message}`
        let err = AppError::Provisioning("no such interface".into());
        assert_eq!(err.to_string(), "no such interface");
    }
}
