use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::{SessionConfig, TransportReplacePolicy};
use crate::error::{AppError, Result};
use crate::events::SystemEvent;
use crate::session::{SessionInfo, SessionSettings};
use crate::state::AppState;

// ============================================================================
// Health & Status
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Live signaling sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list_sessions().await)
}

// ============================================================================
// Session configuration
// ============================================================================

pub async fn get_session_config(State(state): State<Arc<AppState>>) -> Json<SessionConfig> {
    Json(state.config.get().session.clone())
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionConfigUpdate {
    pub transport_policy: Option<TransportReplacePolicy>,
    pub engine_timeout_ms: Option<u64>,
}

impl SessionConfigUpdate {
    pub fn validate(&self) -> Result<()> {
        if self.engine_timeout_ms == Some(0) {
            return Err(AppError::BadRequest(
                "engine_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn apply_to(&self, config: &mut SessionConfig) {
        if let Some(policy) = self.transport_policy {
            config.transport_policy = policy;
        }
        if let Some(timeout) = self.engine_timeout_ms {
            config.engine_timeout_ms = timeout;
        }
    }
}

/// Persist new session settings and apply them to the registry
pub async fn update_session_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionConfigUpdate>,
) -> Result<Json<SessionConfig>> {
    req.validate()?;

    state
        .config
        .update(|config| req.apply_to(&mut config.session))
        .await?;

    let config = state.config.get();
    state
        .registry
        .update_settings(SessionSettings::from_config(&config)?);

    Ok(Json(config.session.clone()))
}

// ============================================================================
// Source control
// ============================================================================

#[derive(Deserialize)]
pub struct SourceActionRequest {
    pub action: String,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Forward a control action for the video source to event subscribers
pub async fn source_action(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SourceActionRequest>,
) -> Result<Json<ActionResponse>> {
    let action = req.action.trim();
    if action.is_empty() {
        return Err(AppError::BadRequest("action must not be empty".to_string()));
    }

    info!("Source action requested: {}", action);
    state.events.publish(SystemEvent::SourceAction {
        action: action.to_string(),
    });

    Ok(Json(ActionResponse {
        success: true,
        message: None,
    }))
}
