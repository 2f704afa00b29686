use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::protocol::{
    methods, ConnectTransportRequest, ConsumeRequest, ConsumeResponse, CreateTransportRequest,
    ProvisioningError, RequestEnvelope, ResponseEnvelope,
};
use crate::error::{AppError, Result};
use crate::media::MediaSource;
use crate::session::SessionRegistry;

/// Route one request of `session_id` to the registry and build the reply.
///
/// Never fails: every error becomes either a `{error}` payload (provisioning)
/// or a rejected response.
pub async fn dispatch(
    registry: &SessionRegistry,
    source: &MediaSource,
    session_id: &str,
    request: RequestEnvelope,
) -> ResponseEnvelope {
    let RequestEnvelope { id, method, data } = request;
    debug!("Session {} request {:?}: {}", session_id, id, method);

    match handle(registry, source, session_id, &method, data).await {
        Ok(Some(data)) => ResponseEnvelope::ok(id, data),
        Ok(None) => ResponseEnvelope::ack(id),
        Err(e) => {
            warn!("Session {} {} rejected: {}", session_id, method, e);
            ResponseEnvelope::rejected(id, e.to_string())
        }
    }
}

/// Decode a text frame and dispatch it. Unparseable frames get a bare `{error}`.
pub async fn dispatch_text(
    registry: &SessionRegistry,
    source: &MediaSource,
    session_id: &str,
    text: &str,
) -> ResponseEnvelope {
    match serde_json::from_str::<RequestEnvelope>(text) {
        Ok(request) => dispatch(registry, source, session_id, request).await,
        Err(e) => {
            warn!("Session {} sent an invalid frame: {}", session_id, e);
            ResponseEnvelope::rejected(None, format!("invalid request: {}", e))
        }
    }
}

async fn handle(
    registry: &SessionRegistry,
    source: &MediaSource,
    session_id: &str,
    method: &str,
    data: Value,
) -> Result<Option<Value>> {
    match method {
        methods::GET_ROUTER_RTP_CAPABILITIES => {
            Ok(Some(serde_json::to_value(registry.get_router_capabilities())?))
        }
        methods::CREATE_CONSUMER_TRANSPORT => {
            let req: CreateTransportRequest = parse_data(method, data)?;
            match registry
                .create_consumer_transport(session_id, req.force_tcp)
                .await
            {
                Ok(transport) => Ok(Some(serde_json::to_value(transport)?)),
                Err(AppError::Provisioning(error)) => {
                    Ok(Some(serde_json::to_value(ProvisioningError { error })?))
                }
                Err(e) => Err(e),
            }
        }
        methods::CONNECT_CONSUMER_TRANSPORT => {
            let req: ConnectTransportRequest = parse_data(method, data)?;
            registry
                .connect_consumer_transport(
                    session_id,
                    req.transport_id.as_deref(),
                    req.dtls_parameters,
                )
                .await?;
            Ok(None)
        }
        methods::CONSUME => {
            let req: ConsumeRequest = parse_data(method, data)?;
            let consumer = registry
                .consume(session_id, source, req.rtp_capabilities)
                .await?;
            Ok(Some(serde_json::to_value(ConsumeResponse::from(consumer))?))
        }
        methods::RESUME => {
            registry.resume(session_id).await?;
            Ok(None)
        }
        other => Err(AppError::BadRequest(format!("unknown request type: {}", other))),
    }
}

fn parse_data<T: DeserializeOwned>(method: &str, data: Value) -> Result<T> {
    // Requests without a payload carry `null`
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data)
        .map_err(|e| AppError::BadRequest(format!("invalid {} data: {}", method, e)))
}
