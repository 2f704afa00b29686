//! Per-connection session state and the negotiation operations

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, TransportReplacePolicy};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::media::{
    ConsumerInfo, DtlsParameters, EngineResult, MediaEngine, MediaSource, RtpCapabilities,
    TransportInfo, TransportOptions, TransportState,
};

/// Settings the registry applies to every session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub transport_policy: TransportReplacePolicy,
    pub engine_timeout: Duration,
    pub listen_ip: IpAddr,
    pub announced_ip: Option<String>,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            transport_policy: config.session.transport_policy,
            engine_timeout: config.session.engine_timeout(),
            listen_ip: config.media.listen_ip()?,
            announced_ip: config.media.announced_ip.clone(),
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            transport_policy: TransportReplacePolicy::Replace,
            engine_timeout: Duration::from_secs(10),
            listen_ip: IpAddr::from([127, 0, 0, 1]),
            announced_ip: None,
        }
    }
}

/// State of one signaling connection
///
/// A consumer only exists while the transport it was created on is stored.
struct Session {
    created_at: Instant,
    transport: Option<TransportInfo>,
    transport_state: TransportState,
    consumer: Option<ConsumerInfo>,
}

impl Session {
    fn new() -> Self {
        Self {
            created_at: Instant::now(),
            transport: None,
            transport_state: TransportState::New,
            consumer: None,
        }
    }
}

/// Session summary for status endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub transport_id: Option<String>,
    pub consumer_id: Option<String>,
    pub transport_state: TransportState,
    pub age_secs: u64,
}

/// Registry of live sessions, keyed by connection id
pub struct SessionRegistry {
    engine: Arc<dyn MediaEngine>,
    events: Arc<EventBus>,
    settings: ArcSwap<SessionSettings>,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, events: Arc<EventBus>, settings: SessionSettings) -> Self {
        Self {
            engine,
            events,
            settings: ArcSwap::from_pointee(settings),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> Arc<SessionSettings> {
        self.settings.load_full()
    }

    /// Swap in new settings. Live sessions keep their transports; the new
    /// values apply from the next operation on.
    pub fn update_settings(&self, settings: SessionSettings) {
        info!(
            "Session settings updated: policy={:?} engine_timeout={:?}",
            settings.transport_policy, settings.engine_timeout
        );
        self.settings.store(Arc::new(settings));
    }

    /// Register a new connection and return its session id
    pub async fn open(&self) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(Session::new())));

        info!("Session opened: {}", session_id);
        self.events.publish(SystemEvent::SessionOpened {
            session_id: session_id.clone(),
        });
        session_id
    }

    /// Drop a session and release its consumer and transport
    pub async fn close(&self, session_id: &str) {
        let Some(session) = self.sessions.write().await.remove(session_id) else {
            return;
        };

        let mut session = session.lock().await;
        self.release(session_id, &mut session).await;

        info!("Session closed: {}", session_id);
        self.events.publish(SystemEvent::SessionClosed {
            session_id: session_id.to_string(),
        });
    }

    /// Close every session (shutdown)
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<(String, Arc<Mutex<Session>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for (session_id, session) in sessions {
            let session = session.lock().await;
            infos.push(SessionInfo {
                session_id,
                transport_id: session.transport.as_ref().map(|t| t.id.clone()),
                consumer_id: session.consumer.as_ref().map(|c| c.id.clone()),
                transport_state: session.transport_state,
                age_secs: session.created_at.elapsed().as_secs(),
            });
        }
        infos
    }

    pub async fn transport_id(&self, session_id: &str) -> Option<String> {
        let session = self.lookup(session_id).await?;
        let session = session.lock().await;
        session.transport.as_ref().map(|t| t.id.clone())
    }

    pub async fn consumer_id(&self, session_id: &str) -> Option<String> {
        let session = self.lookup(session_id).await?;
        let session = session.lock().await;
        session.consumer.as_ref().map(|c| c.id.clone())
    }

    async fn lookup(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn lookup_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.lookup(session_id).await {
            return session;
        }
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new())))
            .clone()
    }

    fn engine_timeout(&self) -> Duration {
        self.settings.load().engine_timeout
    }

    async fn call_engine<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        match tokio::time::timeout(self.engine_timeout(), fut).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::Timeout(format!("media engine {}", op))),
        }
    }

    /// Close the consumer, then the transport it is bound to
    async fn release(&self, session_id: &str, session: &mut Session) {
        self.release_consumer(session).await;

        if let Some(transport) = session.transport.take() {
            if tokio::time::timeout(
                self.engine_timeout(),
                self.engine.close_transport(&transport.id),
            )
            .await
            .is_err()
            {
                warn!("Timed out closing transport {}", transport.id);
            }
            session.transport_state = TransportState::Closed;
            debug!("Session {} released transport {}", session_id, transport.id);
            self.events.publish(SystemEvent::TransportClosed {
                session_id: session_id.to_string(),
                transport_id: transport.id,
            });
        }
    }

    async fn release_consumer(&self, session: &mut Session) {
        if let Some(consumer) = session.consumer.take() {
            if tokio::time::timeout(
                self.engine_timeout(),
                self.engine.close_consumer(&consumer.id),
            )
            .await
            .is_err()
            {
                warn!("Timed out closing consumer {}", consumer.id);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Negotiation operations
    // ------------------------------------------------------------------------

    /// Capabilities of the router, loaded by the client before anything else
    pub fn get_router_capabilities(&self) -> RtpCapabilities {
        self.engine.rtp_capabilities()
    }

    /// Provision a receive transport for the session.
    ///
    /// Creates the session if it does not exist. On failure the session is
    /// left without a transport and the error is `AppError::Provisioning`.
    pub async fn create_consumer_transport(
        &self,
        session_id: &str,
        force_tcp: bool,
    ) -> Result<TransportInfo> {
        let session = self.lookup_or_create(session_id).await;
        let mut session = session.lock().await;

        let settings = self.settings();
        let replaced = session.transport.as_ref().map(|t| t.id.clone());
        if replaced.is_some() {
            match settings.transport_policy {
                TransportReplacePolicy::Reject => return Err(AppError::TransportAlreadyExists),
                TransportReplacePolicy::Replace => self.release(session_id, &mut session).await,
            }
        }

        let options = TransportOptions {
            listen_ip: settings.listen_ip,
            announced_ip: settings.announced_ip.clone(),
            prefer_tcp: force_tcp,
        };

        let transport = self
            .call_engine("createWebRtcTransport", self.engine.create_webrtc_transport(&options))
            .await
            .map_err(|e| match e {
                AppError::Engine(e) => AppError::Provisioning(e.to_string()),
                other => AppError::Provisioning(other.to_string()),
            })?;

        session.transport = Some(transport.clone());
        session.transport_state = TransportState::New;

        info!(
            "Session {} transport created: {} (tcp={})",
            session_id, transport.id, force_tcp
        );
        self.events.publish(SystemEvent::TransportCreated {
            session_id: session_id.to_string(),
            transport_id: transport.id.clone(),
            replaced,
        });
        Ok(transport)
    }

    /// Apply the client's DTLS parameters to the session transport.
    ///
    /// Without a session or transport, or when `transport_id` names a
    /// transport that is no longer current, this acknowledges and does
    /// nothing.
    pub async fn connect_consumer_transport(
        &self,
        session_id: &str,
        transport_id: Option<&str>,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let Some(session) = self.lookup(session_id).await else {
            debug!("connect for unknown session {}, ignoring", session_id);
            return Ok(());
        };
        let mut session = session.lock().await;

        let Some(current_id) = session.transport.as_ref().map(|t| t.id.clone()) else {
            debug!("Session {} has no transport, ignoring connect", session_id);
            return Ok(());
        };

        if let Some(requested) = transport_id {
            if requested != current_id {
                debug!(
                    "Session {} connect for stale transport {} (current {}), ignoring",
                    session_id, requested, current_id
                );
                return Ok(());
            }
        }

        self.call_engine(
            "connect",
            self.engine.connect_transport(&current_id, dtls_parameters),
        )
        .await?;
        session.transport_state = TransportState::Connecting;

        info!("Session {} transport DTLS parameters applied: {}", session_id, current_id);
        self.events.publish(SystemEvent::TransportConnecting {
            session_id: session_id.to_string(),
            transport_id: current_id,
        });
        Ok(())
    }

    /// Bind `source` to a new consumer on the session transport.
    ///
    /// The consumer is created unpaused. A previous consumer of the session is
    /// closed first.
    pub async fn consume(
        &self,
        session_id: &str,
        source: &MediaSource,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerInfo> {
        let session = self
            .lookup(session_id)
            .await
            .ok_or(AppError::MissingTransport)?;
        let mut session = session.lock().await;

        let transport_id = session
            .transport
            .as_ref()
            .map(|t| t.id.clone())
            .ok_or(AppError::MissingTransport)?;

        self.release_consumer(&mut session).await;

        let consumer = self
            .call_engine(
                "consume",
                self.engine
                    .consume(&transport_id, source, &rtp_capabilities, false),
            )
            .await?;
        session.consumer = Some(consumer.clone());

        info!(
            "Session {} consuming {} as {}",
            session_id, source.id, consumer.id
        );
        self.events.publish(SystemEvent::ConsumerCreated {
            session_id: session_id.to_string(),
            consumer_id: consumer.id.clone(),
            producer_id: source.id.clone(),
        });
        Ok(consumer)
    }

    /// Let media flow on the session consumer
    pub async fn resume(&self, session_id: &str) -> Result<()> {
        let session = self
            .lookup(session_id)
            .await
            .ok_or(AppError::MissingConsumer)?;
        let session = session.lock().await;

        let consumer_id = session
            .consumer
            .as_ref()
            .map(|c| c.id.clone())
            .ok_or(AppError::MissingConsumer)?;

        self.call_engine("resume", self.engine.resume_consumer(&consumer_id))
            .await?;

        debug!("Session {} resumed consumer {}", session_id, consumer_id);
        self.events.publish(SystemEvent::ConsumerResumed {
            session_id: session_id.to_string(),
            consumer_id,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;
    use crate::media::{DtlsFingerprint, DtlsRole, LocalMediaEngine, MediaKind, RtpParameters};

    async fn setup(policy: TransportReplacePolicy) -> (SessionRegistry, Arc<LocalMediaEngine>, MediaSource) {
        let media = MediaConfig::default();
        let engine = Arc::new(LocalMediaEngine::new(&media.codecs).unwrap());
        let source = engine
            .produce(
                MediaKind::Video,
                media.source.rtp_parameters(&media.codecs).unwrap(),
            )
            .await
            .unwrap();
        let registry = SessionRegistry::new(
            engine.clone(),
            Arc::new(EventBus::new()),
            SessionSettings {
                transport_policy: policy,
                ..Default::default()
            },
        );
        (registry, engine, source)
    }

    fn client_dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: "01:02:03".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_consume_without_transport_fails() {
        let (registry, _, source) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;

        let caps = registry.get_router_capabilities();
        let err = registry.consume(&id, &source, caps).await.unwrap_err();
        assert!(matches!(err, AppError::MissingTransport));
    }

    #[tokio::test]
    async fn test_consume_after_transport_succeeds() {
        let (registry, _, source) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;

        registry.create_consumer_transport(&id, false).await.unwrap();
        let caps = registry.get_router_capabilities();
        let consumer = registry.consume(&id, &source, caps).await.unwrap();

        assert_eq!(consumer.producer_id, source.id);
        assert_eq!(consumer.kind, MediaKind::Video);
        assert!(!consumer.paused);
        assert!(!consumer.producer_paused);
    }

    #[tokio::test]
    async fn test_second_consume_closes_previous_consumer() {
        let (registry, engine, source) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;
        registry.create_consumer_transport(&id, false).await.unwrap();

        let first = registry
            .consume(&id, &source, registry.get_router_capabilities())
            .await
            .unwrap();
        let second = registry
            .consume(&id, &source, registry.get_router_capabilities())
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(engine.consumer_count(), 1);
        assert_eq!(engine.consumer_paused(&first.id), None);
        assert_eq!(registry.consumer_id(&id).await, Some(second.id));
    }

    #[tokio::test]
    async fn test_resume_requires_consumer() {
        let (registry, _, source) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;

        assert!(matches!(
            registry.resume(&id).await.unwrap_err(),
            AppError::MissingConsumer
        ));

        registry.create_consumer_transport(&id, false).await.unwrap();
        assert!(matches!(
            registry.resume(&id).await.unwrap_err(),
            AppError::MissingConsumer
        ));

        let caps = registry.get_router_capabilities();
        registry.consume(&id, &source, caps).await.unwrap();
        registry.resume(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_transport_replaces_first() {
        let (registry, engine, _) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;

        let first = registry.create_consumer_transport(&id, false).await.unwrap();
        let second = registry.create_consumer_transport(&id, false).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(registry.transport_id(&id).await, Some(second.id.clone()));

        // The first transport was released on the engine
        assert_eq!(engine.transport_count(), 1);
        assert!(engine.transport_state(&first.id).is_none());

        registry
            .connect_consumer_transport(&id, None, client_dtls())
            .await
            .unwrap();
        assert!(engine.remote_dtls_parameters(&second.id).is_some());
    }

    #[tokio::test]
    async fn test_replacing_transport_drops_consumer() {
        let (registry, engine, source) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;

        registry.create_consumer_transport(&id, false).await.unwrap();
        let caps = registry.get_router_capabilities();
        registry.consume(&id, &source, caps).await.unwrap();
        assert_eq!(engine.consumer_count(), 1);

        registry.create_consumer_transport(&id, false).await.unwrap();
        assert_eq!(engine.consumer_count(), 0);
        assert_eq!(registry.consumer_id(&id).await, None);
        assert!(matches!(
            registry.resume(&id).await.unwrap_err(),
            AppError::MissingConsumer
        ));
    }

    #[tokio::test]
    async fn test_reject_policy_keeps_first_transport() {
        let (registry, engine, _) = setup(TransportReplacePolicy::Reject).await;
        let id = registry.open().await;

        let first = registry.create_consumer_transport(&id, false).await.unwrap();
        let err = registry.create_consumer_transport(&id, false).await.unwrap_err();

        assert!(matches!(err, AppError::TransportAlreadyExists));
        assert_eq!(registry.transport_id(&id).await, Some(first.id));
        assert_eq!(engine.transport_count(), 1);
    }

    #[tokio::test]
    async fn test_updated_policy_applies_to_live_sessions() {
        let (registry, engine, _) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;
        let first = registry.create_consumer_transport(&id, false).await.unwrap();

        registry.update_settings(SessionSettings {
            transport_policy: TransportReplacePolicy::Reject,
            ..Default::default()
        });
        assert_eq!(
            registry.settings().transport_policy,
            TransportReplacePolicy::Reject
        );

        let err = registry.create_consumer_transport(&id, false).await.unwrap_err();
        assert!(matches!(err, AppError::TransportAlreadyExists));
        assert_eq!(registry.transport_id(&id).await, Some(first.id));
        assert_eq!(engine.transport_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_without_transport_is_noop() {
        let (registry, _, _) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;

        registry
            .connect_consumer_transport(&id, None, client_dtls())
            .await
            .unwrap();
        registry
            .connect_consumer_transport("never-opened", Some("t"), client_dtls())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_for_stale_transport_is_noop() {
        let (registry, engine, _) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;

        let first = registry.create_consumer_transport(&id, false).await.unwrap();
        let second = registry.create_consumer_transport(&id, false).await.unwrap();

        registry
            .connect_consumer_transport(&id, Some(&first.id), client_dtls())
            .await
            .unwrap();
        assert!(engine.remote_dtls_parameters(&second.id).is_none());
    }

    #[tokio::test]
    async fn test_double_connect_is_rejected() {
        let (registry, _, _) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;
        registry.create_consumer_transport(&id, false).await.unwrap();

        registry
            .connect_consumer_transport(&id, None, client_dtls())
            .await
            .unwrap();
        let err = registry
            .connect_consumer_transport(&id, None, client_dtls())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Engine(_)));
    }

    #[tokio::test]
    async fn test_close_releases_resources() {
        let (registry, engine, source) = setup(TransportReplacePolicy::Replace).await;
        let id = registry.open().await;

        registry.create_consumer_transport(&id, false).await.unwrap();
        let caps = registry.get_router_capabilities();
        registry.consume(&id, &source, caps).await.unwrap();

        registry.close(&id).await;
        assert!(!registry.contains(&id).await);
        assert_eq!(engine.transport_count(), 0);
        assert_eq!(engine.consumer_count(), 0);

        // The old id behaves like a fresh session
        let caps = registry.get_router_capabilities();
        assert!(matches!(
            registry.consume(&id, &source, caps).await.unwrap_err(),
            AppError::MissingTransport
        ));
        assert!(matches!(
            registry.resume(&id).await.unwrap_err(),
            AppError::MissingConsumer
        ));
        registry
            .connect_consumer_transport(&id, None, client_dtls())
            .await
            .unwrap();
        assert!(!registry.contains(&id).await);
    }

    #[tokio::test]
    async fn test_provisioning_creates_session_implicitly() {
        let (registry, _, _) = setup(TransportReplacePolicy::Replace).await;

        registry.create_consumer_transport("implicit", false).await.unwrap();
        assert!(registry.contains("implicit").await);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure_leaves_no_transport() {
        let media = MediaConfig::default();
        let engine = Arc::new(LocalMediaEngine::new(&media.codecs).unwrap());
        let registry = SessionRegistry::new(
            engine,
            Arc::new(EventBus::new()),
            SessionSettings {
                // TEST-NET address, not assigned to any local interface
                listen_ip: IpAddr::from([192, 0, 2, 1]),
                ..Default::default()
            },
        );
        let id = registry.open().await;

        let err = registry.create_consumer_transport(&id, false).await.unwrap_err();
        assert!(matches!(err, AppError::Provisioning(_)));
        assert_eq!(registry.transport_id(&id).await, None);
    }

    /// Delegates to a local engine, stalling the selected operations
    struct StallingEngine {
        inner: Arc<LocalMediaEngine>,
        stall: Duration,
        stall_transport: bool,
        stall_consume: bool,
    }

    #[async_trait::async_trait]
    impl MediaEngine for StallingEngine {
        fn rtp_capabilities(&self) -> RtpCapabilities {
            self.inner.rtp_capabilities()
        }

        async fn produce(
            &self,
            kind: MediaKind,
            rtp_parameters: RtpParameters,
        ) -> EngineResult<MediaSource> {
            self.inner.produce(kind, rtp_parameters).await
        }

        async fn create_webrtc_transport(
            &self,
            options: &TransportOptions,
        ) -> EngineResult<TransportInfo> {
            if self.stall_transport {
                tokio::time::sleep(self.stall).await;
            }
            self.inner.create_webrtc_transport(options).await
        }

        async fn connect_transport(
            &self,
            transport_id: &str,
            dtls_parameters: DtlsParameters,
        ) -> EngineResult<()> {
            self.inner.connect_transport(transport_id, dtls_parameters).await
        }

        async fn consume(
            &self,
            transport_id: &str,
            source: &MediaSource,
            rtp_capabilities: &RtpCapabilities,
            paused: bool,
        ) -> EngineResult<ConsumerInfo> {
            if self.stall_consume {
                tokio::time::sleep(self.stall).await;
            }
            self.inner
                .consume(transport_id, source, rtp_capabilities, paused)
                .await
        }

        async fn resume_consumer(&self, consumer_id: &str) -> EngineResult<()> {
            self.inner.resume_consumer(consumer_id).await
        }

        async fn close_consumer(&self, consumer_id: &str) {
            self.inner.close_consumer(consumer_id).await
        }

        async fn close_transport(&self, transport_id: &str) {
            self.inner.close_transport(transport_id).await
        }
    }

    async fn stalling_setup(
        stall_transport: bool,
        stall_consume: bool,
    ) -> (SessionRegistry, Arc<LocalMediaEngine>, MediaSource) {
        let media = MediaConfig::default();
        let local = Arc::new(LocalMediaEngine::new(&media.codecs).unwrap());
        let source = local
            .produce(
                MediaKind::Video,
                media.source.rtp_parameters(&media.codecs).unwrap(),
            )
            .await
            .unwrap();
        let engine = Arc::new(StallingEngine {
            inner: local.clone(),
            stall: Duration::from_millis(500),
            stall_transport,
            stall_consume,
        });
        let registry = SessionRegistry::new(
            engine,
            Arc::new(EventBus::new()),
            SessionSettings {
                engine_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );
        (registry, local, source)
    }

    #[tokio::test]
    async fn test_provisioning_timeout_is_provisioning_error() {
        let (registry, local, source) = stalling_setup(true, false).await;
        let id = registry.open().await;

        let err = registry.create_consumer_transport(&id, false).await.unwrap_err();
        assert!(matches!(err, AppError::Provisioning(_)));
        assert_eq!(registry.transport_id(&id).await, None);

        // Over the wire the failure is an `{error}` payload, not a rejection
        let response = crate::signaling::dispatch(
            &registry,
            &source,
            &id,
            crate::signaling::RequestEnvelope::new(
                1,
                crate::signaling::methods::CREATE_CONSUMER_TRANSPORT,
                serde_json::json!({"forceTcp": false}),
            ),
        )
        .await;
        assert_eq!(response.id, Some(1));
        assert!(response.error.is_none());
        assert!(response.data.unwrap()["error"].is_string());
        assert_eq!(registry.transport_id(&id).await, None);
        assert_eq!(local.transport_count(), 0);
    }

    #[tokio::test]
    async fn test_consume_timeout_is_rejected() {
        let (registry, local, source) = stalling_setup(false, true).await;
        let id = registry.open().await;
        registry.create_consumer_transport(&id, false).await.unwrap();

        let caps = registry.get_router_capabilities();
        let err = registry.consume(&id, &source, caps).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(registry.consumer_id(&id).await, None);
        assert_eq!(local.consumer_count(), 0);

        let response = crate::signaling::dispatch(
            &registry,
            &source,
            &id,
            crate::signaling::RequestEnvelope::new(
                2,
                crate::signaling::methods::CONSUME,
                serde_json::json!({"rtpCapabilities": registry.get_router_capabilities()}),
            ),
        )
        .await;
        assert!(response.is_rejected());
        assert_eq!(registry.consumer_id(&id).await, None);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (registry, _, source) = setup(TransportReplacePolicy::Replace).await;
        let registry = Arc::new(registry);
        let source = Arc::new(source);

        let run = |registry: Arc<SessionRegistry>, source: Arc<MediaSource>| async move {
            let id = registry.open().await;
            registry.create_consumer_transport(&id, false).await.unwrap();
            registry
                .connect_consumer_transport(&id, None, client_dtls())
                .await
                .unwrap();
            let caps = registry.get_router_capabilities();
            let consumer = registry.consume(&id, &source, caps).await.unwrap();
            registry.resume(&id).await.unwrap();
            (id, consumer.id)
        };

        let (a, b) = tokio::join!(
            run(registry.clone(), source.clone()),
            run(registry.clone(), source.clone())
        );
        assert_ne!(a.0, b.0);
        assert_ne!(a.1, b.1);
        assert_eq!(registry.consumer_id(&a.0).await, Some(a.1.clone()));
        assert_eq!(registry.consumer_id(&b.0).await, Some(b.1.clone()));

        registry.close(&a.0).await;
        assert_eq!(registry.consumer_id(&b.0).await, Some(b.1));
    }

    #[tokio::test]
    async fn test_events_published() {
        let (registry, _, _) = setup(TransportReplacePolicy::Replace).await;
        let mut rx = registry.events.subscribe();

        let id = registry.open().await;
        registry.create_consumer_transport(&id, false).await.unwrap();
        registry
            .connect_consumer_transport(&id, None, client_dtls())
            .await
            .unwrap();

        // Applying DTLS parameters does not complete the handshake
        let sessions = registry.list_sessions().await;
        assert_eq!(sessions[0].transport_state, TransportState::Connecting);

        registry.close(&id).await;

        let names: Vec<&'static str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "session.opened",
                "transport.created",
                "transport.connecting",
                "transport.closed",
                "session.closed"
            ]
        );
    }
}
