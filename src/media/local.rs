//! In-process media engine
//!
//! Keeps the control-plane bookkeeping of an SFU router: it allocates a real
//! socket per transport for the ICE host candidate, signs DTLS parameters with
//! a per-engine certificate, negotiates consumer RTP parameters and releases
//! everything on close. Packet forwarding is left to the media plane.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, info};
use webrtc::peer_connection::certificate::RTCCertificate;

use super::ortc;
use super::types::{
    ConsumerType, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    MediaKind, Protocol, RtpCapabilities, RtpCodecCapability, RtpParameters, TransportState,
};
use super::{
    ConsumerInfo, EngineError, EngineResult, MediaEngine, MediaSource, TransportInfo,
    TransportOptions,
};

const ICE_UFRAG_LEN: usize = 16;
const ICE_PWD_LEN: usize = 32;

/// Socket backing the host candidate of a transport
enum TransportSocket {
    Udp(UdpSocket),
    Tcp(TcpListener),
}

impl TransportSocket {
    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            TransportSocket::Udp(s) => s.local_addr(),
            TransportSocket::Tcp(l) => l.local_addr(),
        }
    }

    fn protocol(&self) -> Protocol {
        match self {
            TransportSocket::Udp(_) => Protocol::Udp,
            TransportSocket::Tcp(_) => Protocol::Tcp,
        }
    }
}

struct LocalTransport {
    _socket: TransportSocket,
    remote_dtls: Option<DtlsParameters>,
    state: TransportState,
    consumers: Vec<String>,
}

struct LocalConsumer {
    transport_id: String,
    paused: bool,
}

/// Media engine living in the signaling process
pub struct LocalMediaEngine {
    capabilities: RtpCapabilities,
    fingerprints: Vec<DtlsFingerprint>,
    transports: Mutex<HashMap<String, LocalTransport>>,
    producers: Mutex<HashMap<String, MediaSource>>,
    consumers: Mutex<HashMap<String, LocalConsumer>>,
}

impl LocalMediaEngine {
    /// Create an engine whose router supports `media_codecs`
    pub fn new(media_codecs: &[RtpCodecCapability]) -> EngineResult<Self> {
        let capabilities =
            ortc::router_capabilities(media_codecs, ortc::default_header_extensions())?;
        let fingerprints = generate_fingerprints()?;

        info!(
            "Media engine ready: {} codec(s), {} DTLS fingerprint(s)",
            capabilities.codecs.len(),
            fingerprints.len()
        );

        Ok(Self {
            capabilities,
            fingerprints,
            transports: Mutex::new(HashMap::new()),
            producers: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
        })
    }

    pub fn transport_count(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }

    pub fn transport_state(&self, transport_id: &str) -> Option<TransportState> {
        self.transports.lock().get(transport_id).map(|t| t.state)
    }

    /// Remote DTLS parameters applied by `connect_transport`
    pub fn remote_dtls_parameters(&self, transport_id: &str) -> Option<DtlsParameters> {
        self.transports
            .lock()
            .get(transport_id)
            .and_then(|t| t.remote_dtls.clone())
    }

    pub fn consumer_paused(&self, consumer_id: &str) -> Option<bool> {
        self.consumers.lock().get(consumer_id).map(|c| c.paused)
    }
}

fn generate_fingerprints() -> EngineResult<Vec<DtlsFingerprint>> {
    let key_pair =
        rcgen::KeyPair::generate().map_err(|e| EngineError::Certificate(e.to_string()))?;
    let certificate = RTCCertificate::from_key_pair(key_pair)
        .map_err(|e| EngineError::Certificate(e.to_string()))?;

    Ok(certificate
        .get_fingerprints()
        .into_iter()
        .map(|f| DtlsFingerprint {
            algorithm: f.algorithm,
            value: f.value,
        })
        .collect())
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Host candidate priority (RFC 8445 §5.1.2.1), UDP preferred over TCP
fn host_candidate_priority(protocol: Protocol) -> u32 {
    let type_pref: u32 = 126;
    let local_pref: u32 = match protocol {
        Protocol::Udp => 65535,
        Protocol::Tcp => 32767,
    };
    (type_pref << 24) + (local_pref << 8) + (256 - 1)
}

#[async_trait]
impl MediaEngine for LocalMediaEngine {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> EngineResult<MediaSource> {
        if !ortc::can_consume(&rtp_parameters, &self.capabilities) {
            return Err(EngineError::InvalidParameters(
                "producer codecs are not supported by the router".to_string(),
            ));
        }

        let source = MediaSource {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            rtp_parameters,
            paused: false,
        };
        self.producers.lock().insert(source.id.clone(), source.clone());

        info!("Producer registered: {} ({})", source.id, kind);
        Ok(source)
    }

    async fn create_webrtc_transport(
        &self,
        options: &TransportOptions,
    ) -> EngineResult<TransportInfo> {
        let bind_addr = SocketAddr::new(options.listen_ip, 0);
        let socket = if options.prefer_tcp {
            TcpListener::bind(bind_addr).await.map(TransportSocket::Tcp)
        } else {
            UdpSocket::bind(bind_addr).await.map(TransportSocket::Udp)
        }
        .map_err(|e| EngineError::TransportCreation(format!("bind {}: {}", bind_addr, e)))?;

        let local_addr = socket.local_addr()?;
        let protocol = socket.protocol();
        let ip = options
            .announced_ip
            .clone()
            .unwrap_or_else(|| options.listen_ip.to_string());

        let candidate = IceCandidate {
            foundation: format!("{:?}candidate", protocol).to_lowercase(),
            priority: host_candidate_priority(protocol),
            ip: ip.clone(),
            address: ip,
            protocol,
            port: local_addr.port(),
            candidate_type: "host".to_string(),
            tcp_type: matches!(protocol, Protocol::Tcp).then(|| "passive".to_string()),
        };

        let info = TransportInfo {
            id: uuid::Uuid::new_v4().to_string(),
            ice_parameters: IceParameters {
                username_fragment: random_string(ICE_UFRAG_LEN),
                password: random_string(ICE_PWD_LEN),
                ice_lite: true,
            },
            ice_candidates: vec![candidate],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: self.fingerprints.clone(),
            },
        };

        self.transports.lock().insert(
            info.id.clone(),
            LocalTransport {
                _socket: socket,
                remote_dtls: None,
                state: TransportState::New,
                consumers: Vec::new(),
            },
        );

        debug!("Transport {} listening on {}", info.id, local_addr);
        Ok(info)
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> EngineResult<()> {
        if dtls_parameters.fingerprints.is_empty() {
            return Err(EngineError::InvalidParameters(
                "DTLS parameters carry no fingerprint".to_string(),
            ));
        }

        let mut transports = self.transports.lock();
        let transport = transports
            .get_mut(transport_id)
            .ok_or_else(|| EngineError::TransportNotFound(transport_id.to_string()))?;

        if transport.remote_dtls.is_some() {
            return Err(EngineError::AlreadyConnected(transport_id.to_string()));
        }

        transport.remote_dtls = Some(dtls_parameters);
        transport.state = TransportState::Connecting;
        debug!("Transport {} connecting", transport_id);
        Ok(())
    }

    async fn consume(
        &self,
        transport_id: &str,
        source: &MediaSource,
        rtp_capabilities: &RtpCapabilities,
        paused: bool,
    ) -> EngineResult<ConsumerInfo> {
        let producer_paused = self
            .producers
            .lock()
            .get(&source.id)
            .map(|p| p.paused)
            .ok_or_else(|| EngineError::ProducerNotFound(source.id.clone()))?;

        let rtp_parameters =
            ortc::consumer_rtp_parameters(source.kind, &source.rtp_parameters, rtp_capabilities)?;

        let mut transports = self.transports.lock();
        let transport = transports
            .get_mut(transport_id)
            .ok_or_else(|| EngineError::TransportNotFound(transport_id.to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        transport.consumers.push(id.clone());
        self.consumers.lock().insert(
            id.clone(),
            LocalConsumer {
                transport_id: transport_id.to_string(),
                paused,
            },
        );

        debug!("Consumer {} created on transport {}", id, transport_id);
        Ok(ConsumerInfo {
            id,
            producer_id: source.id.clone(),
            transport_id: transport_id.to_string(),
            kind: source.kind,
            rtp_parameters,
            consumer_type: ConsumerType::Simple,
            paused,
            producer_paused,
        })
    }

    async fn resume_consumer(&self, consumer_id: &str) -> EngineResult<()> {
        let mut consumers = self.consumers.lock();
        let consumer = consumers
            .get_mut(consumer_id)
            .ok_or_else(|| EngineError::ConsumerNotFound(consumer_id.to_string()))?;
        consumer.paused = false;
        Ok(())
    }

    async fn close_consumer(&self, consumer_id: &str) {
        let Some(consumer) = self.consumers.lock().remove(consumer_id) else {
            return;
        };
        if let Some(transport) = self.transports.lock().get_mut(&consumer.transport_id) {
            transport.consumers.retain(|id| id != consumer_id);
        }
        debug!("Consumer {} closed", consumer_id);
    }

    async fn close_transport(&self, transport_id: &str) {
        let Some(transport) = self.transports.lock().remove(transport_id) else {
            return;
        };
        let mut consumers = self.consumers.lock();
        for id in &transport.consumers {
            consumers.remove(id);
        }
        debug!(
            "Transport {} closed ({} consumer(s))",
            transport_id,
            transport.consumers.len()
        );
    }
}
