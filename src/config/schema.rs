use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::error::{AppError, Result};
use crate::media::types::{
    RtcpFeedback, RtcpParameters, RtpCodecParameters, RtpEncodingParameters,
};
use crate::media::{MediaKind, RtpCodecCapability, RtpParameters};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub web: WebConfig,
    /// Media router settings
    pub media: MediaConfig,
    /// Per-client session settings
    pub session: SessionConfig,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// HTTPS port
    pub https_port: u16,
    /// Bind address
    pub bind_address: String,
    /// Enable HTTPS
    pub https_enabled: bool,
    /// Custom SSL certificate path
    pub ssl_cert_path: Option<String>,
    /// Custom SSL key path
    pub ssl_key_path: Option<String>,
    /// WebSocket path of the signaling channel
    pub signaling_path: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            https_port: 8443,
            bind_address: "0.0.0.0".to_string(),
            https_enabled: false,
            ssl_cert_path: None,
            ssl_key_path: None,
            signaling_path: "/server".to_string(),
        }
    }
}

/// Media router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Interface WebRTC transports bind to
    pub listen_ip: String,
    /// Public address announced in ICE candidates (NAT/containers)
    pub announced_ip: Option<String>,
    /// Codecs supported by the router
    pub codecs: Vec<RtpCodecCapability>,
    /// The video source fed into the router
    pub source: SourceConfig,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            listen_ip: "127.0.0.1".to_string(),
            announced_ip: None,
            codecs: vec![default_vp8_codec()],
            source: SourceConfig::default(),
        }
    }
}

impl MediaConfig {
    pub fn listen_ip(&self) -> Result<IpAddr> {
        self.listen_ip
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid listen_ip: {}", self.listen_ip)))
    }
}

fn default_vp8_codec() -> RtpCodecCapability {
    RtpCodecCapability {
        kind: MediaKind::Video,
        mime_type: "video/VP8".to_string(),
        preferred_payload_type: None,
        clock_rate: 90000,
        channels: None,
        parameters: Map::new(),
        rtcp_feedback: vec![
            RtcpFeedback::new("nack"),
            RtcpFeedback::with_parameter("nack", "pli"),
            RtcpFeedback::with_parameter("ccm", "fir"),
            RtcpFeedback::new("goog-remb"),
            RtcpFeedback::new("transport-cc"),
        ],
    }
}

/// Media source (producer) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: MediaKind,
    /// Codec of the incoming stream, must be one of `media.codecs`
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub ssrc: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            payload_type: 101,
            clock_rate: 90000,
            ssrc: 1989,
        }
    }
}

impl SourceConfig {
    /// RTP parameters of the source, inheriting RTCP feedback from the router codec
    pub fn rtp_parameters(&self, router_codecs: &[RtpCodecCapability]) -> Result<RtpParameters> {
        let router_codec = router_codecs
            .iter()
            .find(|c| {
                c.kind == self.kind
                    && c.mime_type.eq_ignore_ascii_case(&self.mime_type)
                    && c.clock_rate == self.clock_rate
            })
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Source codec {} is not in media.codecs",
                    self.mime_type
                ))
            })?;

        Ok(RtpParameters {
            mid: None,
            codecs: vec![RtpCodecParameters {
                mime_type: router_codec.mime_type.clone(),
                payload_type: self.payload_type,
                clock_rate: self.clock_rate,
                channels: router_codec.channels,
                parameters: router_codec.parameters.clone(),
                rtcp_feedback: router_codec.rtcp_feedback.clone(),
            }],
            header_extensions: vec![],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(self.ssrc),
                ..Default::default()
            }],
            rtcp: RtcpParameters::default(),
        })
    }
}

/// What to do when a session provisions a second transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportReplacePolicy {
    /// Close the previous transport (and its consumer), keep the new one
    #[default]
    Replace,
    /// Refuse while a transport is active
    Reject,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub transport_policy: TransportReplacePolicy,
    /// Upper bound for each media engine call, in milliseconds
    pub engine_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport_policy: TransportReplacePolicy::Replace,
            engine_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn engine_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.engine_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"web": {"http_port": 9000}, "session": {"transport_policy": "reject"}}"#,
        )
        .unwrap();

        assert_eq!(config.web.http_port, 9000);
        assert_eq!(config.web.signaling_path, "/server");
        assert_eq!(config.session.transport_policy, TransportReplacePolicy::Reject);
        assert_eq!(config.session.engine_timeout_ms, 10_000);
        assert_eq!(config.media.codecs.len(), 1);
    }

    #[test]
    fn test_source_parameters_follow_router_codec() {
        let media = MediaConfig::default();
        let params = media.source.rtp_parameters(&media.codecs).unwrap();

        assert_eq!(params.codecs[0].payload_type, 101);
        assert_eq!(params.codecs[0].rtcp_feedback.len(), 5);
        assert_eq!(params.encodings[0].ssrc, Some(1989));
    }

    #[test]
    fn test_source_codec_must_exist() {
        let mut media = MediaConfig::default();
        media.source.mime_type = "video/H264".to_string();
        assert!(media.source.rtp_parameters(&media.codecs).is_err());
    }

    #[test]
    fn test_invalid_listen_ip() {
        let media = MediaConfig {
            listen_ip: "not-an-ip".to_string(),
            ..Default::default()
        };
        assert!(media.listen_ip().is_err());
    }
}
