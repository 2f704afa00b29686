//! Capability matching between the router, its producers and client devices

use rand::distributions::Alphanumeric;
use rand::Rng;

use super::types::{
    MediaKind, RtcpFeedback, RtcpParameters, RtpCapabilities, RtpCodecCapability,
    RtpCodecParameters, RtpEncodingParameters, RtpHeaderExtension, RtpHeaderExtensionParameters,
    RtpParameters,
};
use super::{EngineError, EngineResult};

/// First dynamic payload type handed out to router codecs
const DYNAMIC_PAYLOAD_TYPE_START: u8 = 100;
const DYNAMIC_PAYLOAD_TYPE_END: u8 = 127;

/// Header extensions the router offers for video
pub fn default_header_extensions() -> Vec<RtpHeaderExtension> {
    [
        (1, "urn:ietf:params:rtp-hdrext:sdes:mid"),
        (4, "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time"),
        (
            5,
            "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01",
        ),
    ]
    .into_iter()
    .map(|(id, uri)| RtpHeaderExtension {
        kind: MediaKind::Video,
        uri: uri.to_string(),
        preferred_id: id,
        preferred_encrypt: false,
        direction: None,
    })
    .collect()
}

/// Build router capabilities from the configured media codecs.
///
/// Codecs without a fixed payload type get the next free dynamic one, in
/// declaration order.
pub fn router_capabilities(
    media_codecs: &[RtpCodecCapability],
    header_extensions: Vec<RtpHeaderExtension>,
) -> EngineResult<RtpCapabilities> {
    let mut taken: Vec<u8> = media_codecs
        .iter()
        .filter_map(|c| c.preferred_payload_type)
        .collect();
    let mut next = DYNAMIC_PAYLOAD_TYPE_START;

    let mut codecs = Vec::with_capacity(media_codecs.len());
    for codec in media_codecs {
        if !codec.mime_type.contains('/') {
            return Err(EngineError::InvalidParameters(format!(
                "invalid codec mime type: {}",
                codec.mime_type
            )));
        }

        let mut codec = codec.clone();
        if codec.preferred_payload_type.is_none() {
            while taken.contains(&next) {
                next += 1;
            }
            if next > DYNAMIC_PAYLOAD_TYPE_END {
                return Err(EngineError::InvalidParameters(
                    "no dynamic payload types left".to_string(),
                ));
            }
            codec.preferred_payload_type = Some(next);
            taken.push(next);
        }
        codecs.push(codec);
    }

    Ok(RtpCapabilities {
        codecs,
        header_extensions,
    })
}

fn codec_matches(producer: &RtpCodecParameters, cap: &RtpCodecCapability) -> bool {
    producer.mime_type.eq_ignore_ascii_case(&cap.mime_type)
        && producer.clock_rate == cap.clock_rate
        && producer.channels.unwrap_or(1) == cap.channels.unwrap_or(1)
}

/// Whether a device with `caps` can receive anything from a producer
pub fn can_consume(producer: &RtpParameters, caps: &RtpCapabilities) -> bool {
    producer
        .codecs
        .iter()
        .any(|pc| caps.codecs.iter().any(|cap| codec_matches(pc, cap)))
}

/// Derive the RTP parameters of a new consumer.
///
/// The first producer codec the device supports is kept, renumbered to the
/// device's preferred payload type. RTCP feedback is restricted to what both
/// sides announce and header extensions to those the device knows.
pub fn consumer_rtp_parameters(
    kind: MediaKind,
    producer: &RtpParameters,
    caps: &RtpCapabilities,
) -> EngineResult<RtpParameters> {
    let (codec, cap) = producer
        .codecs
        .iter()
        .find_map(|pc| {
            caps.codecs
                .iter()
                .find(|cap| cap.kind == kind && codec_matches(pc, cap))
                .map(|cap| (pc, cap))
        })
        .ok_or_else(|| {
            EngineError::CannotConsume("no codec in common with the producer".to_string())
        })?;

    let rtcp_feedback: Vec<RtcpFeedback> = codec
        .rtcp_feedback
        .iter()
        .filter(|fb| cap.rtcp_feedback.contains(fb))
        .cloned()
        .collect();

    let header_extensions = caps
        .header_extensions
        .iter()
        .filter(|ext| ext.kind == kind)
        .map(|ext| RtpHeaderExtensionParameters {
            uri: ext.uri.clone(),
            id: ext.preferred_id,
            encrypt: ext.preferred_encrypt,
        })
        .collect();

    let mut rng = rand::thread_rng();
    let ssrc = rng.gen_range(100_000_000..=u32::MAX);
    let cname: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    Ok(RtpParameters {
        mid: None,
        codecs: vec![RtpCodecParameters {
            mime_type: codec.mime_type.clone(),
            payload_type: cap.preferred_payload_type.unwrap_or(codec.payload_type),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            parameters: codec.parameters.clone(),
            rtcp_feedback,
        }],
        header_extensions,
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(ssrc),
            ..Default::default()
        }],
        rtcp: RtcpParameters {
            cname: Some(cname),
            reduced_size: true,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn vp8(pt: Option<u8>, feedback: Vec<RtcpFeedback>) -> RtpCodecCapability {
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: pt,
            clock_rate: 90000,
            channels: None,
            parameters: Map::new(),
            rtcp_feedback: feedback,
        }
    }

    fn producer_params() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".to_string(),
                payload_type: 101,
                clock_rate: 90000,
                channels: None,
                parameters: Map::new(),
                rtcp_feedback: vec![
                    RtcpFeedback::new("nack"),
                    RtcpFeedback::with_parameter("nack", "pli"),
                    RtcpFeedback::new("goog-remb"),
                ],
            }],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(1989),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_router_capabilities_assigns_payload_types() {
        let mut h264 = vp8(None, vec![]);
        h264.mime_type = "video/H264".to_string();
        let caps =
            router_capabilities(&[vp8(Some(100), vec![]), h264], default_header_extensions())
                .unwrap();

        assert_eq!(caps.codecs[0].preferred_payload_type, Some(100));
        assert_eq!(caps.codecs[1].preferred_payload_type, Some(101));
        assert_eq!(caps.header_extensions.len(), 3);
    }

    #[test]
    fn test_router_capabilities_rejects_bad_mime() {
        let mut codec = vp8(None, vec![]);
        codec.mime_type = "VP8".to_string();
        assert!(router_capabilities(&[codec], vec![]).is_err());
    }

    #[test]
    fn test_consumer_parameters_use_device_payload_type() {
        let caps = RtpCapabilities {
            codecs: vec![vp8(
                Some(96),
                vec![RtcpFeedback::new("nack"), RtcpFeedback::new("transport-cc")],
            )],
            header_extensions: default_header_extensions(),
        };

        let params = consumer_rtp_parameters(MediaKind::Video, &producer_params(), &caps).unwrap();
        let codec = &params.codecs[0];
        assert_eq!(codec.payload_type, 96);
        assert_eq!(codec.rtcp_feedback, vec![RtcpFeedback::new("nack")]);
        assert_eq!(params.header_extensions.len(), 3);
        assert!(params.encodings[0].ssrc.is_some());
        assert_eq!(params.rtcp.cname.as_ref().map(|c| c.len()), Some(8));
    }

    #[test]
    fn test_mime_type_match_is_case_insensitive() {
        let mut cap = vp8(Some(96), vec![]);
        cap.mime_type = "video/vp8".to_string();
        let caps = RtpCapabilities {
            codecs: vec![cap],
            header_extensions: vec![],
        };
        assert!(can_consume(&producer_params(), &caps));
    }

    #[test]
    fn test_no_common_codec() {
        let mut cap = vp8(Some(96), vec![]);
        cap.mime_type = "video/H264".to_string();
        let caps = RtpCapabilities {
            codecs: vec![cap],
            header_extensions: vec![],
        };

        assert!(!can_consume(&producer_params(), &caps));
        let err = consumer_rtp_parameters(MediaKind::Video, &producer_params(), &caps).unwrap_err();
        assert!(matches!(err, EngineError::CannotConsume(_)));
    }

    #[test]
    fn test_kind_must_match() {
        let caps = RtpCapabilities {
            codecs: vec![vp8(Some(96), vec![])],
            header_extensions: vec![],
        };
        assert!(consumer_rtp_parameters(MediaKind::Audio, &producer_params(), &caps).is_err());
    }
}
