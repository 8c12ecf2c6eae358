/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Headless stand-ins for the capture devices and the WebRTC stack.
//!
//! The bot never moves real RTP.  It exercises the signaling state machine
//! with tracks that exist only as handles, which is enough to drive a room
//! full of publishers for load and soak testing.

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use sfu_client::{
    MediaConstraints, MediaDevices, MediaEngine, MediaError, MediaTrack, TransportDirection,
};
use sfu_types::signaling::DtlsFingerprint;
use sfu_types::{
    ConsumerInfo, DtlsParameters, MediaKind, ProducerSlot, RtpCapabilities, RtpParameters,
    TransportInfo,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Codecs the synthetic engine claims to handle.
const SUPPORTED_MIME_TYPES: [&str; 3] = ["audio/opus", "video/VP8", "video/H264"];

pub struct SyntheticDevices {
    pub video: bool,
    pub audio: bool,
}

#[async_trait(?Send)]
impl MediaDevices for SyntheticDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<MediaTrack>, MediaError> {
        let mut tracks = Vec::new();
        if constraints.video && self.video {
            tracks.push(MediaTrack::with_label(
                "synthetic-camera",
                MediaKind::Video,
                "Synthetic camera",
            ));
        }
        if constraints.audio && self.audio {
            tracks.push(MediaTrack::with_label(
                "synthetic-mic",
                MediaKind::Audio,
                "Synthetic microphone",
            ));
        }
        if tracks.is_empty() {
            return Err(MediaError::NotFound("no synthetic devices enabled".into()));
        }
        Ok(tracks)
    }

    async fn get_display_media(&self, _with_audio: bool) -> Result<Vec<MediaTrack>, MediaError> {
        Err(MediaError::Unsupported(
            "screen capture is not available headless".into(),
        ))
    }
}

#[derive(Default)]
pub struct SyntheticEngine {
    loaded: Option<RtpCapabilities>,
    transports: HashMap<String, TransportDirection>,
    producers: HashMap<ProducerSlot, u32>,
    consumers: HashSet<String>,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn codec_for(&self, kind: MediaKind) -> Option<String> {
        self.loaded.as_ref().and_then(|caps| {
            caps.codecs
                .iter()
                .find(|c| c.kind == kind)
                .map(|c| c.mime_type.clone())
        })
    }
}

fn random_fingerprint() -> String {
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| format!("{:02X}", rng.gen::<u8>()))
        .collect::<Vec<_>>()
        .join(":")
}

impl MediaEngine for SyntheticEngine {
    fn load(&mut self, router: &RtpCapabilities) -> Result<RtpCapabilities, MediaError> {
        let codecs: Vec<_> = router
            .codecs
            .iter()
            .filter(|c| {
                SUPPORTED_MIME_TYPES
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(&c.mime_type))
            })
            .cloned()
            .collect();
        if codecs.is_empty() {
            return Err(MediaError::Unsupported(
                "router offers no codec this engine can use".into(),
            ));
        }
        info!("Loaded {} of {} router codecs", codecs.len(), router.codecs.len());
        let caps = RtpCapabilities {
            codecs,
            header_extensions: router.header_extensions.clone(),
        };
        self.loaded = Some(caps.clone());
        Ok(caps)
    }

    fn create_transport(
        &mut self,
        direction: TransportDirection,
        info: &TransportInfo,
    ) -> Result<DtlsParameters, MediaError> {
        if self.loaded.is_none() {
            return Err(MediaError::Engine("capabilities not loaded".into()));
        }
        debug!("Creating {direction} transport {}", info.id);
        self.transports.insert(info.id.clone(), direction);
        Ok(DtlsParameters {
            role: Some("client".into()),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: random_fingerprint(),
            }],
        })
    }

    fn close_transport(&mut self, transport_id: &str) {
        self.transports.remove(transport_id);
    }

    fn produce(
        &mut self,
        transport_id: &str,
        slot: ProducerSlot,
        track: &MediaTrack,
    ) -> Result<RtpParameters, MediaError> {
        if self.transports.get(transport_id) != Some(&TransportDirection::Send) {
            return Err(MediaError::Engine(format!(
                "{transport_id} is not a send transport"
            )));
        }
        let mime_type = self
            .codec_for(track.kind())
            .ok_or_else(|| MediaError::Unsupported(format!("no {} codec", track.kind().as_str())))?;
        let ssrc = rand::thread_rng().gen::<u32>();
        self.producers.insert(slot, ssrc);
        Ok(RtpParameters(json!({
            "mid": slot.as_str(),
            "codecs": [{ "mimeType": mime_type }],
            "encodings": [{ "ssrc": ssrc }],
        })))
    }

    fn pause_producer(&mut self, slot: ProducerSlot) {
        debug!("Pausing {slot}");
    }

    fn resume_producer(&mut self, slot: ProducerSlot) {
        debug!("Resuming {slot}");
    }

    fn close_producer(&mut self, slot: ProducerSlot) {
        self.producers.remove(&slot);
    }

    fn consume(
        &mut self,
        transport_id: &str,
        consumer: &ConsumerInfo,
    ) -> Result<MediaTrack, MediaError> {
        if self.transports.get(transport_id) != Some(&TransportDirection::Recv) {
            return Err(MediaError::Engine(format!(
                "{transport_id} is not a receive transport"
            )));
        }
        self.consumers.insert(consumer.consumer_id.clone());
        Ok(MediaTrack::with_label(
            format!("remote-{}", consumer.consumer_id),
            consumer.kind,
            consumer.stream_id.clone(),
        ))
    }

    fn close_consumer(&mut self, consumer_id: &str) {
        self.consumers.remove(consumer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfu_types::signaling::RtpCodecCapability;
    use sfu_types::StreamMetadata;

    fn codec(kind: MediaKind, mime_type: &str) -> RtpCodecCapability {
        RtpCodecCapability {
            kind,
            mime_type: mime_type.to_string(),
            clock_rate: 90000,
            channels: None,
            preferred_payload_type: None,
            parameters: Default::default(),
            rtcp_feedback: Vec::new(),
        }
    }

    fn transport(id: &str, is_producer: bool) -> TransportInfo {
        TransportInfo {
            id: id.to_string(),
            is_producer,
            ice_parameters: json!({}),
            ice_candidates: Vec::new(),
            dtls_parameters: DtlsParameters::default(),
            sctp_parameters: None,
        }
    }

    fn loaded_engine() -> SyntheticEngine {
        let mut engine = SyntheticEngine::new();
        let router = RtpCapabilities {
            codecs: vec![
                codec(MediaKind::Audio, "audio/opus"),
                codec(MediaKind::Video, "video/AV1"),
                codec(MediaKind::Video, "video/VP8"),
            ],
            header_extensions: Vec::new(),
        };
        let caps = engine.load(&router).unwrap();
        assert_eq!(caps.codecs.len(), 2);
        engine
    }

    #[test]
    fn load_rejects_routers_without_usable_codecs() {
        let mut engine = SyntheticEngine::new();
        let router = RtpCapabilities {
            codecs: vec![codec(MediaKind::Video, "video/AV1")],
            header_extensions: Vec::new(),
        };
        assert!(matches!(
            engine.load(&router),
            Err(MediaError::Unsupported(_))
        ));
    }

    #[test]
    fn transports_carry_a_fingerprint() {
        let mut engine = loaded_engine();
        let dtls = engine
            .create_transport(TransportDirection::Send, &transport("send-1", true))
            .unwrap();
        assert_eq!(dtls.fingerprints.len(), 1);
        assert_eq!(dtls.fingerprints[0].algorithm, "sha-256");
        assert_eq!(dtls.fingerprints[0].value.split(':').count(), 32);
    }

    #[test]
    fn produce_and_consume_need_the_right_transport() {
        let mut engine = loaded_engine();
        engine
            .create_transport(TransportDirection::Send, &transport("send-1", true))
            .unwrap();
        engine
            .create_transport(TransportDirection::Recv, &transport("recv-1", false))
            .unwrap();

        let cam = MediaTrack::new("cam", MediaKind::Video);
        let params = engine.produce("send-1", ProducerSlot::Webcam, &cam).unwrap();
        assert_eq!(params.0["codecs"][0]["mimeType"], "video/VP8");
        assert!(engine.produce("recv-1", ProducerSlot::Webcam, &cam).is_err());

        let info = ConsumerInfo {
            consumer_id: "c-1".into(),
            stream_id: "bob-mic".into(),
            producer_id: "p-1".into(),
            kind: MediaKind::Audio,
            rtp_parameters: RtpParameters::default(),
            metadata: StreamMetadata::default(),
        };
        let track = engine.consume("recv-1", &info).unwrap();
        assert_eq!(track.kind(), MediaKind::Audio);
        assert_eq!(track.label(), "bob-mic");
        assert!(engine.consume("send-1", &info).is_err());
    }

    #[tokio::test]
    async fn devices_follow_their_switches() {
        let devices = SyntheticDevices {
            video: false,
            audio: true,
        };
        let tracks = devices
            .get_user_media(MediaConstraints {
                video: true,
                audio: true,
            })
            .await
            .unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].kind(), MediaKind::Audio);
        assert!(devices.get_display_media(true).await.is_err());

        let silent = SyntheticDevices {
            video: false,
            audio: false,
        };
        assert!(silent
            .get_user_media(MediaConstraints {
                video: true,
                audio: true,
            })
            .await
            .is_err());
    }
}
