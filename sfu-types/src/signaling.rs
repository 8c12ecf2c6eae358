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

//! Signaling messages exchanged with the SFU.
//!
//! Every frame on the wire is `{"event": "<kebab-name>", "data": {...}}` with
//! camelCase field names inside `data`.

use crate::metadata::StreamMetadata;
use crate::stream_key::{MediaKind, ProducerSlot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Router or device RTP capabilities.  The client only inspects enough of
/// them to validate the handshake; the rest is carried verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,

    #[serde(default)]
    pub header_extensions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Opaque RTP send/receive parameters, produced and consumed by the media engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub Value);

/// Server-side description of a freshly allocated transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub id: String,
    pub is_producer: bool,

    #[serde(default)]
    pub ice_parameters: Value,

    #[serde(default)]
    pub ice_candidates: Vec<Value>,

    #[serde(default)]
    pub dtls_parameters: DtlsParameters,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerAppData {
    pub slot: ProducerSlot,
}

/// A remote stream the client may consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamAnnouncement {
    pub stream_id: String,
    pub publisher_id: String,

    #[serde(default)]
    pub metadata: StreamMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub consumer_id: String,
    pub stream_id: String,
    pub producer_id: String,
    pub kind: MediaKind,

    #[serde(default)]
    pub rtp_parameters: RtpParameters,

    #[serde(default)]
    pub metadata: StreamMetadata,
}

/// Error codes the client reacts to.  Anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    RoomPasswordRequired,
    StreamNotPrioritized,
    Other(String),
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "ROOM_PASSWORD_REQUIRED" => ErrorCode::RoomPasswordRequired,
            "STREAM_NOT_PRIORITIZED" => ErrorCode::StreamNotPrioritized,
            _ => ErrorCode::Other(code),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::RoomPasswordRequired => f.write_str("ROOM_PASSWORD_REQUIRED"),
            ErrorCode::StreamNotPrioritized => f.write_str("STREAM_NOT_PRIORITIZED"),
            ErrorCode::Other(code) => f.write_str(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    pub code: ErrorCode,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Join {
        room_id: String,
        peer_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    SetRtpCapabilities {
        rtp_capabilities: RtpCapabilities,
    },
    CreateTransport {
        room_id: String,
        is_producer: bool,
    },
    ConnectTransport {
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        metadata: StreamMetadata,
        app_data: ProducerAppData,
    },
    Update {
        stream_id: String,
        metadata: StreamMetadata,
    },
    Unpublish {
        stream_id: String,
    },
    GetStreams {
        room_id: String,
    },
    Consume {
        stream_id: String,
        transport_id: String,
    },
    ResumeConsumer {
        consumer_id: String,
    },
    MySpeaking {
        room_id: String,
        peer_id: String,
    },
    StopSpeaking {
        room_id: String,
        peer_id: String,
    },
    Presence {
        room_id: String,
        peer_id: String,
        metadata: StreamMetadata,
    },
    LockRoom {
        room_id: String,
        peer_id: String,
    },
    UnlockRoom {
        room_id: String,
        peer_id: String,
    },
    LeaveRoom {
        room_id: String,
        peer_id: String,
    },
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::SetRtpCapabilities { .. } => "set-rtp-capabilities",
            ClientMessage::CreateTransport { .. } => "create-transport",
            ClientMessage::ConnectTransport { .. } => "connect-transport",
            ClientMessage::Produce { .. } => "produce",
            ClientMessage::Update { .. } => "update",
            ClientMessage::Unpublish { .. } => "unpublish",
            ClientMessage::GetStreams { .. } => "get-streams",
            ClientMessage::Consume { .. } => "consume",
            ClientMessage::ResumeConsumer { .. } => "resume-consumer",
            ClientMessage::MySpeaking { .. } => "my-speaking",
            ClientMessage::StopSpeaking { .. } => "stop-speaking",
            ClientMessage::Presence { .. } => "presence",
            ClientMessage::LockRoom { .. } => "lock-room",
            ClientMessage::UnlockRoom { .. } => "unlock-room",
            ClientMessage::LeaveRoom { .. } => "leave-room",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    RouterCapabilities {
        router_rtp_capabilities: RtpCapabilities,
    },
    RtpCapabilitiesSet {},
    TransportCreated(TransportInfo),
    TransportConnected {
        transport_id: String,
    },
    ProducerCreated {
        producer_id: String,
        stream_id: String,
        kind: MediaKind,
        app_data: ProducerAppData,
    },
    Streams(Vec<StreamAnnouncement>),
    StreamAdded(StreamAnnouncement),
    StreamRemoved {
        stream_id: String,
        #[serde(default)]
        publisher_id: Option<String>,
    },
    StreamUpdated(StreamAnnouncement),
    ConsumerCreated(ConsumerInfo),
    ConsumerResumed {
        #[serde(default)]
        consumer_id: Option<String>,
    },
    ConsumerClosed {
        consumer_id: String,
        #[serde(default)]
        stream_id: Option<String>,
    },
    UserSpeaking {
        peer_id: String,
    },
    UserStoppedSpeaking {
        peer_id: String,
    },
    Presence {
        peer_id: String,
        #[serde(default)]
        metadata: StreamMetadata,
    },
    RoomLocked {
        locked: bool,
        #[serde(default)]
        locked_by: Option<String>,
        #[serde(default)]
        unlocked_by: Option<String>,
    },
    PeerLeft {
        peer_id: String,
    },
    UserRemoved {
        peer_id: String,
    },
    ReconnectRequired {
        reason: String,
        #[serde(default)]
        message: Option<String>,
    },
    Error(ServerError),
}

impl ServerMessage {
    /// Parse one text frame.  A frame without `data` is treated as carrying
    /// an empty object so payload-less acks still decode.
    pub fn from_json(text: &str) -> serde_json::Result<ServerMessage> {
        let mut frame: Value = serde_json::from_str(text)?;
        if let Value::Object(map) = &mut frame {
            if !map.contains_key("data") || map.get("data") == Some(&Value::Null) {
                map.insert("data".to_string(), Value::Object(Map::new()));
            }
        }
        serde_json::from_value(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_serializes_as_event_envelope() {
        let msg = ClientMessage::Join {
            room_id: "R1".into(),
            peer_id: "alice".into(),
            password: None,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"event": "join", "data": {"roomId": "R1", "peerId": "alice"}})
        );
        assert_eq!(msg.event_name(), "join");
    }

    #[test]
    fn produce_carries_slot_in_app_data() {
        let msg = ClientMessage::Produce {
            transport_id: "t1".into(),
            kind: MediaKind::Audio,
            rtp_parameters: RtpParameters(json!({"mid": "0"})),
            metadata: StreamMetadata::default(),
            app_data: ProducerAppData {
                slot: ProducerSlot::ScreenAudio,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "produce");
        assert_eq!(value["data"]["kind"], "audio");
        assert_eq!(value["data"]["appData"]["slot"], "screen-audio");
        assert_eq!(value["data"]["rtpParameters"]["mid"], "0");
    }

    #[test]
    fn parses_transport_created() {
        let msg = ServerMessage::from_json(
            r#"{"event":"transport-created","data":{"id":"t-9","isProducer":false,
                "iceParameters":{},"iceCandidates":[],"dtlsParameters":{"fingerprints":[]}}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::TransportCreated(info) => {
                assert_eq!(info.id, "t-9");
                assert!(!info.is_producer);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_payloadless_ack() {
        assert_eq!(
            ServerMessage::from_json(r#"{"event":"rtp-capabilities-set"}"#).unwrap(),
            ServerMessage::RtpCapabilitiesSet {}
        );
        assert_eq!(
            ServerMessage::from_json(r#"{"event":"consumer-resumed","data":null}"#).unwrap(),
            ServerMessage::ConsumerResumed { consumer_id: None }
        );
    }

    #[test]
    fn parses_stream_list() {
        let msg = ServerMessage::from_json(
            r#"{"event":"streams","data":[
                {"streamId":"bob-webcam","publisherId":"bob","metadata":{"video":true}},
                {"streamId":"bob-mic","publisherId":"bob"}]}"#,
        )
        .unwrap();
        let ServerMessage::Streams(list) = msg else {
            panic!("expected streams");
        };
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].metadata.video, Some(true));
        assert_eq!(list[1].metadata, StreamMetadata::default());
    }

    #[test]
    fn error_codes_are_classified() {
        let msg = ServerMessage::from_json(
            r#"{"event":"error","data":{
                "code":"STREAM_NOT_PRIORITIZED","message":"busy","streamId":"bob-webcam"
            }}"#,
        )
        .unwrap();
        let ServerMessage::Error(err) = msg else {
            panic!("expected error");
        };
        assert_eq!(err.code, ErrorCode::StreamNotPrioritized);
        assert_eq!(err.stream_id.as_deref(), Some("bob-webcam"));

        let code: ErrorCode = "ROOM_FULL".to_string().into();
        assert_eq!(code, ErrorCode::Other("ROOM_FULL".into()));
        assert_eq!(code.to_string(), "ROOM_FULL");
    }

    #[test]
    fn unknown_events_fail_to_parse() {
        assert!(ServerMessage::from_json(r#"{"event":"quiz-started","data":{}}"#).is_err());
    }
}
