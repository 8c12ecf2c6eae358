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

//! Shared fixtures: a recording media engine, scripted devices and a
//! scripted SFU on the far side of an in-memory signaling link.
//!
//! Tests run on a paused current-thread runtime inside a `LocalSet`, so
//! `settle()` lets every ready task run without moving the clock further than
//! a millisecond, and `advance()` jumps timers deterministically.

#![allow(dead_code)]

use async_broadcast::{Receiver, TryRecvError};
use async_trait::async_trait;
use serde_json::json;
use sfu_client::{
    MediaConstraints, MediaDevices, MediaEngine, MediaError, MediaTrack, SessionClient,
    SessionConfig, SessionEvent, SessionOptions, TransportDirection,
};
use sfu_transport::{memory_link, MemoryServer};
use sfu_types::signaling::RtpCodecCapability;
use sfu_types::{
    ClientMessage, ConsumerInfo, DtlsParameters, MediaKind, ProducerAppData, ProducerSlot,
    RtpCapabilities, RtpParameters, ServerMessage, StreamAnnouncement, StreamMetadata,
    TransportInfo,
};
use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;

pub const ROOM: &str = "R1";
pub const SEND_ID: &str = "send-1";
pub const RECV_ID: &str = "recv-1";

// =========================================================================
// Runtime helpers
// =========================================================================

pub async fn run_local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}

/// Let every ready task run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// =========================================================================
// Media engine
// =========================================================================

/// Everything the session asked the engine to do.
#[derive(Debug, Default)]
pub struct EngineLog {
    pub loads: usize,
    pub created_transports: Vec<(TransportDirection, String)>,
    pub closed_transports: Vec<String>,
    pub produced: Vec<ProducerSlot>,
    pub closed_producers: Vec<ProducerSlot>,
    pub paused: Vec<ProducerSlot>,
    pub resumed: Vec<ProducerSlot>,
    pub consumed: Vec<String>,
    pub closed_consumers: Vec<String>,
    /// Stream ids whose consume fails in the engine.
    pub fail_consume: HashSet<String>,
}

pub struct FakeEngine {
    log: Rc<RefCell<EngineLog>>,
}

impl FakeEngine {
    pub fn new() -> (Self, Rc<RefCell<EngineLog>>) {
        let log = Rc::new(RefCell::new(EngineLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl MediaEngine for FakeEngine {
    fn load(&mut self, router: &RtpCapabilities) -> Result<RtpCapabilities, MediaError> {
        self.log.borrow_mut().loads += 1;
        Ok(router.clone())
    }

    fn create_transport(
        &mut self,
        direction: TransportDirection,
        info: &TransportInfo,
    ) -> Result<DtlsParameters, MediaError> {
        self.log
            .borrow_mut()
            .created_transports
            .push((direction, info.id.clone()));
        Ok(DtlsParameters::default())
    }

    fn close_transport(&mut self, transport_id: &str) {
        self.log
            .borrow_mut()
            .closed_transports
            .push(transport_id.to_string());
    }

    fn produce(
        &mut self,
        _transport_id: &str,
        slot: ProducerSlot,
        _track: &MediaTrack,
    ) -> Result<RtpParameters, MediaError> {
        self.log.borrow_mut().produced.push(slot);
        Ok(RtpParameters(json!({ "mid": slot.as_str() })))
    }

    fn pause_producer(&mut self, slot: ProducerSlot) {
        self.log.borrow_mut().paused.push(slot);
    }

    fn resume_producer(&mut self, slot: ProducerSlot) {
        self.log.borrow_mut().resumed.push(slot);
    }

    fn close_producer(&mut self, slot: ProducerSlot) {
        self.log.borrow_mut().closed_producers.push(slot);
    }

    fn consume(
        &mut self,
        _transport_id: &str,
        consumer: &ConsumerInfo,
    ) -> Result<MediaTrack, MediaError> {
        let mut log = self.log.borrow_mut();
        if log.fail_consume.contains(&consumer.stream_id) {
            return Err(MediaError::Engine("decoder unavailable".into()));
        }
        log.consumed.push(consumer.stream_id.clone());
        Ok(MediaTrack::new(
            format!("track-{}", consumer.consumer_id),
            consumer.kind,
        ))
    }

    fn close_consumer(&mut self, consumer_id: &str) {
        self.log
            .borrow_mut()
            .closed_consumers
            .push(consumer_id.to_string());
    }
}

// =========================================================================
// Devices
// =========================================================================

#[derive(Debug, Clone, Copy)]
pub struct FakeDevices {
    pub camera: bool,
    pub mic: bool,
}

impl FakeDevices {
    pub fn all() -> Self {
        Self {
            camera: true,
            mic: true,
        }
    }

    pub fn none() -> Self {
        Self {
            camera: false,
            mic: false,
        }
    }
}

#[async_trait(?Send)]
impl MediaDevices for FakeDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<MediaTrack>, MediaError> {
        if constraints.video && !self.camera {
            return Err(MediaError::NotFound("camera".into()));
        }
        if constraints.audio && !self.mic {
            return Err(MediaError::NotFound("microphone".into()));
        }
        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(MediaTrack::new("cam", MediaKind::Video));
        }
        if constraints.audio {
            tracks.push(MediaTrack::new("mic", MediaKind::Audio));
        }
        Ok(tracks)
    }

    async fn get_display_media(&self, with_audio: bool) -> Result<Vec<MediaTrack>, MediaError> {
        let mut tracks = vec![MediaTrack::new("screen-video", MediaKind::Video)];
        if with_audio {
            tracks.push(MediaTrack::new("screen-audio", MediaKind::Audio));
        }
        Ok(tracks)
    }
}

// =========================================================================
// Wire fixtures
// =========================================================================

fn codec(kind: MediaKind, mime: &str) -> RtpCodecCapability {
    RtpCodecCapability {
        kind,
        mime_type: mime.to_string(),
        clock_rate: if kind == MediaKind::Audio { 48_000 } else { 90_000 },
        channels: (kind == MediaKind::Audio).then_some(2),
        preferred_payload_type: None,
        parameters: Default::default(),
        rtcp_feedback: Vec::new(),
    }
}

pub fn router_caps() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            codec(MediaKind::Audio, "audio/opus"),
            codec(MediaKind::Video, "video/VP8"),
        ],
        header_extensions: Vec::new(),
    }
}

pub fn transport(id: &str, is_producer: bool) -> TransportInfo {
    TransportInfo {
        id: id.to_string(),
        is_producer,
        ice_parameters: json!({ "usernameFragment": "u", "password": "p" }),
        ice_candidates: Vec::new(),
        dtls_parameters: DtlsParameters::default(),
        sctp_parameters: None,
    }
}

pub fn announcement(stream_id: &str, metadata: StreamMetadata) -> StreamAnnouncement {
    let publisher_id = stream_id
        .parse::<sfu_types::StreamKey>()
        .map(|k| k.publisher_id)
        .unwrap_or_default();
    StreamAnnouncement {
        stream_id: stream_id.to_string(),
        publisher_id,
        metadata,
    }
}

pub fn consumer_id(stream_id: &str) -> String {
    format!("c-{stream_id}")
}

pub fn consumer_info(stream_id: &str) -> ConsumerInfo {
    let kind = stream_id
        .parse::<sfu_types::StreamKey>()
        .map(|k| k.slot.kind())
        .unwrap_or(MediaKind::Video);
    ConsumerInfo {
        consumer_id: consumer_id(stream_id),
        stream_id: stream_id.to_string(),
        producer_id: format!("p-{stream_id}"),
        kind,
        rtp_parameters: RtpParameters::default(),
        metadata: StreamMetadata::default(),
    }
}

pub fn names(messages: &[ClientMessage]) -> Vec<&'static str> {
    messages.iter().map(ClientMessage::event_name).collect()
}

pub fn consumed_streams(messages: &[ClientMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ClientMessage::Consume { stream_id, .. } => Some(stream_id.clone()),
            _ => None,
        })
        .collect()
}

pub fn create_transport_requests(messages: &[ClientMessage]) -> Vec<bool> {
    messages
        .iter()
        .filter_map(|m| match m {
            ClientMessage::CreateTransport { is_producer, .. } => Some(*is_producer),
            _ => None,
        })
        .collect()
}

// =========================================================================
// Harness
// =========================================================================

pub struct Harness {
    pub peer_id: String,
    pub client: SessionClient,
    pub server: MemoryServer,
    pub engine: Rc<RefCell<EngineLog>>,
    pub events: Receiver<SessionEvent>,
}

impl Harness {
    /// A connected (not yet joined) session.  Must run inside a `LocalSet`.
    pub fn new(peer_id: &str) -> Self {
        Self::with(peer_id, FakeDevices::all(), SessionConfig::default())
    }

    pub fn with(peer_id: &str, devices: FakeDevices, config: SessionConfig) -> Self {
        let (engine, log) = FakeEngine::new();
        let options = SessionOptions::new(ROOM, peer_id).with_config(config);
        let client = SessionClient::new(options, engine, devices);
        let events = client.subscribe_events();
        let (link, server) = memory_link();
        client.connect(link).expect("connect");
        Self {
            peer_id: peer_id.to_string(),
            client,
            server,
            engine: log,
            events,
        }
    }

    pub fn reply(&self, message: ServerMessage) {
        assert!(self.server.send(message), "client dropped its link");
    }

    pub fn sent(&mut self) -> Vec<ClientMessage> {
        self.server.drain()
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Overflowed(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    /// Join and answer up to the transport requests.  Returns what the client
    /// sent along the way.
    pub async fn join(&mut self) -> Vec<ClientMessage> {
        self.client.join().expect("join");
        settle().await;
        self.reply(ServerMessage::RouterCapabilities {
            router_rtp_capabilities: router_caps(),
        });
        settle().await;
        self.reply(ServerMessage::RtpCapabilitiesSet {});
        settle().await;
        self.sent()
    }

    pub async fn create_transports(&mut self) {
        self.reply(ServerMessage::TransportCreated(transport(SEND_ID, true)));
        self.reply(ServerMessage::TransportCreated(transport(RECV_ID, false)));
        settle().await;
    }

    pub async fn connect_transport(&mut self, transport_id: &str) {
        self.reply(ServerMessage::TransportConnected {
            transport_id: transport_id.to_string(),
        });
        settle().await;
    }

    /// Acknowledge every `produce` among `messages`.
    pub async fn ack_produces(&mut self, messages: &[ClientMessage]) -> Vec<ProducerSlot> {
        let mut slots = Vec::new();
        for message in messages {
            if let ClientMessage::Produce { kind, app_data, .. } = message {
                slots.push(app_data.slot);
                self.reply(ServerMessage::ProducerCreated {
                    producer_id: format!("prod-{}", app_data.slot),
                    stream_id: format!("{}-{}", self.peer_id, app_data.slot),
                    kind: *kind,
                    app_data: ProducerAppData {
                        slot: app_data.slot,
                    },
                });
            }
        }
        settle().await;
        slots
    }

    /// Join with both transports connected and local media published.
    pub async fn establish(&mut self) {
        self.join().await;
        self.create_transports().await;
        self.connect_transport(SEND_ID).await;
        self.connect_transport(RECV_ID).await;
        let sent = self.sent();
        self.ack_produces(&sent).await;
        self.sent();
        self.take_events();
    }

    /// Answer every `consume` among `messages` with a consumer.
    pub async fn serve_consumes(&mut self, messages: &[ClientMessage]) -> Vec<String> {
        let streams = consumed_streams(messages);
        for stream_id in &streams {
            self.reply(ServerMessage::ConsumerCreated(consumer_info(stream_id)));
        }
        settle().await;
        streams
    }

    pub async fn announce(&mut self, stream_id: &str, metadata: StreamMetadata) {
        self.reply(ServerMessage::StreamAdded(announcement(stream_id, metadata)));
        settle().await;
    }

    /// Announce a stream on an established session and serve its consumer.
    /// Returns what the client sent after the consumer arrived.
    pub async fn announce_and_consume(
        &mut self,
        stream_id: &str,
        metadata: StreamMetadata,
    ) -> Vec<ClientMessage> {
        self.announce(stream_id, metadata).await;
        let sent = self.sent();
        assert_eq!(consumed_streams(&sent), vec![stream_id.to_string()]);
        self.serve_consumes(&sent).await;
        self.sent()
    }

    pub fn registry_ids(&self) -> Vec<String> {
        self.client
            .registry_snapshot()
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }
}

pub fn video() -> StreamMetadata {
    StreamMetadata {
        video: Some(true),
        ..Default::default()
    }
}

pub fn audio() -> StreamMetadata {
    StreamMetadata {
        audio: Some(true),
        ..Default::default()
    }
}
