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

//! Media handles and the two seams the session drives: device access and the
//! WebRTC engine.
//!
//! The session never touches a codec or a socket carrying RTP.  It asks
//! [`MediaDevices`] for tracks and tells [`MediaEngine`] what to build; the
//! engine reports network-driven changes back as [`EngineEvent`]s.

use crate::error::MediaError;
use async_trait::async_trait;
use sfu_types::{
    ConsumerInfo, DtlsParameters, MediaKind, ProducerSlot, RtpCapabilities, RtpParameters,
    TransportInfo,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct TrackInner {
    id: String,
    kind: MediaKind,
    label: String,
    enabled: AtomicBool,
    ended: AtomicBool,
}

/// Handle on one audio or video track.
///
/// Clones share state: disabling a clone disables the track everywhere it is
/// rendered or published.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self::with_label(id, kind, "")
    }

    pub fn with_label(id: impl Into<String>, kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: label.into(),
                enabled: AtomicBool::new(true),
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Relaxed)
    }

    /// Release the underlying source.  Irreversible.
    pub fn stop(&self) {
        self.inner.ended.store(true, Ordering::Relaxed);
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.id == other.inner.id
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// A set of tracks rendered together.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaStream {
    pub id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_tracks(
        id: impl Into<String>,
        tracks: impl IntoIterator<Item = MediaTrack>,
    ) -> Self {
        let mut stream = Self::new(id);
        for track in tracks {
            stream.add_track(track);
        }
        stream
    }

    /// Append a track unless a track with the same id is already present.
    pub fn add_track(&mut self, track: MediaTrack) -> bool {
        if self.tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn remove_track(&mut self, track_id: &str) -> Option<MediaTrack> {
        let pos = self.tracks.iter().position(|t| t.id() == track_id)?;
        Some(self.tracks.remove(pos))
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.tracks_of(kind).next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

/// Camera, microphone and screen capture.
#[async_trait(?Send)]
pub trait MediaDevices {
    /// Open capture devices.  Returns the tracks obtained; an error means
    /// nothing was opened.
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<MediaTrack>, MediaError>;

    /// Ask the user for a screen (and optionally system audio) to share.
    async fn get_display_media(&self, with_audio: bool) -> Result<Vec<MediaTrack>, MediaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportDirection {
    Send,
    Recv,
}

impl TransportDirection {
    pub fn is_producer(&self) -> bool {
        matches!(self, TransportDirection::Send)
    }

    pub fn from_is_producer(is_producer: bool) -> Self {
        if is_producer {
            TransportDirection::Send
        } else {
            TransportDirection::Recv
        }
    }
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportDirection::Send => f.write_str("send"),
            TransportDirection::Recv => f.write_str("recv"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// States a transport never leaves; it is replaced instead.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportState::Disconnected | TransportState::Failed | TransportState::Closed
        )
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    Poor,
    Good,
}

/// Things the engine (or the platform under it) observed on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    TransportStateChanged {
        transport_id: String,
        state: TransportState,
    },
    /// A local track ended outside the session's control (device unplugged,
    /// browser "stop sharing" bar).
    TrackEnded { track_id: String },
    NetworkQuality(NetworkQuality),
}

/// The local WebRTC stack, in the shape of a mediasoup-client `Device`.
///
/// All calls are local; the session carries every server round-trip itself.
pub trait MediaEngine {
    /// Load the router's capabilities and return what this device can do
    /// with them.
    fn load(&mut self, router: &RtpCapabilities) -> Result<RtpCapabilities, MediaError>;

    /// Build the local half of a server transport.  Returns the DTLS
    /// parameters to send in `connect-transport`.
    fn create_transport(
        &mut self,
        direction: TransportDirection,
        info: &TransportInfo,
    ) -> Result<DtlsParameters, MediaError>;

    fn close_transport(&mut self, transport_id: &str);

    /// Attach `track` to the send transport.  Returns the RTP parameters to
    /// send in `produce`.
    fn produce(
        &mut self,
        transport_id: &str,
        slot: ProducerSlot,
        track: &MediaTrack,
    ) -> Result<RtpParameters, MediaError>;

    fn pause_producer(&mut self, slot: ProducerSlot);

    fn resume_producer(&mut self, slot: ProducerSlot);

    fn close_producer(&mut self, slot: ProducerSlot);

    /// Build a receiver for a server-side consumer and return its track.
    fn consume(
        &mut self,
        transport_id: &str,
        consumer: &ConsumerInfo,
    ) -> Result<MediaTrack, MediaError>;

    fn close_consumer(&mut self, consumer_id: &str);
}
