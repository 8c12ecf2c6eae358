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

//! Local media and the four producer slots.
//!
//! A slot moves `Idle → Publishing → Live` and back to `Idle` when closed or
//! reset.  `begin_publish` only succeeds from `Idle`, which is what keeps a
//! slot at one live producer no matter how often publishing is requested.

use crate::media::{MediaConstraints, MediaDevices, MediaStream, MediaTrack};
use log::{debug, info, warn};
use sfu_types::{MediaKind, ProducerSlot, StreamMetadata, LOCAL_SCREEN_STREAM_ID, LOCAL_STREAM_ID};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    /// `produce` sent, waiting for `producer-created`.
    Publishing,
    Live {
        producer_id: String,
        stream_id: String,
        paused: bool,
    },
}

/// Which step of the device fallback chain succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    CameraAndMic,
    MicOnly,
    CameraOnly,
    /// Nothing could be opened; the participant is announced by presence.
    PresenceOnly,
}

impl AcquisitionOutcome {
    fn from_tracks(tracks: &[MediaTrack]) -> Self {
        let video = tracks.iter().any(|t| t.kind() == MediaKind::Video);
        let audio = tracks.iter().any(|t| t.kind() == MediaKind::Audio);
        match (video, audio) {
            (true, true) => AcquisitionOutcome::CameraAndMic,
            (false, true) => AcquisitionOutcome::MicOnly,
            (true, false) => AcquisitionOutcome::CameraOnly,
            (false, false) => AcquisitionOutcome::PresenceOnly,
        }
    }

    pub fn has_camera(&self) -> bool {
        matches!(
            self,
            AcquisitionOutcome::CameraAndMic | AcquisitionOutcome::CameraOnly
        )
    }

    pub fn has_mic(&self) -> bool {
        matches!(
            self,
            AcquisitionOutcome::CameraAndMic | AcquisitionOutcome::MicOnly
        )
    }
}

#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub outcome: AcquisitionOutcome,
    pub tracks: Vec<MediaTrack>,
}

const FALLBACK_CHAIN: [MediaConstraints; 3] = [
    MediaConstraints {
        video: true,
        audio: true,
    },
    MediaConstraints {
        video: false,
        audio: true,
    },
    MediaConstraints {
        video: true,
        audio: false,
    },
];

/// Open camera and microphone, falling back to fewer devices until something
/// works.  Never fails: the last resort is [`AcquisitionOutcome::PresenceOnly`].
pub async fn acquire_local_media(devices: &dyn MediaDevices) -> LocalMedia {
    for constraints in FALLBACK_CHAIN {
        match devices.get_user_media(constraints).await {
            Ok(tracks) if !tracks.is_empty() => {
                let outcome = AcquisitionOutcome::from_tracks(&tracks);
                info!("Local media acquired: {outcome:?}");
                return LocalMedia { outcome, tracks };
            }
            Ok(_) => debug!("No tracks for {constraints:?}"),
            Err(e) => debug!("get_user_media({constraints:?}) failed: {e}"),
        }
    }
    warn!("No camera or microphone available, joining with presence only");
    LocalMedia {
        outcome: AcquisitionOutcome::PresenceOnly,
        tracks: Vec::new(),
    }
}

#[derive(Debug, Default)]
pub struct ProducerManager {
    slots: BTreeMap<ProducerSlot, SlotState>,
    tracks: BTreeMap<ProducerSlot, MediaTrack>,
    outcome: Option<AcquisitionOutcome>,
}

impl ProducerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the result of [`acquire_local_media`].  Replaces any camera and
    /// microphone tracks held before.
    pub fn set_local_media(&mut self, media: LocalMedia) {
        self.outcome = Some(media.outcome);
        for track in media.tracks {
            let slot = match track.kind() {
                MediaKind::Video => ProducerSlot::Webcam,
                MediaKind::Audio => ProducerSlot::Mic,
            };
            if let Some(old) = self.tracks.insert(slot, track) {
                old.stop();
            }
        }
    }

    pub fn outcome(&self) -> Option<AcquisitionOutcome> {
        self.outcome
    }

    pub fn track(&self, slot: ProducerSlot) -> Option<&MediaTrack> {
        self.tracks.get(&slot)
    }

    pub fn slot_of_track(&self, track_id: &str) -> Option<ProducerSlot> {
        self.tracks
            .iter()
            .find(|(_, t)| t.id() == track_id)
            .map(|(slot, _)| *slot)
    }

    pub fn state(&self, slot: ProducerSlot) -> &SlotState {
        static IDLE: SlotState = SlotState::Idle;
        self.slots.get(&slot).unwrap_or(&IDLE)
    }

    /// Claim `slot` for publishing.  Returns the track to hand to the engine,
    /// or `None` when the slot is busy, live, or has no usable track.
    pub fn begin_publish(&mut self, slot: ProducerSlot) -> Option<MediaTrack> {
        if *self.state(slot) != SlotState::Idle {
            debug!("Producer {slot} already publishing or live");
            return None;
        }
        let track = self.tracks.get(&slot).filter(|t| !t.is_ended())?.clone();
        self.slots.insert(slot, SlotState::Publishing);
        Some(track)
    }

    /// Record a `producer-created` ack.  Returns `false` for an ack nobody is
    /// waiting for (duplicate, or from before a reset).
    pub fn on_created(&mut self, slot: ProducerSlot, producer_id: &str, stream_id: &str) -> bool {
        if *self.state(slot) != SlotState::Publishing {
            debug!("Ignoring producer-created {producer_id} for {slot}");
            return false;
        }
        info!("Producer {slot} live as {stream_id}");
        self.slots.insert(
            slot,
            SlotState::Live {
                producer_id: producer_id.to_string(),
                stream_id: stream_id.to_string(),
                paused: false,
            },
        );
        true
    }

    pub fn publish_failed(&mut self, slot: ProducerSlot) {
        if *self.state(slot) == SlotState::Publishing {
            self.slots.insert(slot, SlotState::Idle);
        }
    }

    /// Return `slot` to idle.  Yields the stream id to unpublish if it was live.
    pub fn close(&mut self, slot: ProducerSlot) -> Option<String> {
        match self.slots.remove(&slot)? {
            SlotState::Live { stream_id, .. } => Some(stream_id),
            _ => None,
        }
    }

    /// Pause or resume a live producer.  Returns whether anything changed.
    pub fn set_paused(&mut self, slot: ProducerSlot, pause: bool) -> bool {
        match self.slots.get_mut(&slot) {
            Some(SlotState::Live { paused, .. }) if *paused != pause => {
                *paused = pause;
                true
            }
            _ => false,
        }
    }

    pub fn is_live(&self, slot: ProducerSlot) -> bool {
        matches!(self.state(slot), SlotState::Live { .. })
    }

    pub fn live_stream_id(&self, slot: ProducerSlot) -> Option<&str> {
        match self.state(slot) {
            SlotState::Live { stream_id, .. } => Some(stream_id),
            _ => None,
        }
    }

    pub fn live_slots(&self) -> Vec<ProducerSlot> {
        ProducerSlot::ALL
            .into_iter()
            .filter(|s| self.is_live(*s))
            .collect()
    }

    /// Slots holding a track that is not yet published.
    pub fn ready_slots(&self) -> Vec<ProducerSlot> {
        ProducerSlot::ALL
            .into_iter()
            .filter(|s| *self.state(*s) == SlotState::Idle)
            .filter(|s| self.tracks.get(s).map(|t| !t.is_ended()).unwrap_or(false))
            .collect()
    }

    /// Metadata published with the camera/microphone producers and shown on
    /// the local registry entry.
    pub fn local_metadata(&self) -> StreamMetadata {
        let outcome = self.outcome.unwrap_or(AcquisitionOutcome::PresenceOnly);
        let enabled = |slot| {
            self.tracks
                .get(&slot)
                .map(|t: &MediaTrack| t.is_enabled() && !t.is_ended())
                .unwrap_or(false)
        };
        StreamMetadata {
            video: Some(enabled(ProducerSlot::Webcam)),
            audio: Some(enabled(ProducerSlot::Mic)),
            screen: Some(false),
            no_camera_available: Some(!outcome.has_camera()),
            no_micro_available: Some(!outcome.has_mic()),
            presence: (outcome == AcquisitionOutcome::PresenceOnly).then_some(true),
            ..Default::default()
        }
    }

    pub fn screen_metadata(&self) -> StreamMetadata {
        StreamMetadata {
            video: Some(self.tracks.contains_key(&ProducerSlot::Screen)),
            audio: Some(self.tracks.contains_key(&ProducerSlot::ScreenAudio)),
            screen: Some(true),
            ..Default::default()
        }
    }

    /// Metadata sent with a `produce` for `slot`.
    pub fn metadata_for(&self, slot: ProducerSlot) -> StreamMetadata {
        if slot.is_screen() {
            self.screen_metadata()
        } else {
            self.local_metadata()
        }
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.outcome?;
        Some(MediaStream::with_tracks(
            LOCAL_STREAM_ID,
            [ProducerSlot::Webcam, ProducerSlot::Mic]
                .iter()
                .filter_map(|s| self.tracks.get(s).cloned()),
        ))
    }

    pub fn screen_stream(&self) -> Option<MediaStream> {
        if !self.is_sharing_screen() {
            return None;
        }
        Some(MediaStream::with_tracks(
            LOCAL_SCREEN_STREAM_ID,
            [ProducerSlot::Screen, ProducerSlot::ScreenAudio]
                .iter()
                .filter_map(|s| self.tracks.get(s).cloned()),
        ))
    }

    pub fn is_sharing_screen(&self) -> bool {
        self.tracks.contains_key(&ProducerSlot::Screen)
    }

    pub fn set_screen_tracks(&mut self, tracks: Vec<MediaTrack>) {
        for track in tracks {
            let slot = match track.kind() {
                MediaKind::Video => ProducerSlot::Screen,
                MediaKind::Audio => ProducerSlot::ScreenAudio,
            };
            if let Some(old) = self.tracks.insert(slot, track) {
                old.stop();
            }
        }
    }

    /// Stop and forget the screen tracks.
    pub fn take_screen_tracks(&mut self) -> Vec<MediaTrack> {
        [ProducerSlot::Screen, ProducerSlot::ScreenAudio]
            .iter()
            .filter_map(|s| self.tracks.remove(s))
            .inspect(|t| t.stop())
            .collect()
    }

    /// Forget every producer, keeping the tracks.  Returns the slots that had
    /// a producer in the engine.
    pub fn reset(&mut self) -> Vec<ProducerSlot> {
        let slots = self
            .slots
            .iter()
            .filter(|(_, s)| **s != SlotState::Idle)
            .map(|(slot, _)| *slot)
            .collect();
        self.slots.clear();
        slots
    }

    /// Reset and release every local track.
    pub fn clear(&mut self) -> Vec<ProducerSlot> {
        let slots = self.reset();
        for track in self.tracks.values() {
            track.stop();
        }
        self.tracks.clear();
        self.outcome = None;
        slots
    }
}
