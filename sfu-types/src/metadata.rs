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

use crate::stream_key::{MediaKind, ProducerSlot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-stream state flags shared between peers.
///
/// Every flag is optional on the wire: `None` means "this message says nothing
/// about it", which is what lets [`merge`](Self::merge) combine an audio
/// announcement with an earlier video one without losing either side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_camera_available: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_micro_available: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<bool>,

    /// Application fields this client does not interpret but must carry along.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StreamMetadata {
    pub fn video_enabled(&self) -> bool {
        self.video.unwrap_or(false)
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.unwrap_or(false)
    }

    pub fn is_screen(&self) -> bool {
        self.screen.unwrap_or(false)
    }

    pub fn is_presence(&self) -> bool {
        self.presence.unwrap_or(false)
    }

    /// Fill in what a consumer of `slot` implies about its composite, keeping
    /// anything the publisher stated explicitly (a muted mic stays muted).
    pub fn classify(slot: ProducerSlot, announced: &StreamMetadata) -> StreamMetadata {
        let mut metadata = announced.clone();
        match slot.kind() {
            MediaKind::Video => {
                metadata.video.get_or_insert(true);
            }
            MediaKind::Audio => {
                metadata.audio.get_or_insert(true);
            }
        }
        metadata.screen = Some(slot.is_screen());
        metadata.presence = None;
        metadata
    }

    /// Overlay `newer` on top of `self`. Fields `newer` leaves unset keep
    /// their previous value.
    pub fn merge(&mut self, newer: &StreamMetadata) {
        fn overlay(old: &mut Option<bool>, new: Option<bool>) {
            if new.is_some() {
                *old = new;
            }
        }
        overlay(&mut self.video, newer.video);
        overlay(&mut self.audio, newer.audio);
        overlay(&mut self.screen, newer.screen);
        overlay(&mut self.no_camera_available, newer.no_camera_available);
        overlay(&mut self.no_micro_available, newer.no_micro_available);
        overlay(&mut self.presence, newer.presence);
        for (key, value) in &newer.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }

    pub fn merged(mut self, newer: &StreamMetadata) -> StreamMetadata {
        self.merge(newer);
        self
    }
}
