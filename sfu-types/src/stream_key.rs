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

//! Stream identifiers.
//!
//! The SFU names every published stream `"{publisherId}-{slot}"`.  All parsing
//! and formatting of those ids goes through [`StreamKey`] so the rest of the
//! client never splits strings by hand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Prefix of every remote composite stream id.
pub const REMOTE_PREFIX: &str = "remote-";

/// Suffix used for track-less presence entries.
pub const PRESENCE_GROUP: &str = "presence";

/// Audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four independent things a participant can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProducerSlot {
    Webcam,
    Mic,
    Screen,
    ScreenAudio,
}

impl ProducerSlot {
    pub const ALL: [ProducerSlot; 4] = [
        ProducerSlot::Webcam,
        ProducerSlot::Mic,
        ProducerSlot::Screen,
        ProducerSlot::ScreenAudio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProducerSlot::Webcam => "webcam",
            ProducerSlot::Mic => "mic",
            ProducerSlot::Screen => "screen",
            ProducerSlot::ScreenAudio => "screen-audio",
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            ProducerSlot::Webcam | ProducerSlot::Screen => MediaKind::Video,
            ProducerSlot::Mic | ProducerSlot::ScreenAudio => MediaKind::Audio,
        }
    }

    /// The video slot whose composite this slot's track is merged into.
    pub fn group(&self) -> ProducerSlot {
        match self {
            ProducerSlot::Webcam | ProducerSlot::Mic => ProducerSlot::Webcam,
            ProducerSlot::Screen | ProducerSlot::ScreenAudio => ProducerSlot::Screen,
        }
    }

    pub fn is_screen(&self) -> bool {
        self.group() == ProducerSlot::Screen
    }

    // Longest suffix first so "x-screen-audio" never decodes as slot "audio"
    // of publisher "x-screen".
    fn by_suffix_len() -> [ProducerSlot; 4] {
        [
            ProducerSlot::ScreenAudio,
            ProducerSlot::Webcam,
            ProducerSlot::Screen,
            ProducerSlot::Mic,
        ]
    }
}

impl fmt::Display for ProducerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamKeyError {
    #[error("stream id '{0}' has no known media suffix")]
    UnknownSlot(String),

    #[error("stream id '{0}' has an empty publisher")]
    EmptyPublisher(String),
}

/// Decoded form of a stream id: who published it and into which slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub publisher_id: String,
    pub slot: ProducerSlot,
}

impl StreamKey {
    pub fn new(publisher_id: impl Into<String>, slot: ProducerSlot) -> Self {
        Self {
            publisher_id: publisher_id.into(),
            slot,
        }
    }

    pub fn stream_id(&self) -> String {
        format!("{}-{}", self.publisher_id, self.slot)
    }

    pub fn composite_id(&self) -> CompositeId {
        CompositeId::new(&self.publisher_id, self.slot.group())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.publisher_id, self.slot)
    }
}

impl FromStr for StreamKey {
    type Err = StreamKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for slot in ProducerSlot::by_suffix_len() {
            let Some(publisher) = s
                .strip_suffix(slot.as_str())
                .and_then(|rest| rest.strip_suffix('-'))
            else {
                continue;
            };
            if publisher.is_empty() {
                return Err(StreamKeyError::EmptyPublisher(s.to_string()));
            }
            return Ok(StreamKey::new(publisher, slot));
        }
        Err(StreamKeyError::UnknownSlot(s.to_string()))
    }
}

/// Registry id of a merged remote stream, `remote-{publisherId}-{group}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeId(String);

impl CompositeId {
    pub fn new(publisher_id: &str, group: ProducerSlot) -> Self {
        CompositeId(format!("{REMOTE_PREFIX}{publisher_id}-{}", group.group()))
    }

    pub fn presence(publisher_id: &str) -> Self {
        CompositeId(format!("{REMOTE_PREFIX}{publisher_id}-{PRESENCE_GROUP}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Publisher this composite belongs to.
    pub fn publisher_id(&self) -> Option<&str> {
        let rest = self.0.strip_prefix(REMOTE_PREFIX)?;
        [
            ProducerSlot::Webcam.as_str(),
            ProducerSlot::Screen.as_str(),
            PRESENCE_GROUP,
        ]
        .iter()
        .find_map(|group| rest.strip_suffix(group)?.strip_suffix('-'))
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
