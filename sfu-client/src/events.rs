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

//! Framework-agnostic session events.
//!
//! Stream changes are not events: they are published as full registry
//! snapshots (see [`StreamRegistry`](crate::StreamRegistry)).

use crate::media::{TransportDirection, TransportState};
use sfu_types::ProducerSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    // === Signaling ===
    Connected,
    ConnectionLost(String),
    ConnectError(String),

    // === Room ===
    Joined,
    /// The room needs a password; set one and call `join` again.
    PasswordRequired,
    PeerLeft(String),
    SpeakingChanged {
        peer_id: String,
        speaking: bool,
    },
    RoomLocked {
        locked: bool,
        by: Option<String>,
    },
    ReconnectRequired(String),

    // === Media path ===
    TransportStateChanged {
        direction: TransportDirection,
        state: TransportState,
    },
    ProducerPublished(ProducerSlot),
    ProducerClosed(ProducerSlot),
    ScreenShareStopped,

    /// Something the user should see, briefly.
    Notice {
        severity: Severity,
        message: String,
    },
}

impl SessionEvent {
    pub fn notice(severity: Severity, message: impl Into<String>) -> Self {
        SessionEvent::Notice {
            severity,
            message: message.into(),
        }
    }
}
