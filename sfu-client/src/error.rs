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
 */

//! Error types for the session client.

use sfu_types::ProducerSlot;
use thiserror::Error;

/// Failures reported by the media seams ([`MediaDevices`](crate::MediaDevices)
/// and [`MediaEngine`](crate::MediaEngine)).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MediaError {
    /// No device can satisfy the request.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The user or platform refused access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Capabilities or parameters the engine cannot work with.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Media engine error: {0}")]
    Engine(String),
}

/// Errors returned by [`SessionClient`](crate::SessionClient) methods.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Signaling channel is not connected")]
    NotConnected,

    #[error("Signaling channel is already connected")]
    AlreadyConnected,

    #[error("Session has been disposed")]
    Disposed,

    /// The session is in the middle of handling another event.
    #[error("Session state is busy")]
    Busy,

    #[error("Failed to load media capabilities: {0}")]
    CapabilityLoad(String),

    #[error("Transport {0} handshake timed out")]
    HandshakeTimeout(String),

    #[error("No {0} track is available")]
    MediaUnavailable(ProducerSlot),

    #[error(transparent)]
    Media(#[from] MediaError),
}
