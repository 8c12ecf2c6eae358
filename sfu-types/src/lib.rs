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

pub mod metadata;
pub mod signaling;
pub mod stream_key;

pub use metadata::StreamMetadata;
pub use signaling::{
    ClientMessage, ConsumerInfo, DtlsParameters, ErrorCode, ProducerAppData, RtpCapabilities,
    RtpParameters, ServerError, ServerMessage, StreamAnnouncement, TransportInfo,
};
pub use stream_key::{CompositeId, MediaKind, ProducerSlot, StreamKey, StreamKeyError};

/// Registry id of the local camera/microphone stream.
pub const LOCAL_STREAM_ID: &str = "local";

/// Registry id of the local screen-share stream.
pub const LOCAL_SCREEN_STREAM_ID: &str = "local-screen";
