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

//! Signaling transport for the SFU session client.
//!
//! A [`SignalingLink`] is the pair of channels a session talks through.  It can
//! be backed by a real WebSocket ([`websocket::SignalingSocket`]) or by an
//! in-memory pair ([`memory_link`]) for tests and embedders that bring their
//! own socket.

pub mod link;
pub mod websocket;

pub use link::{memory_link, MemoryServer, SignalingEvent, SignalingLink};
pub use websocket::{SignalingConnectError, SignalingSocket};
