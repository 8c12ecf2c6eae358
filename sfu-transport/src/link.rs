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

//! Transport-neutral handle on one signaling connection.

use sfu_types::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

/// What the session sees coming out of a signaling connection.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// The underlying connection is up.
    Connected,

    /// The connection dropped after having been up.
    Disconnected(String),

    /// The connection (or a reconnection attempt) could not be established.
    ConnectError(String),

    /// A decoded server message.
    Message(ServerMessage),
}

/// One live signaling connection: messages go out through `outbound`, events
/// come back through `inbound`.  Dropping `outbound` closes the connection.
#[derive(Debug)]
pub struct SignalingLink {
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<SignalingEvent>,
}

/// Server side of an in-memory link.
#[derive(Debug)]
pub struct MemoryServer {
    /// Feed events into the client.
    pub events: mpsc::UnboundedSender<SignalingEvent>,
    /// Messages the client sent.
    pub received: mpsc::UnboundedReceiver<ClientMessage>,
}

impl MemoryServer {
    /// Deliver one server message.  Returns `false` once the client side is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.events.send(SignalingEvent::Message(message)).is_ok()
    }

    /// Drain everything the client has sent so far.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.received.try_recv() {
            out.push(msg);
        }
        out
    }
}

/// Build a connected in-memory link.  The `Connected` event is already queued.
pub fn memory_link() -> (SignalingLink, MemoryServer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let _ = in_tx.send(SignalingEvent::Connected);
    (
        SignalingLink {
            outbound: out_tx,
            inbound: in_rx,
        },
        MemoryServer {
            events: in_tx,
            received: out_rx,
        },
    )
}
