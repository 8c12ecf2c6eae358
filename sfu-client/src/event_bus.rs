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

//! Per-session broadcast bus for [`SessionEvent`]s.
//!
//! Every subscriber gets every event emitted after it subscribed.  A
//! subscription is just a [`Receiver`]; dropping it unsubscribes.  When the bus
//! is full the oldest event is dropped, so a slow subscriber never stalls the
//! session.

use crate::events::SessionEvent;
use async_broadcast::{broadcast, InactiveReceiver, Receiver, Sender, TrySendError};
use log::debug;
use std::fmt;

#[derive(Clone)]
pub struct EventBus {
    sender: Sender<SessionEvent>,
    // Keeps the channel open while nobody is subscribed.
    _keepalive: InactiveReceiver<SessionEvent>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = broadcast(capacity.max(1));
        sender.set_overflow(true);
        Self {
            sender,
            _keepalive: receiver.deactivate(),
        }
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.sender.new_receiver()
    }

    pub fn emit(&self, event: SessionEvent) {
        match self.sender.try_broadcast(event) {
            Ok(_) => {}
            Err(TrySendError::Inactive(_)) => {}
            Err(e) => debug!("Session event dropped: {e}"),
        }
    }

    /// Close the bus.  Subscribers drain what is buffered and then see the
    /// channel closed.
    pub fn close(&self) {
        self.sender.close();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
