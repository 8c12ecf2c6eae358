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

//! Bookkeeping for the send and receive transports.
//!
//! Pure state: the session sends the signaling messages and drives the engine,
//! this module only decides whether a step is allowed and records its outcome.

use crate::media::{TransportDirection, TransportState};
use log::{debug, info, warn};
use sfu_types::TransportInfo;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRecord {
    pub id: String,
    pub direction: TransportDirection,
    pub state: TransportState,
}

#[derive(Debug, Default)]
pub struct TransportManager {
    send: Option<TransportRecord>,
    recv: Option<TransportRecord>,
    // Directions with a `create-transport` in flight.
    requested: HashSet<TransportDirection>,
    // Transport ids with a `connect-transport` in flight.
    connecting: HashSet<String>,
    recv_recreate_attempts: u32,
}

impl TransportManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, direction: TransportDirection) -> &Option<TransportRecord> {
        match direction {
            TransportDirection::Send => &self.send,
            TransportDirection::Recv => &self.recv,
        }
    }

    fn slot_mut(&mut self, direction: TransportDirection) -> &mut Option<TransportRecord> {
        match direction {
            TransportDirection::Send => &mut self.send,
            TransportDirection::Recv => &mut self.recv,
        }
    }

    /// Mark a `create-transport` as sent.  Returns `false` when a transport
    /// for `direction` exists or is already being created.
    pub fn request_create(&mut self, direction: TransportDirection) -> bool {
        if self.slot(direction).is_some() || self.requested.contains(&direction) {
            debug!("Transport {direction} already exists or is being created");
            return false;
        }
        self.requested.insert(direction);
        true
    }

    /// Record a server-created transport in state `new`.
    ///
    /// Returns `None` for an unsolicited or duplicate `transport-created`,
    /// which must be ignored.
    pub fn accept(&mut self, info: &TransportInfo) -> Option<TransportDirection> {
        let direction = TransportDirection::from_is_producer(info.is_producer);
        if let Some(existing) = self.slot(direction) {
            warn!(
                "Ignoring transport-created {} for {direction}: {} already present",
                info.id, existing.id
            );
            return None;
        }
        if !self.requested.remove(&direction) {
            warn!("Ignoring unsolicited transport-created {} for {direction}", info.id);
            return None;
        }
        info!("Transport {direction} created: {}", info.id);
        *self.slot_mut(direction) = Some(TransportRecord {
            id: info.id.clone(),
            direction,
            state: TransportState::New,
        });
        Some(direction)
    }

    /// `new → connecting`.  Returns `false` when a handshake for this id is
    /// already running or the id is unknown.
    pub fn begin_handshake(&mut self, transport_id: &str) -> bool {
        let Some(direction) = self.direction_of(transport_id) else {
            return false;
        };
        if !self.connecting.insert(transport_id.to_string()) {
            debug!("Handshake already in flight for {transport_id}");
            return false;
        }
        self.set_state(direction, TransportState::Connecting);
        true
    }

    pub fn is_handshaking(&self, transport_id: &str) -> bool {
        self.connecting.contains(transport_id)
    }

    /// `connecting → connected`.  Returns the direction when the ack matched
    /// an in-flight handshake.
    pub fn complete_handshake(&mut self, transport_id: &str) -> Option<TransportDirection> {
        if !self.connecting.remove(transport_id) {
            debug!("Ignoring transport-connected for {transport_id}: no handshake in flight");
            return None;
        }
        let direction = self.direction_of(transport_id)?;
        self.set_state(direction, TransportState::Connected);
        if direction == TransportDirection::Recv {
            self.recv_recreate_attempts = 0;
        }
        info!("Transport {direction} connected: {transport_id}");
        Some(direction)
    }

    /// Release the guard of a failed or timed-out handshake and mark the
    /// transport failed.
    pub fn fail_handshake(&mut self, transport_id: &str) -> Option<TransportDirection> {
        if !self.connecting.remove(transport_id) {
            return None;
        }
        let direction = self.direction_of(transport_id)?;
        self.set_state(direction, TransportState::Failed);
        Some(direction)
    }

    /// Apply a network-driven state change.  Only terminal states of a
    /// transport we own are acted on; returns its direction in that case.
    pub fn on_state_change(
        &mut self,
        transport_id: &str,
        state: TransportState,
    ) -> Option<TransportDirection> {
        let direction = self.direction_of(transport_id)?;
        if !state.is_terminal() {
            debug!("Transport {direction} reports {state}");
            return None;
        }
        self.connecting.remove(transport_id);
        self.set_state(direction, state);
        warn!("Transport {direction} ({transport_id}) is {state}");
        Some(direction)
    }

    /// Forget the transport for `direction`, returning it for engine cleanup.
    pub fn remove(&mut self, direction: TransportDirection) -> Option<TransportRecord> {
        self.requested.remove(&direction);
        let record = self.slot_mut(direction).take()?;
        self.connecting.remove(&record.id);
        Some(record)
    }

    /// Count one re-creation of the receive transport.  Returns the attempt
    /// number, or `None` once `max` attempts have been used.
    pub fn next_recreate_attempt(&mut self, max: u32) -> Option<u32> {
        if self.recv_recreate_attempts >= max {
            return None;
        }
        self.recv_recreate_attempts += 1;
        Some(self.recv_recreate_attempts)
    }

    pub fn direction_of(&self, transport_id: &str) -> Option<TransportDirection> {
        [&self.send, &self.recv]
            .into_iter()
            .flatten()
            .find(|r| r.id == transport_id)
            .map(|r| r.direction)
    }

    pub fn id(&self, direction: TransportDirection) -> Option<&str> {
        self.slot(direction).as_ref().map(|r| r.id.as_str())
    }

    pub fn state(&self, direction: TransportDirection) -> Option<TransportState> {
        self.slot(direction).as_ref().map(|r| r.state)
    }

    pub fn is_connected(&self, direction: TransportDirection) -> bool {
        self.state(direction) == Some(TransportState::Connected)
    }

    /// Id of `direction`'s transport if it is connected.
    pub fn ready_id(&self, direction: TransportDirection) -> Option<&str> {
        self.slot(direction)
            .as_ref()
            .filter(|r| r.state == TransportState::Connected)
            .map(|r| r.id.as_str())
    }

    /// Drop everything, including the re-creation attempt count.  Returns the ids
    /// that still need closing in the engine.
    pub fn clear(&mut self) -> Vec<String> {
        self.requested.clear();
        self.connecting.clear();
        self.recv_recreate_attempts = 0;
        [self.send.take(), self.recv.take()]
            .into_iter()
            .flatten()
            .map(|r| r.id)
            .collect()
    }

    fn set_state(&mut self, direction: TransportDirection, state: TransportState) {
        if let Some(record) = self.slot_mut(direction) {
            record.state = state;
        }
    }
}
