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

//! The externally visible list of streams.
//!
//! Readers only ever see whole snapshots.  A snapshot is rebuilt from the
//! producer and consumer managers after each handled event and published
//! only when it differs from the previous one.

use crate::consumer_manager::ConsumerManager;
use crate::media::MediaStream;
use crate::producer_manager::ProducerManager;
use log::debug;
use sfu_types::{CompositeId, StreamMetadata, LOCAL_SCREEN_STREAM_ID, LOCAL_STREAM_ID};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub stream: MediaStream,
    pub metadata: StreamMetadata,
    pub is_local: bool,
}

pub type RegistrySnapshot = Arc<Vec<StreamEntry>>;

#[derive(Debug)]
pub struct StreamRegistry {
    sender: watch::Sender<RegistrySnapshot>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Arc::new(Vec::new()));
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrySnapshot> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.sender.borrow().clone()
    }

    /// Order: local, local screen, remote composites by id, then presence
    /// entries by peer.
    pub fn build(producers: &ProducerManager, consumers: &ConsumerManager) -> Vec<StreamEntry> {
        let mut entries = Vec::new();
        if let Some(stream) = producers.local_stream() {
            entries.push(StreamEntry {
                id: LOCAL_STREAM_ID.to_string(),
                stream,
                metadata: producers.local_metadata(),
                is_local: true,
            });
        }
        if let Some(stream) = producers.screen_stream() {
            entries.push(StreamEntry {
                id: LOCAL_SCREEN_STREAM_ID.to_string(),
                stream,
                metadata: producers.screen_metadata(),
                is_local: true,
            });
        }
        for composite in consumers.composites() {
            entries.push(StreamEntry {
                id: composite.id.to_string(),
                stream: composite.stream.clone(),
                metadata: composite.metadata.clone(),
                is_local: false,
            });
        }
        for (peer_id, metadata) in consumers.presence() {
            let id = CompositeId::presence(peer_id);
            entries.push(StreamEntry {
                stream: MediaStream::new(id.as_str()),
                id: id.to_string(),
                metadata: metadata.clone(),
                is_local: false,
            });
        }
        entries
    }

    /// Publish a fresh snapshot.  Returns `false` if nothing changed.
    pub fn rebuild(&self, producers: &ProducerManager, consumers: &ConsumerManager) -> bool {
        let entries = Self::build(producers, consumers);
        let changed = self.sender.send_if_modified(|current| {
            if **current == entries {
                return false;
            }
            *current = Arc::new(entries);
            true
        });
        if changed {
            debug!("Registry now has {} entries", self.sender.borrow().len());
        }
        changed
    }
}
