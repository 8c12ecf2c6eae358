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

//! Remote streams: announcements, consumers and the composites they merge into.
//!
//! A stream id decodes to a [`StreamKey`]; every consumer of that key lands in
//! the composite named by [`StreamKey::composite_id`].  A composite lives as
//! long as at least one of its consumers does.

use crate::media::{MediaStream, MediaTrack};
use crate::pending_queue::{PendingEntry, PendingQueue, PushOutcome};
use log::{debug, info, warn};
use sfu_types::{
    CompositeId, ConsumerInfo, MediaKind, StreamAnnouncement, StreamKey, StreamKeyError,
    StreamMetadata,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Consumer {
    pub id: String,
    pub stream_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub composite_id: CompositeId,
    pub track: MediaTrack,
}

#[derive(Debug, Clone)]
pub struct CompositeStream {
    pub id: CompositeId,
    pub publisher_id: String,
    pub stream: MediaStream,
    pub metadata: StreamMetadata,
    consumers: BTreeSet<String>,
}

/// What to do with an incoming announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Send `consume` now; the request is recorded as in flight.
    ConsumeNow,
    /// Parked until the receive transport connects.
    Queued,
    /// Already consumed, requested or queued.
    Duplicate,
    Invalid(StreamKeyError),
}

#[derive(Debug)]
pub struct ConsumerManager {
    consumers: HashMap<String, Consumer>,
    composites: BTreeMap<CompositeId, CompositeStream>,
    // Latest metadata the server announced per stream id.
    announced: HashMap<String, StreamMetadata>,
    // `consume` sent, `consumer-created` not yet seen.
    requested: HashMap<String, PendingEntry>,
    presence: BTreeMap<String, StreamMetadata>,
    pending: PendingQueue,
}

impl ConsumerManager {
    pub fn new(pending_capacity: usize, pending_max_attempts: u32) -> Self {
        Self {
            consumers: HashMap::new(),
            composites: BTreeMap::new(),
            announced: HashMap::new(),
            requested: HashMap::new(),
            presence: BTreeMap::new(),
            pending: PendingQueue::new(pending_capacity, pending_max_attempts),
        }
    }

    pub fn admit(&mut self, announcement: StreamAnnouncement, recv_ready: bool) -> Admission {
        if let Err(e) = announcement.stream_id.parse::<StreamKey>() {
            warn!("Ignoring announcement: {e}");
            return Admission::Invalid(e);
        }
        let stream_id = announcement.stream_id.clone();
        self.announced
            .insert(stream_id.clone(), announcement.metadata.clone());

        if self.is_consumed(&stream_id)
            || self.requested.contains_key(&stream_id)
            || self.pending.contains(&stream_id)
        {
            debug!("Duplicate announcement for {stream_id}");
            return Admission::Duplicate;
        }

        if recv_ready {
            self.requested
                .insert(stream_id, PendingEntry::new(announcement));
            Admission::ConsumeNow
        } else {
            match self.pending.push(announcement) {
                PushOutcome::Duplicate => Admission::Duplicate,
                PushOutcome::Queued | PushOutcome::Evicted(_) => {
                    debug!("Queued {stream_id} until the receive transport connects");
                    Admission::Queued
                }
            }
        }
    }

    /// Pop the oldest queued announcement that may be replayed at `now` and
    /// record it as requested.  Entries consumed meanwhile are skipped.
    pub fn next_pending(&mut self, now: Instant) -> Option<StreamAnnouncement> {
        while let Some(entry) = self.pending.pop_ready(now) {
            let stream_id = entry.stream_id().to_string();
            if self.is_consumed(&stream_id) || self.requested.contains_key(&stream_id) {
                continue;
            }
            let announcement = entry.announcement.clone();
            self.requested.insert(stream_id, entry);
            return Some(announcement);
        }
        None
    }

    /// Forget an in-flight `consume` and hand back its entry.
    pub fn take_request(&mut self, stream_id: &str) -> Option<PendingEntry> {
        self.requested.remove(stream_id)
    }

    pub fn is_requested(&self, stream_id: &str) -> bool {
        self.requested.contains_key(stream_id)
    }

    /// Park a failed request until `retry_at`.  Returns `false` when its
    /// attempts are exhausted.
    pub fn requeue(&mut self, entry: PendingEntry, retry_at: Instant) -> bool {
        self.pending.requeue(entry, retry_at)
    }

    /// Attach a freshly created consumer to its composite.  Returns `None`
    /// for a consumer already known or a stream id that does not decode.
    pub fn add_consumer(&mut self, info: &ConsumerInfo, track: MediaTrack) -> Option<CompositeId> {
        if self.consumers.contains_key(&info.consumer_id) {
            debug!("Consumer {} already attached", info.consumer_id);
            return None;
        }
        let key = match info.stream_id.parse::<StreamKey>() {
            Ok(key) => key,
            Err(e) => {
                warn!("Dropping consumer {}: {e}", info.consumer_id);
                return None;
            }
        };
        self.requested.remove(&info.stream_id);

        let announced = self
            .announced
            .get(&info.stream_id)
            .cloned()
            .unwrap_or_default()
            .merged(&info.metadata);
        let classified = StreamMetadata::classify(key.slot, &announced);
        let composite_id = key.composite_id();

        let composite = self
            .composites
            .entry(composite_id.clone())
            .or_insert_with(|| {
                info!("New composite {composite_id}");
                CompositeStream {
                    id: composite_id.clone(),
                    publisher_id: key.publisher_id.clone(),
                    stream: MediaStream::new(composite_id.as_str()),
                    metadata: StreamMetadata::default(),
                    consumers: BTreeSet::new(),
                }
            });
        composite.stream.add_track(track.clone());
        composite.metadata.merge(&classified);
        composite.consumers.insert(info.consumer_id.clone());

        self.presence.remove(&key.publisher_id);
        self.consumers.insert(
            info.consumer_id.clone(),
            Consumer {
                id: info.consumer_id.clone(),
                stream_id: info.stream_id.clone(),
                producer_id: info.producer_id.clone(),
                kind: info.kind,
                composite_id: composite_id.clone(),
                track,
            },
        );
        Some(composite_id)
    }

    /// Detach one consumer.  Its composite goes away with its last consumer;
    /// until then it stops claiming the kind it no longer carries.
    pub fn remove_consumer(&mut self, consumer_id: &str) -> Option<Consumer> {
        let consumer = self.consumers.remove(consumer_id)?;
        if let Some(composite) = self.composites.get_mut(&consumer.composite_id) {
            composite.consumers.remove(consumer_id);
            composite.stream.remove_track(consumer.track.id());
            if !composite.stream.has_kind(MediaKind::Video) {
                composite.metadata.video = Some(false);
            }
            if !composite.stream.has_kind(MediaKind::Audio) {
                composite.metadata.audio = Some(false);
            }
            if composite.consumers.is_empty() {
                info!("Composite {} closed", consumer.composite_id);
                self.composites.remove(&consumer.composite_id);
            }
        }
        Some(consumer)
    }

    /// Drop everything known about a stream.  Returns the ids of consumers
    /// the engine must close.
    pub fn remove_stream(&mut self, stream_id: &str) -> Vec<String> {
        self.announced.remove(stream_id);
        self.requested.remove(stream_id);
        self.pending.remove_stream(stream_id);
        let ids: Vec<String> = self
            .consumers
            .values()
            .filter(|c| c.stream_id == stream_id)
            .map(|c| c.id.clone())
            .collect();
        for id in &ids {
            self.remove_consumer(id);
        }
        ids
    }

    /// Merge updated metadata into the composite of an already consumed
    /// stream.  Returns whether the composite changed.
    pub fn update_stream(&mut self, announcement: &StreamAnnouncement) -> bool {
        let Ok(key) = announcement.stream_id.parse::<StreamKey>() else {
            return false;
        };
        self.announced
            .entry(announcement.stream_id.clone())
            .or_default()
            .merge(&announcement.metadata);
        if !self.is_consumed(&announcement.stream_id) {
            return false;
        }
        let Some(composite) = self.composites.get_mut(&key.composite_id()) else {
            return false;
        };
        let before = composite.metadata.clone();
        composite
            .metadata
            .merge(&StreamMetadata::classify(key.slot, &announcement.metadata));
        composite.metadata != before
    }

    /// Drop every trace of a peer.  Returns consumer ids to close.
    pub fn remove_publisher(&mut self, publisher_id: &str) -> Vec<String> {
        self.presence.remove(publisher_id);
        self.pending.remove_publisher(publisher_id);
        let owned = |stream_id: &str| {
            stream_id
                .parse::<StreamKey>()
                .map(|k| k.publisher_id == publisher_id)
                .unwrap_or(false)
        };
        self.announced.retain(|id, _| !owned(id));
        self.requested.retain(|id, _| !owned(id));
        let ids: Vec<String> = self
            .consumers
            .values()
            .filter(|c| owned(&c.stream_id))
            .map(|c| c.id.clone())
            .collect();
        for id in &ids {
            self.remove_consumer(id);
        }
        self.composites.retain(|_, c| c.publisher_id != publisher_id);
        ids
    }

    /// Record a track-less participant.  Ignored while the peer has media.
    pub fn set_presence(&mut self, peer_id: &str, metadata: &StreamMetadata) -> bool {
        if self.composites.values().any(|c| c.publisher_id == peer_id) {
            debug!("Presence from {peer_id} ignored: peer has media");
            return false;
        }
        let mut metadata = metadata.clone();
        metadata.presence = Some(true);
        let changed = self.presence.get(peer_id) != Some(&metadata);
        self.presence.insert(peer_id.to_string(), metadata);
        changed
    }

    /// Drop consumers and composites bound to a receive transport that is
    /// going away.  Queued announcements survive.
    pub fn clear_remote_media(&mut self) -> Vec<String> {
        self.requested.clear();
        self.composites.clear();
        self.consumers.drain().map(|(id, _)| id).collect()
    }

    pub fn clear(&mut self) -> Vec<String> {
        let ids = self.clear_remote_media();
        self.announced.clear();
        self.presence.clear();
        self.pending.clear();
        ids
    }

    pub fn is_consumed(&self, stream_id: &str) -> bool {
        self.consumers.values().any(|c| c.stream_id == stream_id)
    }

    pub fn has_consumer(&self, consumer_id: &str) -> bool {
        self.consumers.contains_key(consumer_id)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn composites(&self) -> impl Iterator<Item = &CompositeStream> {
        self.composites.values()
    }

    pub fn composite(&self, id: &CompositeId) -> Option<&CompositeStream> {
        self.composites.get(id)
    }

    pub fn presence(&self) -> impl Iterator<Item = (&str, &StreamMetadata)> {
        self.presence.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn has_ready_pending(&self, now: Instant) -> bool {
        self.pending.has_ready(now)
    }
}
