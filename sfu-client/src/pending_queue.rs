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

//! Announcements waiting for a usable receive transport.
//!
//! A retried entry keeps its place in line but is held back until its
//! backoff has elapsed; entries behind it may go first.

use log::warn;
use sfu_types::StreamAnnouncement;
use std::collections::VecDeque;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub announcement: StreamAnnouncement,
    /// Consume attempts already made for this stream.
    pub attempts: u32,
    /// Not to be replayed before this instant.
    pub not_before: Option<Instant>,
}

impl PendingEntry {
    pub fn new(announcement: StreamAnnouncement) -> Self {
        Self {
            announcement,
            attempts: 0,
            not_before: None,
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }

    pub fn stream_id(&self) -> &str {
        &self.announcement.stream_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Already queued; the existing entry keeps its place.
    Duplicate,
    /// Queued after dropping the oldest entry, whose stream id is returned.
    Evicted(String),
}

/// Bounded FIFO of announcements, deduplicated by stream id.
#[derive(Debug)]
pub struct PendingQueue {
    entries: VecDeque<PendingEntry>,
    capacity: usize,
    max_attempts: u32,
}

impl PendingQueue {
    pub fn new(capacity: usize, max_attempts: u32) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            max_attempts,
        }
    }

    pub fn push(&mut self, announcement: StreamAnnouncement) -> PushOutcome {
        self.push_entry(PendingEntry::new(announcement))
    }

    /// Put back an entry whose consume failed, held until `retry_at`.
    /// Returns `false` (and drops it) once it has used all of its attempts.
    pub fn requeue(&mut self, mut entry: PendingEntry, retry_at: Instant) -> bool {
        entry.attempts += 1;
        entry.not_before = Some(retry_at);
        if entry.attempts >= self.max_attempts {
            warn!(
                "Giving up on stream {} after {} attempts",
                entry.stream_id(),
                entry.attempts
            );
            return false;
        }
        self.push_entry(entry) != PushOutcome::Duplicate
    }

    fn push_entry(&mut self, entry: PendingEntry) -> PushOutcome {
        if self.contains(entry.stream_id()) {
            return PushOutcome::Duplicate;
        }
        let mut outcome = PushOutcome::Queued;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                warn!(
                    "Pending queue full ({}), dropping {}",
                    self.capacity,
                    oldest.stream_id()
                );
                outcome = PushOutcome::Evicted(oldest.announcement.stream_id);
            }
        }
        self.entries.push_back(entry);
        outcome
    }

    /// Take the oldest entry whose backoff has elapsed.
    pub fn pop_ready(&mut self, now: Instant) -> Option<PendingEntry> {
        let index = self.entries.iter().position(|e| e.is_ready(now))?;
        self.entries.remove(index)
    }

    pub fn has_ready(&self, now: Instant) -> bool {
        self.entries.iter().any(|e| e.is_ready(now))
    }

    pub fn remove_stream(&mut self, stream_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.stream_id() != stream_id);
        self.entries.len() != before
    }

    pub fn remove_publisher(&mut self, publisher_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.announcement.publisher_id != publisher_id);
        before - self.entries.len()
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.entries.iter().any(|e| e.stream_id() == stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
