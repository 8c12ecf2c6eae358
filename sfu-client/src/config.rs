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

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the session state machine.  Missing fields take their defaults,
/// so a config file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a `connect-transport` may go unanswered.
    pub handshake_timeout_ms: u64,
    /// How long a transport may sit in `connecting` before it is checked once more.
    pub connecting_grace_ms: u64,
    /// Delay before a failed receive transport is re-created.
    pub recv_recreate_delay_ms: u64,
    pub max_recv_recreate_attempts: u32,
    /// Gap between consecutive replays when the pending queue is flushed.
    pub flush_stagger_ms: u64,
    pub pending_capacity: usize,
    pub pending_max_attempts: u32,
    /// Per-attempt backoff before a failed consume is replayed.
    pub pending_retry_backoff_ms: u64,
    pub event_bus_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 30_000,
            connecting_grace_ms: 10_000,
            recv_recreate_delay_ms: 2_000,
            max_recv_recreate_attempts: 3,
            flush_stagger_ms: 100,
            pending_capacity: 64,
            pending_max_attempts: 3,
            pending_retry_backoff_ms: 500,
            event_bus_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn connecting_grace(&self) -> Duration {
        Duration::from_millis(self.connecting_grace_ms)
    }

    pub fn recv_recreate_delay(&self) -> Duration {
        Duration::from_millis(self.recv_recreate_delay_ms)
    }

    pub fn flush_stagger(&self) -> Duration {
        Duration::from_millis(self.flush_stagger_ms)
    }

    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.pending_retry_backoff_ms.saturating_mul(attempt as u64))
    }
}

/// Who joins which room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub room_id: String,
    pub peer_id: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub config: SessionConfig,
}

impl SessionOptions {
    pub fn new(room_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            peer_id: peer_id.into(),
            password: None,
            config: SessionConfig::default(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"handshake_timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(config.flush_stagger_ms, 100);
        assert_eq!(config.pending_max_attempts, 3);
    }

    #[test]
    fn backoff_grows_linearly() {
        let config = SessionConfig::default();
        assert_eq!(config.retry_backoff(1), Duration::from_millis(500));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(1500));
    }
}
