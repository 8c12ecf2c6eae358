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

use crate::error::SessionError;
use crate::media::MediaEngine;
use log::{debug, info};
use sfu_types::{MediaKind, RtpCapabilities};

/// Loads the router's capabilities into the engine once per session and keeps
/// the resulting local set for every later produce/consume check.
#[derive(Debug, Default)]
pub struct CapabilityNegotiator {
    local: Option<RtpCapabilities>,
}

impl CapabilityNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.local.is_some()
    }

    pub fn local(&self) -> Option<&RtpCapabilities> {
        self.local.as_ref()
    }

    /// Returns `Ok(true)` when capabilities were loaded by this call and
    /// `Ok(false)` when they already were (no-op).
    pub fn negotiate(
        &mut self,
        engine: &mut dyn MediaEngine,
        router: &RtpCapabilities,
    ) -> Result<bool, SessionError> {
        if self.is_loaded() {
            debug!("Capabilities already loaded, ignoring new router offer");
            return Ok(false);
        }
        if router.codecs.is_empty() {
            return Err(SessionError::CapabilityLoad(
                "router offered no codecs".to_string(),
            ));
        }

        let local = engine
            .load(router)
            .map_err(|e| SessionError::CapabilityLoad(e.to_string()))?;
        if local.codecs.is_empty() {
            return Err(SessionError::CapabilityLoad(
                "no codec in common with the router".to_string(),
            ));
        }

        info!(
            "Capabilities loaded: {} router codecs, {} usable",
            router.codecs.len(),
            local.codecs.len()
        );
        self.local = Some(local);
        Ok(true)
    }

    pub fn supports(&self, kind: MediaKind) -> bool {
        self.local
            .as_ref()
            .map(|caps| caps.codecs.iter().any(|c| c.kind == kind))
            .unwrap_or(false)
    }

    pub fn reset(&mut self) {
        self.local = None;
    }
}
