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

//! Session core of a multi-party SFU client.
//!
//! # Outline of usage
//!
//! ## Session creation and connection
//! ```ignore
//! let options = SessionOptions::new("R1", "alice");   // room, peer, tunables
//! let client = SessionClient::new(options, engine, devices);
//!
//! client.connect(link)?;   // a SignalingLink from sfu-transport
//! client.join()?;
//! ```
//!
//! ## Observing
//! ```ignore
//! let mut events = client.subscribe_events();      // SessionEvent bus
//! let mut registry = client.watch_registry();      // full registry snapshots
//! let engine_tx = client.engine_events();          // for the media engine
//! ```
//!
//! ## Local media
//! ```ignore
//! client.set_audio_enabled(false)?;
//! client.set_video_enabled(true)?;
//! client.start_screen_share().await?;
//! client.stop_screen_share()?;
//! ```
//!
//! ## Teardown
//! ```ignore
//! client.leave()?;     // leave the room, keep the link
//! client.dispose();    // or just drop the last handle
//! ```
//!
//! The client is single-threaded: it must be created and driven inside a
//! `tokio::task::LocalSet`.

mod capabilities;
mod config;
mod consumer_manager;
mod error;
mod event_bus;
mod events;
mod media;
mod pending_queue;
mod producer_manager;
mod registry;
mod session;
mod transport_manager;

pub use capabilities::CapabilityNegotiator;
pub use config::{SessionConfig, SessionOptions};
pub use consumer_manager::{Admission, CompositeStream, Consumer, ConsumerManager};
pub use error::{MediaError, SessionError};
pub use event_bus::EventBus;
pub use events::{SessionEvent, Severity};
pub use media::{
    EngineEvent, MediaConstraints, MediaDevices, MediaEngine, MediaStream, MediaTrack,
    NetworkQuality, TransportDirection, TransportState,
};
pub use pending_queue::{PendingEntry, PendingQueue, PushOutcome};
pub use producer_manager::{
    acquire_local_media, AcquisitionOutcome, LocalMedia, ProducerManager, SlotState,
};
pub use registry::{RegistrySnapshot, StreamEntry, StreamRegistry};
pub use session::{SessionClient, SessionStatus};
pub use transport_manager::{TransportManager, TransportRecord};

pub use sfu_transport::{SignalingEvent, SignalingLink};
pub use sfu_types;
