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

//! The session state machine.
//!
//! Every signaling message, engine event and user action is handled to
//! completion while holding the one `RefCell` borrow of [`Inner`]; nothing
//! awaits with the borrow held.  Work that has to wait (timers, device
//! prompts) runs in a local task that re-enters through a `Weak` handle and
//! checks the pipeline generation, so anything scheduled before a reset
//! finds itself stale and does nothing.

use crate::capabilities::CapabilityNegotiator;
use crate::config::SessionOptions;
use crate::consumer_manager::{Admission, ConsumerManager};
use crate::error::SessionError;
use crate::event_bus::EventBus;
use crate::events::{SessionEvent, Severity};
use crate::media::{
    EngineEvent, MediaDevices, MediaEngine, MediaTrack, NetworkQuality, TransportDirection,
    TransportState,
};
use crate::pending_queue::PendingEntry;
use crate::producer_manager::{
    acquire_local_media, AcquisitionOutcome, LocalMedia, ProducerManager, SlotState,
};
use crate::registry::{RegistrySnapshot, StreamRegistry};
use crate::transport_manager::TransportManager;
use async_broadcast::Receiver;
use log::{debug, error, info, warn};
use sfu_transport::{SignalingEvent, SignalingLink};
use sfu_types::{
    ClientMessage, ConsumerInfo, ErrorCode, MediaKind, ProducerAppData, ProducerSlot,
    RtpCapabilities, ServerError, ServerMessage, StreamAnnouncement, TransportInfo,
};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Point-in-time view of the session, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub is_connected: bool,
    pub is_joined: bool,
    pub capabilities_loaded: bool,
    pub send_transport: Option<TransportState>,
    pub recv_transport: Option<TransportState>,
    pub live_producers: Vec<ProducerSlot>,
    pub consumer_count: usize,
    pub pending_count: usize,
}

/// Handle on one peer's participation in one room.
///
/// Cheap to clone; all clones drive the same session.  The session is torn
/// down by [`dispose`](Self::dispose) or when the last handle is dropped.
///
/// Background work uses [`tokio::task::spawn_local`], so the client must live
/// inside a [`tokio::task::LocalSet`].
///
/// ```no_run
/// # use sfu_client::{SessionClient, SessionOptions, MediaEngine, MediaDevices};
/// # async fn run(engine: impl MediaEngine + 'static, devices: impl MediaDevices + 'static)
/// # -> anyhow::Result<()> {
/// let link = sfu_transport::SignalingSocket::connect("wss://sfu.example.com/ws").await?;
/// let client = SessionClient::new(SessionOptions::new("R1", "alice"), engine, devices);
/// let mut registry = client.watch_registry();
/// client.connect(link)?;
/// client.join()?;
/// while registry.changed().await.is_ok() {
///     for entry in registry.borrow_and_update().iter() {
///         println!("{} video={}", entry.id, entry.metadata.video_enabled());
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionClient {
    inner: Rc<RefCell<Inner>>,
    observers: Rc<Observers>,
}

// Handles readable without borrowing `Inner`, so observers may be used from
// inside engine or device callbacks.
struct Observers {
    events: EventBus,
    registry: watch::Receiver<RegistrySnapshot>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient").finish_non_exhaustive()
    }
}

struct Inner {
    me: Weak<RefCell<Inner>>,
    options: SessionOptions,
    engine: Box<dyn MediaEngine>,
    devices: Rc<dyn MediaDevices>,

    outbound: Option<mpsc::UnboundedSender<ClientMessage>>,
    engine_rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,

    is_connected: bool,
    is_joined: bool,
    join_in_flight: bool,
    disposed: bool,
    acquiring_media: bool,
    presence_sent: bool,
    flushing: bool,
    // Bumped by every reset; deferred work from an older pipeline is dropped.
    generation: u64,

    capabilities: CapabilityNegotiator,
    transports: TransportManager,
    producers: ProducerManager,
    consumers: ConsumerManager,
    registry: StreamRegistry,
    events: EventBus,
    handshakes: HashMap<String, oneshot::Sender<()>>,

    pipeline_tasks: JoinSet<()>, // aborted on every reset
    media_tasks: JoinSet<()>,
    link_tasks: JoinSet<()>,
    engine_pump: JoinSet<()>,
}

impl SessionClient {
    pub fn new<E, D>(options: SessionOptions, engine: E, devices: D) -> Self
    where
        E: MediaEngine + 'static,
        D: MediaDevices + 'static,
    {
        let config = options.config.clone();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let events = EventBus::new(config.event_bus_capacity);
        let registry = StreamRegistry::new();
        let observers = Rc::new(Observers {
            events: events.clone(),
            registry: registry.subscribe(),
            engine_tx,
        });
        let inner = Rc::new_cyclic(|me| {
            RefCell::new(Inner {
                me: me.clone(),
                options,
                engine: Box::new(engine),
                devices: Rc::new(devices),
                outbound: None,
                engine_rx: Some(engine_rx),
                is_connected: false,
                is_joined: false,
                join_in_flight: false,
                disposed: false,
                acquiring_media: false,
                presence_sent: false,
                flushing: false,
                generation: 0,
                capabilities: CapabilityNegotiator::new(),
                transports: TransportManager::new(),
                producers: ProducerManager::new(),
                consumers: ConsumerManager::new(
                    config.pending_capacity,
                    config.pending_max_attempts,
                ),
                registry,
                events,
                handshakes: HashMap::new(),
                pipeline_tasks: JoinSet::new(),
                media_tasks: JoinSet::new(),
                link_tasks: JoinSet::new(),
                engine_pump: JoinSet::new(),
            })
        });
        Self { inner, observers }
    }

    fn borrow(&self) -> Result<Ref<'_, Inner>, SessionError> {
        self.inner.try_borrow().map_err(|_| SessionError::Busy)
    }

    fn borrow_mut(&self) -> Result<RefMut<'_, Inner>, SessionError> {
        self.inner.try_borrow_mut().map_err(|_| SessionError::Busy)
    }

    /// Attach a signaling link and start pumping its events.
    pub fn connect(&self, link: SignalingLink) -> Result<(), SessionError> {
        let mut inner = self.borrow_mut()?;
        inner.ensure_alive()?;
        if inner.outbound.is_some() {
            return Err(SessionError::AlreadyConnected);
        }
        let SignalingLink { outbound, inbound } = link;
        inner.outbound = Some(outbound);
        inner.mark_connected();

        let weak = inner.me.clone();
        inner.link_tasks.abort_all();
        spawn_scoped(&mut inner.link_tasks, pump_signaling(weak.clone(), inbound));
        if let Some(rx) = inner.engine_rx.take() {
            spawn_scoped(&mut inner.engine_pump, pump_engine(weak, rx));
        }
        Ok(())
    }

    /// Join the room.  A no-op while a join is in flight or already done.
    pub fn join(&self) -> Result<(), SessionError> {
        let mut inner = self.borrow_mut()?;
        inner.ensure_alive()?;
        if !inner.is_connected {
            return Err(SessionError::NotConnected);
        }
        if inner.is_joined || inner.join_in_flight {
            debug!("Join already in progress");
            return Ok(());
        }
        inner.send_join();
        inner.start_media_acquisition();
        Ok(())
    }

    pub fn set_password(&self, password: impl Into<String>) -> Result<(), SessionError> {
        let password = password.into();
        let mut inner = self.borrow_mut()?;
        inner.options.password = (!password.is_empty()).then_some(password);
        Ok(())
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.borrow_mut()?.set_track_enabled(ProducerSlot::Mic, enabled)
    }

    pub fn set_video_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.borrow_mut()?.set_track_enabled(ProducerSlot::Webcam, enabled)
    }

    /// Ask for a screen to share and publish it once the send transport is up.
    pub async fn start_screen_share(&self) -> Result<(), SessionError> {
        let devices = {
            let inner = self.borrow()?;
            inner.ensure_alive()?;
            if inner.producers.is_sharing_screen() {
                return Ok(());
            }
            inner.devices.clone()
        };

        let tracks = devices.get_display_media(true).await?;
        let stop_all = |tracks: &[MediaTrack]| tracks.iter().for_each(|t| t.stop());
        if !tracks.iter().any(|t| t.kind() == MediaKind::Video) {
            stop_all(&tracks);
            return Err(SessionError::MediaUnavailable(ProducerSlot::Screen));
        }

        let mut inner = self.borrow_mut()?;
        if inner.disposed || inner.producers.is_sharing_screen() {
            stop_all(&tracks);
            return inner.ensure_alive();
        }
        info!("Screen share started with {} track(s)", tracks.len());
        inner.producers.set_screen_tracks(tracks);
        inner.publish_ready();
        inner.refresh_registry();
        Ok(())
    }

    pub fn stop_screen_share(&self) -> Result<(), SessionError> {
        let mut inner = self.borrow_mut()?;
        inner.ensure_alive()?;
        inner.stop_screen_share();
        Ok(())
    }

    pub fn set_speaking(&self, speaking: bool) -> Result<(), SessionError> {
        let mut inner = self.borrow_mut()?;
        let (room_id, peer_id) = inner.room_and_peer();
        inner.send_required(if speaking {
            ClientMessage::MySpeaking { room_id, peer_id }
        } else {
            ClientMessage::StopSpeaking { room_id, peer_id }
        })
    }

    pub fn lock_room(&self) -> Result<(), SessionError> {
        let mut inner = self.borrow_mut()?;
        let (room_id, peer_id) = inner.room_and_peer();
        inner.send_required(ClientMessage::LockRoom { room_id, peer_id })
    }

    pub fn unlock_room(&self) -> Result<(), SessionError> {
        let mut inner = self.borrow_mut()?;
        let (room_id, peer_id) = inner.room_and_peer();
        inner.send_required(ClientMessage::UnlockRoom { room_id, peer_id })
    }

    /// Leave the room and release all media.  The signaling link stays up,
    /// so [`join`](Self::join) may be called again.
    pub fn leave(&self) -> Result<(), SessionError> {
        let mut inner = self.borrow_mut()?;
        inner.ensure_alive()?;
        if inner.is_joined || inner.join_in_flight {
            let (room_id, peer_id) = inner.room_and_peer();
            inner.send(ClientMessage::LeaveRoom { room_id, peer_id });
        }
        inner.teardown();
        info!("Left room {}", inner.options.room_id);
        Ok(())
    }

    /// Leave, drop the link, stop every task and close the event bus.
    /// Further calls return [`SessionError::Disposed`].
    pub fn dispose(&self) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            warn!("dispose() called while the session is busy");
            return;
        };
        if inner.disposed {
            return;
        }
        if inner.is_joined || inner.join_in_flight {
            let (room_id, peer_id) = inner.room_and_peer();
            inner.send(ClientMessage::LeaveRoom { room_id, peer_id });
        }
        inner.dispose();
    }

    pub fn subscribe_events(&self) -> Receiver<SessionEvent> {
        self.observers.events.subscribe()
    }

    /// Registry snapshots from now on; the current one counts as seen.
    pub fn watch_registry(&self) -> watch::Receiver<RegistrySnapshot> {
        let mut registry = self.observers.registry.clone();
        registry.mark_unchanged();
        registry
    }

    pub fn registry_snapshot(&self) -> RegistrySnapshot {
        self.observers.registry.borrow().clone()
    }

    /// Sender the media engine uses to report network-driven changes.
    pub fn engine_events(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.observers.engine_tx.clone()
    }

    pub fn state(&self) -> Result<SessionStatus, SessionError> {
        let inner = self.borrow()?;
        Ok(SessionStatus {
            is_connected: inner.is_connected,
            is_joined: inner.is_joined,
            capabilities_loaded: inner.capabilities.is_loaded(),
            send_transport: inner.transports.state(TransportDirection::Send),
            recv_transport: inner.transports.state(TransportDirection::Recv),
            live_producers: inner.producers.live_slots(),
            consumer_count: inner.consumers.consumer_count(),
            pending_count: inner.consumers.pending_len(),
        })
    }

    /// Feed one signaling event into the state machine.
    pub fn dispatch(&self, event: SignalingEvent) {
        dispatch_to(&self.inner, event);
    }
}

fn dispatch_to(inner: &Rc<RefCell<Inner>>, event: SignalingEvent) {
    match inner.try_borrow_mut() {
        Ok(mut inner) if !inner.disposed => inner.on_signaling(event),
        Ok(_) => debug!("Session disposed, dropping signaling event"),
        Err(_) => warn!("Session busy, dropping signaling event {event:?}"),
    }
}

async fn pump_signaling(
    weak: Weak<RefCell<Inner>>,
    mut inbound: mpsc::UnboundedReceiver<SignalingEvent>,
) {
    while let Some(event) = inbound.recv().await {
        let last = matches!(event, SignalingEvent::Disconnected(_));
        let Some(inner) = weak.upgrade() else {
            return;
        };
        dispatch_to(&inner, event);
        if last {
            return;
        }
    }
    if let Some(inner) = weak.upgrade() {
        dispatch_to(
            &inner,
            SignalingEvent::Disconnected("signaling channel closed".to_string()),
        );
    }
}

async fn pump_engine(weak: Weak<RefCell<Inner>>, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match inner.try_borrow_mut() {
            Ok(mut inner) if !inner.disposed => inner.on_engine_event(event),
            Ok(_) => return,
            Err(_) => warn!("Session busy, dropping engine event {event:?}"),
        };
    }
}

/// Run `f` on the session if it still exists and is not busy.
fn with_session<R>(weak: &Weak<RefCell<Inner>>, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
    let rc = weak.upgrade()?;
    let mut inner = match rc.try_borrow_mut() {
        Ok(inner) => inner,
        Err(_) => {
            warn!("Session busy, skipping deferred work");
            return None;
        }
    };
    if inner.disposed {
        return None;
    }
    Some(f(&mut inner))
}

/// Like [`with_session`], but only while the pipeline that scheduled the
/// work is still current.
fn with_generation<R>(
    weak: &Weak<RefCell<Inner>>,
    generation: u64,
    f: impl FnOnce(&mut Inner) -> R,
) -> Option<R> {
    with_session(weak, |inner| {
        if inner.generation != generation {
            debug!("Dropping work scheduled before the last reset");
            return None;
        }
        Some(f(inner))
    })
    .flatten()
}

/// Spawn onto the current `LocalSet`, first reaping tasks of `tasks` that
/// have already finished.  Aborting or dropping the set cancels the task.
fn spawn_scoped(tasks: &mut JoinSet<()>, future: impl Future<Output = ()> + 'static) {
    while tasks.try_join_next().is_some() {}
    tasks.spawn_local(future);
}

impl Inner {
    fn ensure_alive(&self) -> Result<(), SessionError> {
        if self.disposed {
            Err(SessionError::Disposed)
        } else {
            Ok(())
        }
    }

    fn room_and_peer(&self) -> (String, String) {
        (self.options.room_id.clone(), self.options.peer_id.clone())
    }

    fn send(&self, message: ClientMessage) -> bool {
        let Some(outbound) = &self.outbound else {
            debug!("Not connected, dropping {}", message.event_name());
            return false;
        };
        debug!("-> {}", message.event_name());
        outbound.send(message).is_ok()
    }

    fn send_required(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        self.ensure_alive()?;
        if !self.is_connected || !self.send(message) {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        self.events.emit(event);
    }

    fn notice(&self, severity: Severity, message: impl Into<String>) {
        self.emit(SessionEvent::notice(severity, message));
    }

    fn refresh_registry(&self) {
        self.registry.rebuild(&self.producers, &self.consumers);
    }

    fn mark_connected(&mut self) {
        if !self.is_connected {
            self.is_connected = true;
            info!("Signaling connected");
            self.emit(SessionEvent::Connected);
        }
    }

    fn send_join(&mut self) {
        self.join_in_flight = true;
        let (room_id, peer_id) = self.room_and_peer();
        info!("Joining room {room_id} as {peer_id}");
        self.send(ClientMessage::Join {
            room_id,
            peer_id,
            password: self.options.password.clone(),
        });
    }

    // === Teardown ===

    /// Close every transport, producer and consumer and forget the
    /// capabilities.  Local tracks survive; the screen share does not.
    fn reset_pipeline(&mut self) {
        self.generation += 1;
        self.pipeline_tasks.abort_all();
        self.handshakes.clear();
        self.flushing = false;
        self.presence_sent = false;

        for slot in self.producers.reset() {
            self.engine.close_producer(slot);
        }
        for consumer_id in self.consumers.clear() {
            self.engine.close_consumer(&consumer_id);
        }
        for transport_id in self.transports.clear() {
            self.engine.close_transport(&transport_id);
        }
        self.capabilities.reset();

        if !self.producers.take_screen_tracks().is_empty() {
            self.emit(SessionEvent::ScreenShareStopped);
        }
        self.refresh_registry();
    }

    /// Reset and release local media.
    fn teardown(&mut self) {
        self.is_joined = false;
        self.join_in_flight = false;
        self.acquiring_media = false;
        self.media_tasks.abort_all();
        self.reset_pipeline();
        self.producers.clear();
        self.refresh_registry();
    }

    fn dispose(&mut self) {
        self.teardown();
        self.outbound = None;
        self.is_connected = false;
        self.link_tasks.abort_all();
        self.engine_pump.abort_all();
        self.disposed = true;
        self.events.close();
        info!("Session disposed");
    }

    // === Signaling ===

    fn on_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::Connected => self.mark_connected(),
            SignalingEvent::Disconnected(reason) => self.on_disconnected(reason),
            SignalingEvent::ConnectError(reason) => {
                warn!("Signaling connect error: {reason}");
                self.emit(SessionEvent::ConnectError(reason));
            }
            SignalingEvent::Message(message) => self.on_message(message),
        }
    }

    fn on_disconnected(&mut self, reason: String) {
        warn!("Signaling disconnected: {reason}");
        self.outbound = None;
        self.is_connected = false;
        self.is_joined = false;
        self.join_in_flight = false;
        self.reset_pipeline();
        self.emit(SessionEvent::ConnectionLost(reason));
    }

    fn on_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::RouterCapabilities {
                router_rtp_capabilities,
            } => self.on_router_capabilities(router_rtp_capabilities),
            ServerMessage::RtpCapabilitiesSet {} => self.create_transports(),
            ServerMessage::TransportCreated(info) => self.on_transport_created(info),
            ServerMessage::TransportConnected { transport_id } => {
                self.on_transport_connected(&transport_id)
            }
            ServerMessage::ProducerCreated {
                producer_id,
                stream_id,
                app_data,
                ..
            } => {
                if self
                    .producers
                    .on_created(app_data.slot, &producer_id, &stream_id)
                {
                    self.emit(SessionEvent::ProducerPublished(app_data.slot));
                }
            }
            ServerMessage::Streams(announcements) => {
                debug!("Server lists {} stream(s)", announcements.len());
                for announcement in announcements {
                    self.on_announcement(announcement);
                }
            }
            ServerMessage::StreamAdded(announcement) => self.on_announcement(announcement),
            ServerMessage::StreamRemoved { stream_id, .. } => {
                for consumer_id in self.consumers.remove_stream(&stream_id) {
                    self.engine.close_consumer(&consumer_id);
                }
                self.refresh_registry();
            }
            ServerMessage::StreamUpdated(announcement) => {
                if announcement.publisher_id != self.options.peer_id
                    && self.consumers.update_stream(&announcement)
                {
                    self.refresh_registry();
                }
            }
            ServerMessage::ConsumerCreated(info) => self.on_consumer_created(info),
            ServerMessage::ConsumerResumed { consumer_id } => {
                if let Some(id) = consumer_id.filter(|id| !self.consumers.has_consumer(id)) {
                    debug!("Resume acknowledged for unknown consumer {id}");
                }
            }
            ServerMessage::ConsumerClosed { consumer_id, .. } => {
                if self.consumers.remove_consumer(&consumer_id).is_some() {
                    self.engine.close_consumer(&consumer_id);
                    self.refresh_registry();
                }
            }
            ServerMessage::UserSpeaking { peer_id } => self.emit(SessionEvent::SpeakingChanged {
                peer_id,
                speaking: true,
            }),
            ServerMessage::UserStoppedSpeaking { peer_id } => {
                self.emit(SessionEvent::SpeakingChanged {
                    peer_id,
                    speaking: false,
                })
            }
            ServerMessage::Presence { peer_id, metadata } => {
                if peer_id != self.options.peer_id
                    && self.consumers.set_presence(&peer_id, &metadata)
                {
                    self.refresh_registry();
                }
            }
            ServerMessage::RoomLocked {
                locked,
                locked_by,
                unlocked_by,
            } => self.emit(SessionEvent::RoomLocked {
                locked,
                by: if locked { locked_by } else { unlocked_by },
            }),
            ServerMessage::PeerLeft { peer_id } | ServerMessage::UserRemoved { peer_id } => {
                self.on_peer_left(peer_id)
            }
            ServerMessage::ReconnectRequired { reason, message } => {
                self.on_reconnect_required(reason, message)
            }
            ServerMessage::Error(err) => self.on_server_error(err),
        }
    }

    fn on_router_capabilities(&mut self, router: RtpCapabilities) {
        if self.join_in_flight {
            self.join_in_flight = false;
            self.is_joined = true;
            info!("Joined room {}", self.options.room_id);
            self.emit(SessionEvent::Joined);
            self.send_presence_if_needed();
        }
        if !self.is_joined {
            debug!("Ignoring router capabilities outside a join");
            return;
        }
        match self.capabilities.negotiate(self.engine.as_mut(), &router) {
            Ok(true) => {
                if let Some(local) = self.capabilities.local().cloned() {
                    self.send(ClientMessage::SetRtpCapabilities {
                        rtp_capabilities: local,
                    });
                }
            }
            Ok(false) => {}
            Err(e) => {
                error!("{e}");
                self.notice(Severity::Error, e.to_string());
            }
        }
    }

    fn create_transports(&mut self) {
        if !self.capabilities.is_loaded() {
            warn!("rtp-capabilities-set before capabilities were loaded");
            return;
        }
        for direction in [TransportDirection::Send, TransportDirection::Recv] {
            self.request_transport(direction);
        }
    }

    fn request_transport(&mut self, direction: TransportDirection) {
        if self.transports.request_create(direction) {
            debug!("Requesting {direction} transport");
            self.send(ClientMessage::CreateTransport {
                room_id: self.options.room_id.clone(),
                is_producer: direction.is_producer(),
            });
        }
    }

    fn on_transport_created(&mut self, info: TransportInfo) {
        if !self.capabilities.is_loaded() {
            warn!("Ignoring transport {} before capabilities were loaded", info.id);
            return;
        }
        let Some(direction) = self.transports.accept(&info) else {
            return;
        };
        let dtls_parameters = match self.engine.create_transport(direction, &info) {
            Ok(dtls) => dtls,
            Err(e) => {
                error!("Failed to build {direction} transport {}: {e}", info.id);
                self.transports.remove(direction);
                self.notice(Severity::Error, format!("Media connection failed: {e}"));
                return;
            }
        };
        if !self.transports.begin_handshake(&info.id) {
            return;
        }
        self.emit(SessionEvent::TransportStateChanged {
            direction,
            state: TransportState::Connecting,
        });
        self.send(ClientMessage::ConnectTransport {
            transport_id: info.id.clone(),
            dtls_parameters,
        });
        self.watch_handshake(info.id.clone());

        if direction == TransportDirection::Recv {
            // New receive path: (re)learn what is published.
            self.send(ClientMessage::GetStreams {
                room_id: self.options.room_id.clone(),
            });
        }
    }

    fn watch_handshake(&mut self, transport_id: String) {
        let (tx, mut rx) = oneshot::channel::<()>();
        self.handshakes.insert(transport_id.clone(), tx);
        let timeout = self.options.config.handshake_timeout();
        let grace = self.options.config.connecting_grace().min(timeout);
        let weak = self.me.clone();
        let generation = self.generation;

        spawn_scoped(&mut self.pipeline_tasks, async move {
            if tokio::time::timeout(grace, &mut rx).await.is_ok() {
                return;
            }
            with_generation(&weak, generation, |inner| inner.recheck_connecting(&transport_id));
            if tokio::time::timeout(timeout - grace, &mut rx).await.is_ok() {
                return;
            }
            with_generation(&weak, generation, |inner| {
                inner.on_handshake_timeout(&transport_id)
            });
        });
    }

    fn recheck_connecting(&mut self, transport_id: &str) {
        if !self.transports.is_handshaking(transport_id) {
            return;
        }
        warn!("Transport {transport_id} still connecting, probing");
        if self.transports.direction_of(transport_id) == Some(TransportDirection::Recv) {
            self.send(ClientMessage::GetStreams {
                room_id: self.options.room_id.clone(),
            });
        }
    }

    fn on_handshake_timeout(&mut self, transport_id: &str) {
        self.handshakes.remove(transport_id);
        let Some(direction) = self.transports.fail_handshake(transport_id) else {
            return;
        };
        let err = SessionError::HandshakeTimeout(transport_id.to_string());
        error!("{err}");
        self.engine.close_transport(transport_id);
        self.transports.remove(direction);
        self.emit(SessionEvent::TransportStateChanged {
            direction,
            state: TransportState::Failed,
        });
        self.notice(Severity::Error, err.to_string());
    }

    fn on_transport_connected(&mut self, transport_id: &str) {
        if let Some(waiter) = self.handshakes.remove(transport_id) {
            let _ = waiter.send(());
        }
        let Some(direction) = self.transports.complete_handshake(transport_id) else {
            return;
        };
        self.emit(SessionEvent::TransportStateChanged {
            direction,
            state: TransportState::Connected,
        });
        match direction {
            TransportDirection::Send => self.publish_ready(),
            TransportDirection::Recv => self.start_flush(),
        }
    }

    // === Producing ===

    fn start_media_acquisition(&mut self) {
        if self.producers.outcome().is_some() || self.acquiring_media {
            self.publish_ready();
            self.send_presence_if_needed();
            return;
        }
        self.acquiring_media = true;
        let devices = self.devices.clone();
        let weak = self.me.clone();
        spawn_scoped(&mut self.media_tasks, async move {
            let media = acquire_local_media(devices.as_ref()).await;
            if with_session(&weak, |inner| inner.on_local_media(media.clone())).is_none() {
                for track in &media.tracks {
                    track.stop();
                }
            }
        });
    }

    fn on_local_media(&mut self, media: LocalMedia) {
        self.acquiring_media = false;
        if media.outcome == AcquisitionOutcome::PresenceOnly {
            self.notice(
                Severity::Warning,
                "No camera or microphone available; others will see you without media",
            );
        }
        self.producers.set_local_media(media);
        self.refresh_registry();
        self.publish_ready();
        self.send_presence_if_needed();
    }

    fn send_presence_if_needed(&mut self) {
        if self.presence_sent
            || !self.is_joined
            || self.producers.outcome() != Some(AcquisitionOutcome::PresenceOnly)
        {
            return;
        }
        let (room_id, peer_id) = self.room_and_peer();
        self.presence_sent = self.send(ClientMessage::Presence {
            room_id,
            peer_id,
            metadata: self.producers.local_metadata(),
        });
    }

    /// Publish every slot that has a track and no producer yet.
    fn publish_ready(&mut self) {
        let Some(transport_id) = self
            .transports
            .ready_id(TransportDirection::Send)
            .map(str::to_string)
        else {
            return;
        };
        for slot in self.producers.ready_slots() {
            if !self.capabilities.supports(slot.kind()) {
                warn!("Router cannot take {} for {slot}", slot.kind());
                continue;
            }
            let Some(track) = self.producers.begin_publish(slot) else {
                continue;
            };
            match self.engine.produce(&transport_id, slot, &track) {
                Ok(rtp_parameters) => {
                    debug!("Publishing {slot}");
                    self.send(ClientMessage::Produce {
                        transport_id: transport_id.clone(),
                        kind: slot.kind(),
                        rtp_parameters,
                        metadata: self.producers.metadata_for(slot),
                        app_data: ProducerAppData { slot },
                    });
                }
                Err(e) => {
                    warn!("Failed to produce {slot}: {e}");
                    self.producers.publish_failed(slot);
                    self.notice(Severity::Warning, format!("Could not publish {slot}: {e}"));
                }
            }
        }
    }

    /// Close `slot` locally and on the server.
    fn close_producer(&mut self, slot: ProducerSlot) {
        if *self.producers.state(slot) != SlotState::Idle {
            self.engine.close_producer(slot);
        }
        if let Some(stream_id) = self.producers.close(slot) {
            self.send(ClientMessage::Unpublish { stream_id });
            self.emit(SessionEvent::ProducerClosed(slot));
        }
    }

    fn set_track_enabled(&mut self, slot: ProducerSlot, enabled: bool) -> Result<(), SessionError> {
        self.ensure_alive()?;
        let track = self
            .producers
            .track(slot)
            .cloned()
            .ok_or(SessionError::MediaUnavailable(slot))?;
        if track.is_enabled() == enabled {
            return Ok(());
        }
        track.set_enabled(enabled);
        info!("{slot} {}", if enabled { "enabled" } else { "disabled" });

        let metadata = self.producers.local_metadata();
        for live in [ProducerSlot::Webcam, ProducerSlot::Mic] {
            if let Some(stream_id) = self.producers.live_stream_id(live) {
                self.send(ClientMessage::Update {
                    stream_id: stream_id.to_string(),
                    metadata: metadata.clone(),
                });
            }
        }
        self.refresh_registry();
        Ok(())
    }

    fn stop_screen_share(&mut self) {
        if !self.producers.is_sharing_screen() {
            return;
        }
        self.close_producer(ProducerSlot::Screen);
        self.close_producer(ProducerSlot::ScreenAudio);
        self.producers.take_screen_tracks();
        info!("Screen share stopped");
        self.emit(SessionEvent::ScreenShareStopped);
        self.refresh_registry();
    }

    // === Consuming ===

    fn recv_accepts_now(&self) -> Option<String> {
        if self.flushing || self.consumers.has_pending() {
            return None;
        }
        self.transports
            .ready_id(TransportDirection::Recv)
            .map(str::to_string)
    }

    fn on_announcement(&mut self, announcement: StreamAnnouncement) {
        if announcement.publisher_id == self.options.peer_id {
            debug!("Skipping own stream {}", announcement.stream_id);
            return;
        }
        let transport_id = self.recv_accepts_now();
        let stream_id = announcement.stream_id.clone();
        match self.consumers.admit(announcement, transport_id.is_some()) {
            Admission::ConsumeNow => {
                if let Some(transport_id) = transport_id {
                    self.send(ClientMessage::Consume {
                        stream_id,
                        transport_id,
                    });
                }
            }
            Admission::Queued => self.start_flush(),
            Admission::Duplicate | Admission::Invalid(_) => {}
        }
    }

    /// Replay queued announcements one at a time, `flush_stagger` apart.
    fn start_flush(&mut self) {
        if self.flushing
            || !self.consumers.has_ready_pending(Instant::now())
            || !self.transports.is_connected(TransportDirection::Recv)
        {
            return;
        }
        info!(
            "Flushing {} pending announcement(s)",
            self.consumers.pending_len()
        );
        self.flushing = true;
        let stagger = self.options.config.flush_stagger();
        let weak = self.me.clone();
        let generation = self.generation;
        spawn_scoped(&mut self.pipeline_tasks, async move {
            while with_generation(&weak, generation, |inner| inner.flush_one()).unwrap_or(false) {
                tokio::time::sleep(stagger).await;
            }
        });
    }

    /// Send one queued `consume`.  Returns whether more are waiting.
    fn flush_one(&mut self) -> bool {
        let Some(transport_id) = self
            .transports
            .ready_id(TransportDirection::Recv)
            .map(str::to_string)
        else {
            self.flushing = false;
            return false;
        };
        let now = Instant::now();
        if let Some(announcement) = self.consumers.next_pending(now) {
            self.send(ClientMessage::Consume {
                stream_id: announcement.stream_id,
                transport_id,
            });
        }
        // Entries still backing off are picked up by their retry timer.
        let more = self.consumers.has_ready_pending(now);
        self.flushing = more;
        more
    }

    fn on_consumer_created(&mut self, info: ConsumerInfo) {
        if !self.consumers.is_requested(&info.stream_id) {
            debug!("Ignoring unrequested consumer {}", info.consumer_id);
            return;
        }
        let Some(transport_id) = self
            .transports
            .id(TransportDirection::Recv)
            .map(str::to_string)
        else {
            return;
        };
        match self.engine.consume(&transport_id, &info) {
            Ok(track) => {
                if self.consumers.add_consumer(&info, track).is_some() {
                    self.send(ClientMessage::ResumeConsumer {
                        consumer_id: info.consumer_id.clone(),
                    });
                    self.refresh_registry();
                }
            }
            Err(e) => {
                warn!("Failed to consume {}: {e}", info.stream_id);
                if let Some(entry) = self.consumers.take_request(&info.stream_id) {
                    self.retry_later(entry);
                }
            }
        }
    }

    fn retry_later(&mut self, entry: PendingEntry) {
        let stream_id = entry.stream_id().to_string();
        let delay = self.options.config.retry_backoff(entry.attempts + 1);
        if !self.consumers.requeue(entry, Instant::now() + delay) {
            self.notice(
                Severity::Warning,
                format!("Could not receive stream {stream_id}"),
            );
            return;
        }
        debug!("Retrying {stream_id} in {delay:?}");
        let weak = self.me.clone();
        let generation = self.generation;
        spawn_scoped(&mut self.pipeline_tasks, async move {
            tokio::time::sleep(delay).await;
            with_generation(&weak, generation, |inner| inner.start_flush());
        });
    }

    // === Room ===

    fn on_peer_left(&mut self, peer_id: String) {
        if peer_id == self.options.peer_id {
            warn!("Removed from room {}", self.options.room_id);
            self.is_joined = false;
            self.join_in_flight = false;
            self.reset_pipeline();
        } else {
            for consumer_id in self.consumers.remove_publisher(&peer_id) {
                self.engine.close_consumer(&consumer_id);
            }
            self.refresh_registry();
        }
        self.emit(SessionEvent::PeerLeft(peer_id));
    }

    fn on_reconnect_required(&mut self, reason: String, message: Option<String>) {
        warn!(
            "Server requires reconnect ({reason}): {}",
            message.as_deref().unwrap_or("-")
        );
        self.reset_pipeline();
        self.is_joined = false;
        self.join_in_flight = false;
        self.emit(SessionEvent::ReconnectRequired(reason));
        if self.is_connected {
            self.send_join();
        }
    }

    fn on_server_error(&mut self, err: ServerError) {
        match err.code {
            ErrorCode::StreamNotPrioritized => {
                info!("Stream not prioritized: {}", err.message);
                if let Some(stream_id) = &err.stream_id {
                    self.consumers.take_request(stream_id);
                }
            }
            ErrorCode::RoomPasswordRequired => {
                warn!("Room {} requires a password", self.options.room_id);
                self.join_in_flight = false;
                self.is_joined = false;
                self.emit(SessionEvent::PasswordRequired);
                self.notice(Severity::Warning, err.message);
            }
            ErrorCode::Other(code) => {
                warn!("Server error {code}: {}", err.message);
                self.notice(Severity::Warning, err.message);
                if let Some(entry) = err
                    .stream_id
                    .as_deref()
                    .and_then(|id| self.consumers.take_request(id))
                {
                    self.retry_later(entry);
                }
            }
        }
    }

    // === Engine ===

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::TransportStateChanged {
                transport_id,
                state,
            } => {
                let Some(direction) = self.transports.direction_of(&transport_id) else {
                    return;
                };
                if self.transports.on_state_change(&transport_id, state).is_some() {
                    self.emit(SessionEvent::TransportStateChanged { direction, state });
                    self.on_transport_lost(direction, &transport_id, state);
                }
            }
            EngineEvent::TrackEnded { track_id } => {
                let Some(slot) = self.producers.slot_of_track(&track_id) else {
                    return;
                };
                if let Some(track) = self.producers.track(slot) {
                    track.stop();
                }
                if slot.is_screen() {
                    self.stop_screen_share();
                } else {
                    warn!("Local {slot} track ended");
                    self.close_producer(slot);
                    self.refresh_registry();
                }
            }
            EngineEvent::NetworkQuality(quality) => {
                let pause = quality == NetworkQuality::Poor;
                for slot in ProducerSlot::ALL {
                    if slot.kind() != MediaKind::Video || !self.producers.set_paused(slot, pause)
                    {
                        continue;
                    }
                    let verb = if pause { "Pausing" } else { "Resuming" };
                    info!("{verb} {slot} for {quality:?} network");
                    if pause {
                        self.engine.pause_producer(slot);
                    } else {
                        self.engine.resume_producer(slot);
                    }
                }
            }
        }
    }

    fn on_transport_lost(
        &mut self,
        direction: TransportDirection,
        transport_id: &str,
        state: TransportState,
    ) {
        self.handshakes.remove(transport_id);
        match direction {
            TransportDirection::Recv => {
                self.notice(
                    Severity::Warning,
                    format!("Receive connection {state}, reconnecting"),
                );
                for consumer_id in self.consumers.clear_remote_media() {
                    self.engine.close_consumer(&consumer_id);
                }
                self.engine.close_transport(transport_id);
                self.transports.remove(TransportDirection::Recv);
                self.flushing = false;
                self.refresh_registry();

                let max = self.options.config.max_recv_recreate_attempts;
                let Some(attempt) = self.transports.next_recreate_attempt(max) else {
                    error!("Receive transport lost {max} times, giving up");
                    self.notice(
                        Severity::Error,
                        "Receive connection lost; rejoin to restore remote media",
                    );
                    return;
                };
                let delay = self.options.config.recv_recreate_delay();
                info!("Re-creating receive transport in {delay:?} (attempt {attempt}/{max})");
                let weak = self.me.clone();
                let generation = self.generation;
                spawn_scoped(&mut self.pipeline_tasks, async move {
                    tokio::time::sleep(delay).await;
                    with_generation(&weak, generation, |inner| {
                        if inner.is_joined && inner.capabilities.is_loaded() {
                            inner.request_transport(TransportDirection::Recv);
                        }
                    });
                });
            }
            TransportDirection::Send => {
                self.notice(
                    Severity::Warning,
                    format!("Send connection {state}; reconnect to publish again"),
                );
                for slot in self.producers.reset() {
                    self.engine.close_producer(slot);
                }
                self.engine.close_transport(transport_id);
                self.transports.remove(TransportDirection::Send);
                self.refresh_registry();
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.disposed {
            self.dispose();
        }
    }
}
