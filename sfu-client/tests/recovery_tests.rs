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

//! Recovery tests.
//!
//! Verified scenarios:
//! - A router restart tears the whole pipeline down and rejoins from scratch
//! - Acks and timers from before a reset have no effect
//! - A lost receive transport is re-created a bounded number of times
//! - Handshakes that never complete are rechecked once, then failed
//! - Unsolicited or duplicate transports are ignored
//! - Being removed from the room resets the session

mod common;

use common::*;
use sfu_client::{
    EngineEvent, SessionConfig, SessionEvent, Severity, TransportDirection, TransportState,
};
use sfu_types::{ClientMessage, ProducerSlot, ServerMessage};

fn count_notices(events: &[SessionEvent], severity: Severity) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Notice { severity: s, .. } if *s == severity))
        .count()
}

fn fail_transport(h: &Harness, transport_id: &str) {
    h.client
        .engine_events()
        .send(EngineEvent::TransportStateChanged {
            transport_id: transport_id.to_string(),
            state: TransportState::Failed,
        })
        .unwrap();
}

// =========================================================================
// Router restart
// =========================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn router_restart_resets_the_pipeline_and_rejoins() {
    run_local(async {
        let mut h = Harness::new("alice");
        h.establish().await;
        h.announce_and_consume("bob-webcam", video()).await;
        h.announce("carol-webcam", video()).await;
        h.sent();

        h.reply(ServerMessage::ReconnectRequired {
            reason: "router-restart".into(),
            message: Some("media server restarted".into()),
        });
        settle().await;

        assert!(h
            .take_events()
            .contains(&SessionEvent::ReconnectRequired("router-restart".into())));
        let state = h.client.state().unwrap();
        assert!(state.is_connected);
        assert!(!state.is_joined);
        assert!(!state.capabilities_loaded);
        assert_eq!(state.send_transport, None);
        assert_eq!(state.recv_transport, None);
        assert!(state.live_producers.is_empty());
        assert_eq!(state.consumer_count, 0);
        assert_eq!(state.pending_count, 0);
        assert_eq!(h.registry_ids(), vec!["local"]);
        {
            let engine = h.engine.borrow();
            assert_eq!(
                engine.closed_producers,
                vec![ProducerSlot::Webcam, ProducerSlot::Mic]
            );
            assert_eq!(engine.closed_consumers, vec![consumer_id("bob-webcam")]);
            assert_eq!(engine.closed_transports.len(), 2);
        }
        assert_eq!(
            h.sent(),
            vec![ClientMessage::Join {
                room_id: ROOM.into(),
                peer_id: "alice".into(),
                password: None,
            }]
        );

        // The ack for a consume sent before the restart finds nothing waiting.
        h.reply(ServerMessage::ConsumerCreated(consumer_info("carol-webcam")));
        settle().await;
        assert_eq!(h.engine.borrow().consumed, vec!["bob-webcam"]);

        // Rejoin: capabilities reload and the kept tracks are published again.
        h.reply(ServerMessage::RouterCapabilities {
            router_rtp_capabilities: router_caps(),
        });
        settle().await;
        assert_eq!(h.engine.borrow().loads, 2);
        assert_eq!(names(&h.sent()), vec!["set-rtp-capabilities"]);

        h.reply(ServerMessage::RtpCapabilitiesSet {});
        settle().await;
        assert_eq!(create_transport_requests(&h.sent()), vec![true, false]);

        h.reply(ServerMessage::TransportCreated(transport("send-2", true)));
        settle().await;
        h.connect_transport("send-2").await;
        let sent = h.sent();
        assert_eq!(h.ack_produces(&sent).await.len(), 2);
        assert_eq!(h.engine.borrow().produced.len(), 4);
        assert_eq!(
            h.client.state().unwrap().live_producers,
            vec![ProducerSlot::Webcam, ProducerSlot::Mic]
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn reset_cancels_a_flush_in_progress() {
    run_local(async {
        let mut h = Harness::new("alice");
        h.join().await;
        h.create_transports().await;
        h.connect_transport(SEND_ID).await;
        for stream_id in ["bob-webcam", "carol-webcam", "dave-webcam"] {
            h.announce(stream_id, video()).await;
        }
        h.connect_transport(RECV_ID).await;
        h.sent();

        h.reply(ServerMessage::ReconnectRequired {
            reason: "router-restart".into(),
            message: None,
        });
        settle().await;
        advance(5_000).await;

        assert_eq!(names(&h.sent()), vec!["join"]);
        assert_eq!(h.client.state().unwrap().pending_count, 0);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn removal_from_the_room_resets_the_session() {
    run_local(async {
        let mut h = Harness::new("alice");
        h.establish().await;
        h.announce_and_consume("bob-webcam", video()).await;

        h.reply(ServerMessage::UserRemoved {
            peer_id: "alice".into(),
        });
        settle().await;

        assert!(h
            .take_events()
            .contains(&SessionEvent::PeerLeft("alice".into())));
        let state = h.client.state().unwrap();
        assert!(!state.is_joined);
        assert_eq!(state.send_transport, None);
        assert_eq!(state.consumer_count, 0);
        assert_eq!(h.registry_ids(), vec!["local"]);
        assert!(h.sent().is_empty());
    })
    .await;
}

// =========================================================================
// Receive transport loss
// =========================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn lost_receive_transport_is_recreated() {
    run_local(async {
        let mut h = Harness::new("alice");
        h.establish().await;
        h.announce_and_consume("bob-webcam", video()).await;

        fail_transport(&h, RECV_ID);
        settle().await;

        let events = h.take_events();
        assert!(events.contains(&SessionEvent::TransportStateChanged {
            direction: TransportDirection::Recv,
            state: TransportState::Failed,
        }));
        assert_eq!(count_notices(&events, Severity::Warning), 1);
        assert_eq!(h.registry_ids(), vec!["local"]);
        assert_eq!(h.client.state().unwrap().recv_transport, None);
        assert_eq!(
            h.client.state().unwrap().live_producers,
            vec![ProducerSlot::Webcam, ProducerSlot::Mic]
        );
        {
            let engine = h.engine.borrow();
            assert_eq!(engine.closed_consumers, vec![consumer_id("bob-webcam")]);
            assert_eq!(engine.closed_transports, vec![RECV_ID.to_string()]);
        }
        assert!(h.sent().is_empty());

        advance(2_000).await;
        assert_eq!(create_transport_requests(&h.sent()), vec![false]);

        h.reply(ServerMessage::TransportCreated(transport("recv-2", false)));
        settle().await;
        assert_eq!(names(&h.sent()), vec!["connect-transport", "get-streams"]);

        // The server re-lists the room; it is consumed once the new path is up.
        h.reply(ServerMessage::Streams(vec![announcement("bob-webcam", video())]));
        settle().await;
        assert!(h.sent().is_empty());

        h.connect_transport("recv-2").await;
        let sent = h.sent();
        assert_eq!(
            sent,
            vec![ClientMessage::Consume {
                stream_id: "bob-webcam".into(),
                transport_id: "recv-2".into(),
            }]
        );
        h.serve_consumes(&sent).await;
        assert_eq!(h.registry_ids(), vec!["local", "remote-bob-webcam"]);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn receive_transport_recreation_is_bounded() {
    run_local(async {
        let config = SessionConfig {
            max_recv_recreate_attempts: 1,
            ..Default::default()
        };
        let mut h = Harness::with("alice", FakeDevices::all(), config);
        h.establish().await;

        fail_transport(&h, RECV_ID);
        settle().await;
        advance(2_000).await;
        assert_eq!(create_transport_requests(&h.sent()), vec![false]);

        h.reply(ServerMessage::TransportCreated(transport("recv-2", false)));
        settle().await;
        h.sent();
        fail_transport(&h, "recv-2");
        settle().await;

        let events = h.take_events();
        assert_eq!(count_notices(&events, Severity::Error), 1);

        advance(10_000).await;
        assert!(create_transport_requests(&h.sent()).is_empty());
        assert_eq!(h.client.state().unwrap().recv_transport, None);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn non_terminal_transport_states_are_ignored() {
    run_local(async {
        let mut h = Harness::new("alice");
        h.establish().await;

        h.client
            .engine_events()
            .send(EngineEvent::TransportStateChanged {
                transport_id: RECV_ID.into(),
                state: TransportState::Connecting,
            })
            .unwrap();
        h.client
            .engine_events()
            .send(EngineEvent::TransportStateChanged {
                transport_id: "unknown".into(),
                state: TransportState::Failed,
            })
            .unwrap();
        settle().await;

        assert!(h.take_events().is_empty());
        assert_eq!(
            h.client.state().unwrap().recv_transport,
            Some(TransportState::Connected)
        );
    })
    .await;
}

// =========================================================================
// Handshakes
// =========================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn stalled_handshakes_are_rechecked_then_failed() {
    run_local(async {
        let mut h = Harness::new("alice");
        h.join().await;
        h.create_transports().await;
        h.sent();
        h.take_events();

        advance(10_000).await;
        assert_eq!(names(&h.sent()), vec!["get-streams"]);
        assert!(h.take_events().is_empty());

        advance(20_000).await;
        let events = h.take_events();
        for direction in [TransportDirection::Send, TransportDirection::Recv] {
            assert!(events.contains(&SessionEvent::TransportStateChanged {
                direction,
                state: TransportState::Failed,
            }));
        }
        assert_eq!(count_notices(&events, Severity::Error), 2);

        let state = h.client.state().unwrap();
        assert_eq!(state.send_transport, None);
        assert_eq!(state.recv_transport, None);
        assert_eq!(h.engine.borrow().closed_transports.len(), 2);

        // A late ack for a timed-out transport is ignored.
        h.connect_transport(SEND_ID).await;
        assert!(h.engine.borrow().produced.is_empty());
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn connected_transports_are_not_timed_out() {
    run_local(async {
        let mut h = Harness::new("alice");
        h.establish().await;

        advance(120_000).await;
        assert!(h.take_events().is_empty());
        assert!(h.sent().is_empty());
        assert_eq!(
            h.client.state().unwrap().send_transport,
            Some(TransportState::Connected)
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unsolicited_and_duplicate_transports_are_ignored() {
    run_local(async {
        let mut h = Harness::new("alice");

        // Before capabilities are loaded.
        h.client.join().unwrap();
        settle().await;
        h.reply(ServerMessage::TransportCreated(transport("early", true)));
        settle().await;
        assert!(h.engine.borrow().created_transports.is_empty());

        h.reply(ServerMessage::RouterCapabilities {
            router_rtp_capabilities: router_caps(),
        });
        settle().await;
        h.reply(ServerMessage::RtpCapabilitiesSet {});
        settle().await;
        h.create_transports().await;
        h.sent();

        h.reply(ServerMessage::TransportCreated(transport("send-9", true)));
        h.reply(ServerMessage::TransportCreated(transport("recv-9", false)));
        settle().await;

        assert_eq!(h.engine.borrow().created_transports.len(), 2);
        assert!(h.sent().is_empty());
        assert_eq!(
            h.client.state().unwrap().send_transport,
            Some(TransportState::Connecting)
        );
    })
    .await;
}
