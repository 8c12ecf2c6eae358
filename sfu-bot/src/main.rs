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

mod cli_args;
mod config;
mod synthetic;

use anyhow::Context;
use async_broadcast::RecvError;
use clap::Parser;
use cli_args::Opt;
use config::BotConfig;
use sfu_client::{RegistrySnapshot, SessionClient, SessionEvent, Severity};
use sfu_transport::SignalingSocket;
use synthetic::{SyntheticDevices, SyntheticEngine};
use tokio::task::LocalSet;
use tokio::time::{sleep, Duration};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))?;

    let opt = Opt::parse();
    let mut config = BotConfig::load(opt.config.as_deref())?;
    config.apply_overrides(&opt);

    // The session client is single-threaded.
    LocalSet::new().run_until(run(config)).await
}

async fn run(config: BotConfig) -> anyhow::Result<()> {
    let url = config.server_url()?;
    let options = config.session_options();
    info!(
        "Joining room {} as {} via {}",
        options.room_id, options.peer_id, url
    );

    let link = SignalingSocket::connect(url.as_str())
        .await
        .with_context(|| format!("Could not reach {url}"))?;

    let client = SessionClient::new(
        options,
        SyntheticEngine::new(),
        SyntheticDevices {
            video: config.enable_video,
            audio: config.enable_audio,
        },
    );
    let mut events = client.subscribe_events();
    let mut registry = client.watch_registry();

    client.connect(link)?;
    client.join()?;

    let deadline = config.duration_secs.map(Duration::from_secs);
    let outcome = tokio::select! {
        result = watch_session(&mut events, &mut registry) => result,
        _ = async {
            match deadline {
                Some(d) => sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        } => {
            info!("Run time elapsed, leaving");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, leaving");
            Ok(())
        }
    };

    if let Err(e) = client.leave() {
        debug!("Leave skipped: {e}");
    }
    client.dispose();
    outcome
}

async fn watch_session(
    events: &mut async_broadcast::Receiver<SessionEvent>,
    registry: &mut tokio::sync::watch::Receiver<RegistrySnapshot>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => handle_event(event)?,
                Err(RecvError::Overflowed(n)) => warn!("Dropped {n} session events"),
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = registry.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                log_registry(&registry.borrow_and_update());
            }
        }
    }
}

fn handle_event(event: SessionEvent) -> anyhow::Result<()> {
    match event {
        SessionEvent::ConnectionLost(reason) => {
            anyhow::bail!("Signaling connection lost: {reason}")
        }
        SessionEvent::PasswordRequired => {
            anyhow::bail!("Room requires a password (use --password or ROOM_PASSWORD)")
        }
        SessionEvent::Notice { severity, message } => match severity {
            Severity::Info => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        },
        SessionEvent::TransportStateChanged { direction, state } => {
            info!("{direction} transport {state}")
        }
        SessionEvent::SpeakingChanged { peer_id, speaking } => {
            debug!("{peer_id} speaking: {speaking}")
        }
        other => info!("{other:?}"),
    }
    Ok(())
}

fn log_registry(snapshot: &RegistrySnapshot) {
    let remote: Vec<&str> = snapshot
        .iter()
        .filter(|e| !e.is_local)
        .map(|e| e.id.as_str())
        .collect();
    info!(
        "{} streams in view, remote: [{}]",
        snapshot.len(),
        remote.join(", ")
    );
}
