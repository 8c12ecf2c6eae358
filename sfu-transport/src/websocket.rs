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

//! Native WebSocket signaling using `tokio-tungstenite`.
//!
//! Frames are JSON text; binary frames are ignored.
//!
//! # Example
//!
//! ```no_run
//! use sfu_transport::websocket::SignalingSocket;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let link = SignalingSocket::connect("wss://sfu.example.com/signaling?room=R1").await?;
//! // hand `link` to a SessionClient
//! # Ok(())
//! # }
//! ```

use crate::link::{SignalingEvent, SignalingLink};
use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use sfu_types::ServerMessage;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Error type for WebSocket connection attempts.
///
/// Keeps the HTTP status when the server rejects the upgrade, so callers can
/// tell an auth failure from a network failure.
#[derive(Debug, thiserror::Error)]
pub enum SignalingConnectError {
    #[error("invalid signaling url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The server rejected the upgrade with an HTTP error status.
    #[error("HTTP {status}: WebSocket upgrade rejected")]
    HttpError { status: u16 },

    /// A transport-level or protocol-level error occurred.
    #[error("WebSocket connection failed: {0}")]
    Other(String),
}

impl SignalingConnectError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status } => Some(*status),
            _ => None,
        }
    }
}

/// Opens signaling connections over WebSocket.
pub struct SignalingSocket;

impl SignalingSocket {
    /// Connect and return a [`SignalingLink`].
    pub async fn connect(url: &str) -> Result<SignalingLink> {
        Self::try_connect(url).await.map_err(|e| anyhow!("{e}"))
    }

    /// Connect, returning a typed error on failure.
    ///
    /// On success the link's inbound side already holds
    /// [`SignalingEvent::Connected`].  When the socket later drops, a single
    /// [`SignalingEvent::Disconnected`] is delivered and the inbound side closes.
    pub async fn try_connect(
        url: &str,
    ) -> std::result::Result<SignalingLink, SignalingConnectError> {
        let parsed = url::Url::parse(url).map_err(|e| SignalingConnectError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(SignalingConnectError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        info!("Signaling connecting to {url}");
        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(resp) => {
                    SignalingConnectError::HttpError {
                        status: resp.status().as_u16(),
                    }
                }
                other => SignalingConnectError::Other(format!(
                    "connection to '{url}' failed: {other}"
                )),
            })?;
        info!("Signaling connected to {url} (HTTP {})", response.status());

        let (mut writer, mut reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<sfu_types::ClientMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalingEvent>();
        let _ = in_tx.send(SignalingEvent::Connected);

        // Writer: ends when the session drops its sender.
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode '{}': {e}", message.event_name());
                        continue;
                    }
                };
                debug!("-> {}", message.event_name());
                if let Err(e) = writer.send(Message::Text(text)).await {
                    warn!("Signaling send error: {e}");
                    break;
                }
            }
            if let Err(e) = writer.send(Message::Close(None)).await {
                debug!("Error sending close frame: {e}");
            }
            debug!("Signaling writer loop ended");
        });

        tokio::spawn(async move {
            let reason = loop {
                let Some(frame) = reader.next().await else {
                    break "stream ended".to_string();
                };
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            if in_tx.send(SignalingEvent::Message(message)).is_err() {
                                debug!("Session dropped inbound side");
                                return;
                            }
                        }
                        Err(e) => debug!("Ignoring unrecognised signaling frame: {e}"),
                    },
                    Ok(Message::Close(frame)) => {
                        info!("Signaling received close frame");
                        break frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {
                        debug!("Signaling non-text frame ignored");
                    }
                    Err(e) => break e.to_string(),
                }
            };
            let _ = in_tx.send(SignalingEvent::Disconnected(reason));
            debug!("Signaling reader loop ended");
        });

        Ok(SignalingLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
