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

use clap::Parser;

/// SFU bot
///
/// Joins a room as a headless participant with synthetic camera and
/// microphone tracks, and logs everything the session sees.
///
/// Settings come from a YAML file (`--config` or `BOT_CONFIG_PATH`), else from
/// environment variables; flags given here override both.
#[derive(Parser, Debug, Clone, Default)]
#[clap(name = "sfu-bot")]
pub struct Opt {
    /// YAML configuration file.
    #[clap(long = "config", short = 'c')]
    pub config: Option<String>,

    /// Signaling WebSocket URL (ws:// or wss://).
    #[clap(long = "url")]
    pub url: Option<String>,

    #[clap(long = "room")]
    pub room: Option<String>,

    /// Peer id to join as.  A random `bot-xxxxxx` id is used if omitted.
    #[clap(long = "peer-id")]
    pub peer_id: Option<String>,

    #[clap(long = "password")]
    pub password: Option<String>,

    /// Join without a camera track.
    #[clap(long = "no-video")]
    pub no_video: bool,

    /// Join without a microphone track.
    #[clap(long = "no-audio")]
    pub no_audio: bool,

    /// Leave after this many seconds instead of running until Ctrl-C.
    #[clap(long = "duration-secs")]
    pub duration_secs: Option<u64>,
}
