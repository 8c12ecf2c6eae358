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

use crate::cli_args::Opt;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sfu_client::{SessionConfig, SessionOptions};
use std::fs;
use url::Url;

const DEFAULT_SERVER_URL: &str = "ws://localhost:3016/ws";
const DEFAULT_ROOM: &str = "test-room";

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BotConfig {
    pub server_url: String,
    pub room_id: String,
    pub peer_id: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub enable_video: bool,
    #[serde(default = "default_true")]
    pub enable_audio: bool,
    pub duration_secs: Option<u64>,
    /// Session tunables; anything not listed keeps its default.
    #[serde(default)]
    pub session: SessionConfig,
}

impl BotConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {path}: {e}"))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: BotConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// File named by `path` or `BOT_CONFIG_PATH`, else environment variables.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Ok(config_path) = std::env::var("BOT_CONFIG_PATH") {
            return Self::from_file(&config_path);
        }
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(true)
        };
        BotConfig {
            server_url: lookup("SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            room_id: lookup("ROOM").unwrap_or_else(|| DEFAULT_ROOM.to_string()),
            peer_id: lookup("PEER_ID").filter(|v| !v.is_empty()),
            password: lookup("ROOM_PASSWORD").filter(|v| !v.is_empty()),
            enable_video: flag("ENABLE_VIDEO"),
            enable_audio: flag("ENABLE_AUDIO"),
            duration_secs: lookup("DURATION_SECS").and_then(|v| v.parse().ok()),
            session: SessionConfig::default(),
        }
    }

    /// Command-line flags win over file and environment.
    pub fn apply_overrides(&mut self, opt: &Opt) {
        if let Some(url) = &opt.url {
            self.server_url = url.clone();
        }
        if let Some(room) = &opt.room {
            self.room_id = room.clone();
        }
        if let Some(peer_id) = &opt.peer_id {
            self.peer_id = Some(peer_id.clone());
        }
        if let Some(password) = &opt.password {
            self.password = Some(password.clone());
        }
        if opt.no_video {
            self.enable_video = false;
        }
        if opt.no_audio {
            self.enable_audio = false;
        }
        if opt.duration_secs.is_some() {
            self.duration_secs = opt.duration_secs;
        }
    }

    pub fn server_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| anyhow::anyhow!("Invalid server URL: {e:?}"))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(anyhow::anyhow!(
                "Server URL must use ws:// or wss://, got {other}://"
            )),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let peer_id = self.peer_id.clone().unwrap_or_else(random_peer_id);
        let options = SessionOptions::new(&self.room_id, peer_id).with_config(self.session.clone());
        match &self.password {
            Some(password) => options.with_password(password),
            None => options,
        }
    }
}

fn random_peer_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("bot-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn yaml_fills_in_defaults() {
        let config = BotConfig::from_yaml(
            r#"
server_url: wss://sfu.example.com/ws
room_id: standup
session:
  handshake_timeout_ms: 5000
"#,
        )
        .unwrap();
        assert_eq!(config.room_id, "standup");
        assert!(config.enable_video);
        assert!(config.enable_audio);
        assert_eq!(config.peer_id, None);
        assert_eq!(config.session.handshake_timeout_ms, 5000);
        assert_eq!(config.session.flush_stagger_ms, 100);
        assert_eq!(config.server_url().unwrap().scheme(), "wss");
    }

    #[test]
    fn environment_fallback() {
        let env: HashMap<&str, &str> = [
            ("SERVER_URL", "ws://10.0.0.2:3016/ws"),
            ("ROOM", "R1"),
            ("PEER_ID", "alice"),
            ("ROOM_PASSWORD", ""),
            ("ENABLE_VIDEO", "false"),
        ]
        .into_iter()
        .collect();
        let config = BotConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.room_id, "R1");
        assert_eq!(config.peer_id.as_deref(), Some("alice"));
        assert_eq!(config.password, None);
        assert!(!config.enable_video);
        assert!(config.enable_audio);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn flags_override_configuration() {
        let mut config = BotConfig::from_lookup(|_| None);
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        config.apply_overrides(&Opt {
            room: Some("R2".into()),
            password: Some("secret".into()),
            no_audio: true,
            duration_secs: Some(30),
            ..Default::default()
        });
        assert_eq!(config.room_id, "R2");
        assert!(!config.enable_audio);
        assert!(config.enable_video);
        assert_eq!(config.duration_secs, Some(30));

        let options = config.session_options();
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert!(options.peer_id.starts_with("bot-"));
    }

    #[test]
    fn rejects_non_websocket_urls() {
        let mut config = BotConfig::from_lookup(|_| None);
        config.server_url = "https://sfu.example.com".into();
        assert!(config.server_url().is_err());
        config.server_url = "not a url".into();
        assert!(config.server_url().is_err());
    }
}
