use crate::rtc;
use crate::sfu::{ConvergencePolicy, Sfu};
use anyhow::Context;
use fanout_protocol::IceServer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::API;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    pub static_dir: PathBuf,
    pub keyframe_interval: Duration,
    pub convergence: ConvergencePolicy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
            static_dir: PathBuf::from("./static"),
            keyframe_interval: crate::sfu::keyframe::DEFAULT_KEYFRAME_INTERVAL,
            convergence: ConvergencePolicy::default(),
        }
    }
}

impl Config {
    /// Load from environment variables, falling back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Ok(bind_address) = std::env::var("BIND_ADDRESS") {
            config.bind_address = bind_address;
        }

        if let Ok(stun) = std::env::var("STUN_SERVERS") {
            config.stun_servers = split_list(&stun).map(String::from).collect();
        }

        if let Ok(turn) = std::env::var("TURN_SERVERS") {
            config.turn_servers = parse_turn_servers(&turn)?;
        }

        if let Ok(dir) = std::env::var("STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }

        if let Ok(secs) = std::env::var("KEYFRAME_INTERVAL_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("KEYFRAME_INTERVAL_SECS is not a number: {}", secs))?;
            anyhow::ensure!(secs > 0, "KEYFRAME_INTERVAL_SECS must be positive");
            config.keyframe_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// ICE servers handed to peer connections and to clients
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let stun = self.stun_servers.iter().map(|url| IceServer {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        });

        let turn = self.turn_servers.iter().map(|turn| IceServer {
            urls: vec![turn.url.clone()],
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });

        stun.chain(turn).collect()
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parse `url|username|credential` entries separated by commas
fn parse_turn_servers(value: &str) -> anyhow::Result<Vec<TurnServer>> {
    split_list(value)
        .map(|entry| {
            let mut parts = entry.splitn(3, '|');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(url), Some(username), Some(credential)) => Ok(TurnServer {
                    url: url.to_string(),
                    username: username.to_string(),
                    credential: credential.to_string(),
                }),
                _ => anyhow::bail!("TURN server entry must be url|username|credential: {}", entry),
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sfu: Arc<Sfu>,
    pub api: Arc<API>,
}

impl AppState {
    /// Build the WebRTC API and start the SFU background tasks
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let api = rtc::build_api().context("Failed to build WebRTC API")?;
        let sfu = Sfu::start(config.convergence, config.keyframe_interval);

        Ok(Self {
            config,
            sfu,
            api: Arc::new(api),
        })
    }
}
