use anyhow::{Context, Result};
use gcs_failsafe::FailsafeConfig;
use gcs_fc::LinkConfig;
use gcs_payload::WinchConfig;
use gcs_session::SessionConfig;
use gcs_uplink::RelayConfig;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub api: ApiConfig,
    pub failsafe: FailsafeConfig,
    pub winch: WinchConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".into() }
    }
}

impl Config {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            link: self.link.clone(),
            failsafe: self.failsafe.clone(),
            winch: self.winch.clone(),
            relay: self.relay.clone(),
        }
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}
