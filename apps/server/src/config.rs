//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Command-line flags are applied on top by `main`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mpdweb_core::protocol_constants::{DEFAULT_HTTP_PORT, DEFAULT_MPD_ADDR};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `MPDWEB_BIND_PORT`
    pub bind_port: u16,

    /// Address of the MPD server (`host:port`).
    /// Override: `MPDWEB_MPD_ADDR`
    pub mpd_addr: String,

    /// Where the current cover image is stored.
    /// A fresh file in the system temp directory when unset.
    /// Override: `MPDWEB_COVER_PATH`
    pub cover_path: Option<PathBuf>,

    /// Broker, watcher and HTTP tunables.
    pub core: mpdweb_core::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: DEFAULT_HTTP_PORT,
            mpd_addr: DEFAULT_MPD_ADDR.to_string(),
            cover_path: None,
            core: mpdweb_core::Config::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies overrides looked up by environment variable name.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("MPDWEB_BIND_PORT") {
            match val.parse() {
                Ok(port) => self.bind_port = port,
                Err(_) => log::warn!("Ignoring invalid MPDWEB_BIND_PORT: {}", val),
            }
        }

        if let Some(val) = lookup("MPDWEB_MPD_ADDR") {
            if !val.is_empty() {
                self.mpd_addr = val;
            }
        }

        if let Some(val) = lookup("MPDWEB_COVER_PATH") {
            if !val.is_empty() {
                self.cover_path = Some(PathBuf::from(val));
            }
        }
    }
}
