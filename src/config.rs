//! Configuration loading.
//!
//! Reads `config.json` from the enginelink configuration directory, falls
//! back to built-in defaults when the file is missing or unreadable, then
//! applies `ENGINELINK_*` environment overrides. Command-line arguments
//! (see [`crate::settings`]) take precedence over everything here.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants;

/// Tunables for the engine connection and service loops.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Engine host used when `--host` is absent.
    pub host: String,
    /// Engine port used when `--port` is absent.
    pub port: u16,
    /// Milliseconds between service loop ticks.
    pub tick_interval_ms: u64,
    /// Milliseconds to back off after a failed tick.
    pub recovery_interval_ms: u64,
    /// Milliseconds `stop()` waits for a worker to exit.
    pub stop_grace_ms: u64,
    /// Milliseconds allowed for one TCP connect attempt.
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_HOST.to_string(),
            port: constants::DEFAULT_PORT,
            tick_interval_ms: constants::TICK_INTERVAL.as_millis() as u64,
            recovery_interval_ms: constants::RECOVERY_INTERVAL.as_millis() as u64,
            stop_grace_ms: constants::STOP_GRACE_PERIOD.as_millis() as u64,
            connect_timeout_ms: constants::CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// Directory selection priority:
    /// 1. `ENGINELINK_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir joined with `enginelink`
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("ENGINELINK_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("enginelink"))
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Self {
        let mut config = match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default config: {e:#}");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("read {}", config_path.display()))?;
        Self::from_json(&content)
    }

    /// Parse a config document. Missing keys keep their defaults.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("parse enginelink config")
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `ENGINELINK_*` overrides read through `lookup`.
    ///
    /// Unparseable numeric values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("ENGINELINK_HOST") {
            self.host = host;
        }
        override_number(&lookup, "ENGINELINK_PORT", &mut self.port);
        override_number(&lookup, "ENGINELINK_TICK_MS", &mut self.tick_interval_ms);
        override_number(&lookup, "ENGINELINK_RECOVERY_MS", &mut self.recovery_interval_ms);
        override_number(&lookup, "ENGINELINK_STOP_GRACE_MS", &mut self.stop_grace_ms);
        override_number(&lookup, "ENGINELINK_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms);
    }

    /// Interval between service loop ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Back-off after a failed tick.
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    /// Bounded wait for a worker to stop.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Bound for one TCP connect attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => log::warn!("Ignoring {key}={raw}: not a valid number"),
        }
    }
}
