//! Wpok Config - merged settings
//!
//! Resolution order (later wins):
//! 1. global file (`<config_dir>/wpok/config.json`)
//! 2. project file (`./.wpok/config.json`)
//! 3. environment (`WPOK_STORE`, `WPOK_POLL_INTERVAL_MS`)
//! 4. command-line flags (applied by the caller)

use crate::storage::{ConfigScope, JsonStore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Config file name
pub const WPOK_CONFIG_FILE: &str = "config.json";

/// Env var overriding the SQLite store path
pub const ENV_STORE: &str = "WPOK_STORE";

/// Env var overriding the store polling interval
pub const ENV_POLL_INTERVAL_MS: &str = "WPOK_POLL_INTERVAL_MS";

const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_STORE_FILE: &str = "wpok.db";

/// wpok settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WpokConfig {
    /// Version (for migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    /// SQLite task store location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// How often store-backed subscriptions poll for completions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    /// Buffer size of subscription channels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_capacity: Option<usize>,
}

fn default_version() -> u32 {
    1
}

impl WpokConfig {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            ..Default::default()
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Load global + project files, then apply environment overrides
    pub fn load() -> Result<Self> {
        let layers: Vec<JsonStore> = ConfigScope::LAYERED
            .iter()
            .filter_map(|scope| JsonStore::open(*scope).ok())
            .collect();

        let mut config = Self::load_layers(&layers)?;
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Merge the config file of each layer, lowest precedence first
    pub fn load_layers(layers: &[JsonStore]) -> Result<Self> {
        let mut config = Self::new();
        for layer in layers {
            if let Some(found) = layer.read::<WpokConfig>(WPOK_CONFIG_FILE)? {
                debug!("Loaded {} config from {}", layer.scope(), layer.dir().display());
                config.merge(found);
            }
        }
        Ok(config)
    }

    /// Overlay every field that `other` sets
    pub fn merge(&mut self, other: WpokConfig) {
        self.version = self.version.max(other.version);
        if other.store_path.is_some() {
            self.store_path = other.store_path;
        }
        if other.poll_interval_ms.is_some() {
            self.poll_interval_ms = other.poll_interval_ms;
        }
        if other.channel_capacity.is_some() {
            self.channel_capacity = other.channel_capacity;
        }
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(store) = lookup(ENV_STORE).filter(|v| !v.trim().is_empty()) {
            self.store_path = Some(PathBuf::from(store));
        }

        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            let ms = raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("{} must be an integer, got '{}'", ENV_POLL_INTERVAL_MS, raw))
            })?;
            self.poll_interval_ms = Some(ms);
        }

        Ok(())
    }

    /// Set the store path (command-line override)
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    // ========================================================================
    // Resolved values
    // ========================================================================

    /// Store path, defaulting to `<data_dir>/wpok/wpok.db`
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store_path {
            return Ok(path.clone());
        }
        let dir = dirs::data_dir()
            .ok_or_else(|| Error::Config("Cannot find data directory".to_string()))?;
        Ok(dir.join("wpok").join(DEFAULT_STORE_FILE))
    }

    /// Polling interval (never zero)
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.poll_interval_ms
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
                .max(1),
        )
    }

    /// Subscription channel capacity (never zero)
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY)
            .max(1)
    }
}
