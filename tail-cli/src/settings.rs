//! Console settings

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tail_control::ManagerConfig;
use tail_sim::SimulatedDeviceConfig;

/// Default log filter covering every crate of the workspace
pub const DEFAULT_LOG_FILTER: &str =
    "tailctl=info,tail_protocol=info,tail_control=info,tail_sim=info";

/// Console settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Log filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Enter fake-tail mode on startup
    #[serde(default)]
    pub fake_tail_mode: bool,
    /// Start discovery on startup
    #[serde(default = "default_true")]
    pub auto_discovery: bool,
    /// Catalog files to load, in order
    #[serde(default)]
    pub catalog_files: Vec<PathBuf>,
    /// Simulated devices in range
    #[serde(default)]
    pub devices: Vec<SimulatedDeviceConfig>,
    /// Display name overrides by hardware address
    #[serde(default)]
    pub device_names: HashMap<String, String>,
    /// Connection manager configuration
    #[serde(default)]
    pub manager: ManagerConfig,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        let mut left = SimulatedDeviceConfig::new("TAIL-01", "MiTail");
        left.auto_ack = true;
        Self {
            log_filter: default_log_filter(),
            fake_tail_mode: false,
            auto_discovery: true,
            catalog_files: Vec::new(),
            devices: vec![left, SimulatedDeviceConfig::new("EARS-01", "EarGear")],
            device_names: HashMap::new(),
            manager: ManagerConfig::default(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for tailctl
    ///
    /// Uses `$XDG_CONFIG_HOME/tailctl`, falling back to `~/.config/tailctl`.
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("tailctl"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("tailctl"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|s| Self::from_json(&s).ok())
            .unwrap_or_default()
    }

    /// Parse settings from JSON text
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("Failed to parse settings")
    }

    /// Save settings to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::settings_path().context("Could not determine settings path")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }
}
