use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_DISPLAYED_ITEMS: usize = 100;
pub const DEFAULT_PASSWORD_MANAGER_MARKER: &str = "com.agilebits.onepassword";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub max_displayed_items: usize,
    pub search_debounce_ms: u64,
    pub count_debounce_ms: u64,
    pub display_name_length: usize,
    /// Substrings of type identifiers that mark password-manager content.
    pub excluded_type_markers: Vec<String>,
    pub max_item_bytes: usize,
    pub compress_threshold: usize,
    pub store_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("copyhistory");

        Self {
            data_dir,
            poll_interval_ms: 2000,
            max_displayed_items: DEFAULT_MAX_DISPLAYED_ITEMS,
            search_debounce_ms: 300,
            count_debounce_ms: 500,
            display_name_length: 100,
            excluded_type_markers: vec![DEFAULT_PASSWORD_MANAGER_MARKER.to_string()],
            max_item_bytes: 100 * 1024 * 1024,
            compress_threshold: 64 * 1024,
            store_timeout_ms: 1000,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = dirs::config_dir()
            .unwrap_or_default()
            .join("copyhistory")
            .join("config.toml");

        Self::load_from(&config_path)
    }

    /// Reads `path`, writing the defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
        } else {
            let config = Self::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(&config)?)?;
            Ok(config)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn count_debounce(&self) -> Duration {
        Duration::from_millis(self.count_debounce_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// A displayed count of zero means the user cleared the field.
    pub fn displayed_items(&self) -> usize {
        effective_limit(self.max_displayed_items)
    }
}

pub fn effective_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_MAX_DISPLAYED_ITEMS
    } else {
        limit
    }
}
