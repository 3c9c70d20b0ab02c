//! Plugin configuration stored as JSON next to the cache
//!
//! Loaded once at startup and passed down explicitly. Out-of-range values are
//! corrected rather than rejected, and a broken file never stops the CLI.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const APP_DIR: &str = "BIMHubPlugin";
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "https://localhost:7001";
const DEFAULT_CACHE_SIZE_MB: i64 = 500;
const MAX_CACHE_SIZE_MB: i64 = 10240;
const DEFAULT_TIMEOUT_SECS: i64 = 300;
const DEFAULT_PAGE_SIZE: i64 = 12;
const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub api_token: String,
    pub cache_size_mb: i64,
    pub request_timeout_seconds: i64,
    pub default_page_size: i64,
    /// Empty means the default location under the local data directory
    pub cache_folder: String,
    pub cache_ttl_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: String::new(),
            cache_size_mb: DEFAULT_CACHE_SIZE_MB,
            request_timeout_seconds: DEFAULT_TIMEOUT_SECS,
            default_page_size: DEFAULT_PAGE_SIZE,
            cache_folder: String::new(),
            cache_ttl_days: DEFAULT_TTL_DAYS,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        app_dir().join(CONFIG_FILE)
    }

    /// Read the config file, creating it with defaults if it does not exist.
    /// Environment overrides are applied on top.
    pub fn load(path: &Path) -> Self {
        let mut config = Self::read_file(path);
        config.apply_overrides(|key| env::var(key).ok());
        config.validate();
        config
    }

    fn read_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<AppConfig>(&json) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = ?path, error = %e, "Config file is invalid, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                match config.save(path) {
                    Ok(()) => info!(path = ?path, "Created default config file"),
                    Err(e) => warn!(path = ?path, error = %e, "Failed to write default config file"),
                }
                config
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read config file, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("BIMHUB_API_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = var("BIMHUB_API_TOKEN") {
            self.api_token = token;
        }
        if let Some(dir) = var("BIMHUB_CACHE_DIR") {
            self.cache_folder = dir;
        }
        if let Some(size) = var("BIMHUB_CACHE_SIZE_MB").and_then(|s| s.trim().parse().ok()) {
            self.cache_size_mb = size;
        }
    }

    /// Replace missing or out-of-range values
    pub fn validate(&mut self) {
        if self.api_base_url.trim().is_empty() {
            self.api_base_url = DEFAULT_API_BASE_URL.to_string();
        }
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();

        if self.cache_size_mb <= 0 {
            self.cache_size_mb = DEFAULT_CACHE_SIZE_MB;
        }
        self.cache_size_mb = self.cache_size_mb.min(MAX_CACHE_SIZE_MB);

        if self.request_timeout_seconds <= 0 {
            self.request_timeout_seconds = DEFAULT_TIMEOUT_SECS;
        }

        if self.default_page_size <= 0 {
            self.default_page_size = DEFAULT_PAGE_SIZE;
        }
        self.default_page_size = self.default_page_size.min(MAX_PAGE_SIZE);

        if self.cache_ttl_days <= 0 {
            self.cache_ttl_days = DEFAULT_TTL_DAYS;
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        if self.cache_folder.trim().is_empty() {
            app_dir().join("Cache")
        } else {
            PathBuf::from(&self.cache_folder)
        }
    }

    pub fn cache_capacity_bytes(&self) -> u64 {
        self.cache_size_mb.max(0) as u64 * 1024 * 1024
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_days.max(0) as u64 * 24 * 60 * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(0) as u64)
    }

    pub fn page_size(&self) -> u32 {
        self.default_page_size.clamp(1, MAX_PAGE_SIZE) as u32
    }

    pub fn api_token(&self) -> Option<&str> {
        Some(self.api_token.trim()).filter(|t| !t.is_empty())
    }
}

fn app_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
