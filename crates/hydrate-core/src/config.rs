//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which names the origin being cached, the current cache version, and the
//! asset manifest.
//!
//! Configuration is stored at `~/.config/hydrate-dial/config.json`. The
//! origin can be overridden with `HYDRATE_DIAL_ORIGIN`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::manifest::{AssetManifest, DEFAULT_ASSETS};
use crate::network::http::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "hydrate-dial";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides the configured origin
pub const ORIGIN_ENV: &str = "HYDRATE_DIAL_ORIGIN";

/// Name of the current cache generation
pub const DEFAULT_CACHE_VERSION: &str = "hydrate-dial-cache-v1";

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Build output directory, relative to the working directory
const DEFAULT_BUILD_DIR: &str = "build";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub origin: String,
    pub cache_version: String,
    pub manifest: Vec<String>,
    /// Where wildcard manifest entries are resolved. `None` means the
    /// manifest must already be literal.
    pub build_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            manifest: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
            build_dir: Some(PathBuf::from(DEFAULT_BUILD_DIR)),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(origin) = std::env::var(ORIGIN_ENV) {
            if !origin.trim().is_empty() {
                self.origin = origin.trim().to_string();
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding cache generations, scoped per origin.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(self.origin_slug()?))
    }

    /// Directory holding the tally key-value store, scoped per origin.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join(self.origin_slug()?))
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).with_context(|| format!("Invalid origin: {}", self.origin))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The manifest with wildcard entries resolved against `build_dir`.
    pub fn asset_manifest(&self) -> Result<AssetManifest> {
        let manifest = match self.build_dir {
            Some(ref dir) => AssetManifest::resolve_patterns(self.manifest.as_slice(), dir)
                .with_context(|| format!("Failed to resolve manifest against {}", dir.display()))?,
            None => AssetManifest::new(self.manifest.iter().cloned())?,
        };
        Ok(manifest)
    }

    /// Filesystem-safe name for the origin, e.g. `http_localhost_3000`.
    fn origin_slug(&self) -> Result<String> {
        let url = self.origin_url()?;
        let host = url.host_str().unwrap_or("local");
        Ok(match url.port_or_known_default() {
            Some(port) => format!("{}_{}_{}", url.scheme(), host, port),
            None => format!("{}_{}", url.scheme(), host),
        })
    }
}
