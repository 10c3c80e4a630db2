use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::session::viewport::Viewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleResultPolicy {
    /// Drop panel writes whose fallback selection changed mid-fetch.
    #[default]
    Discard,
    LastWriteWins,
}

impl StaleResultPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "discard" | "suppress" => Some(Self::Discard),
            "last_write_wins" | "last-write-wins" | "lww" => Some(Self::LastWriteWins),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarthlinkConfig {
    // Insight data service
    #[serde(default = "default_insight_api_url")]
    pub insight_api_url: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    // Place search / reverse geocoding
    #[serde(default = "default_geocoder_api_url")]
    pub geocoder_api_url: String,
    #[serde(default)]
    pub geocoder_access_token: Option<String>,
    #[serde(default = "default_poi_relevance_threshold")]
    pub geocoder_poi_relevance_threshold: f64,

    // Map session
    #[serde(default = "default_region_fallback_half_size")]
    pub region_fallback_half_size_deg: f64,
    #[serde(default)]
    pub stale_results: StaleResultPolicy,

    // Operations the agent may not call
    #[serde(default)]
    pub disallowed_tools: Vec<String>,

    // Kept last: serializes as a TOML table
    #[serde(default = "default_initial_view")]
    pub initial_view: Option<Viewport>,
}

fn default_insight_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_geocoder_api_url() -> String {
    "https://api.mapbox.com".to_string()
}

fn default_poi_relevance_threshold() -> f64 {
    0.8
}

fn default_initial_view() -> Option<Viewport> {
    Some(Viewport::new(-122.4194, 37.7749, 11.0))
}

fn default_region_fallback_half_size() -> f64 {
    0.003
}

impl Default for EarthlinkConfig {
    fn default() -> Self {
        Self {
            insight_api_url: default_insight_api_url(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            geocoder_api_url: default_geocoder_api_url(),
            geocoder_access_token: None,
            geocoder_poi_relevance_threshold: default_poi_relevance_threshold(),
            region_fallback_half_size_deg: default_region_fallback_half_size(),
            stale_results: StaleResultPolicy::default(),
            disallowed_tools: Vec::new(),
            initial_view: default_initial_view(),
        }
    }
}

impl EarthlinkConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("earthlink_config.toml")
    }

    /// Load `earthlink_config.toml` next to the executable, falling back to
    /// defaults + env vars. Env vars override file values either way.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                if path.exists() {
                    tracing::error!("Failed to load {:?}: {:#}", path, e);
                } else {
                    tracing::warn!("No config file found, using defaults + env vars");
                }
                Self::from_env()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let mut config = toml::from_str::<EarthlinkConfig>(&contents)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var("EARTHLINK_INSIGHT_API_URL") {
            if !url.trim().is_empty() {
                self.insight_api_url = url;
            }
        }

        if let Ok(url) = env::var("EARTHLINK_GEOCODER_API_URL") {
            if !url.trim().is_empty() {
                self.geocoder_api_url = url;
            }
        }

        if let Ok(token) = env::var("EARTHLINK_GEOCODER_TOKEN") {
            if !token.trim().is_empty() {
                self.geocoder_access_token = Some(token.trim().to_string());
            }
        }

        if let Ok(threshold) = env::var("EARTHLINK_GEOCODER_POI_RELEVANCE") {
            if let Ok(value) = threshold.parse() {
                self.geocoder_poi_relevance_threshold = value;
            }
        }

        if let Ok(timeout) = env::var("EARTHLINK_FETCH_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse() {
                self.fetch_timeout_secs = seconds;
            }
        }

        if let Ok(policy) = env::var("EARTHLINK_STALE_RESULTS") {
            match StaleResultPolicy::parse(&policy) {
                Some(policy) => self.stale_results = policy,
                None => tracing::warn!("Ignoring unknown EARTHLINK_STALE_RESULTS '{}'", policy),
            }
        }
    }
}
