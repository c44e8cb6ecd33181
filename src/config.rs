use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::error::{errors, ClientResult};

// Default configuration values
const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_STORAGE_FILE: &str = "dailog.session.json";
const DEFAULT_HEALTH_INTERVAL_MS: u64 = 5000;
const DEFAULT_ALERT_TTL_MS: u64 = 1500;
const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub renewal: RenewalConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

/// Backend location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Origin every endpoint path is resolved against
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Capacity of the client event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Number of recent events kept for late subscribers
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Where the credential store persists its keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file backing the store. `None` keeps state in memory only.
    #[serde(default = "default_storage_path")]
    pub path: Option<PathBuf>,
}

/// Token renewal behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// Share one in-flight renewal between concurrent 401s
    #[serde(default = "default_single_flight")]
    pub single_flight: bool,
}

/// Liveness monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Probe interval in milliseconds
    #[serde(default = "default_health_interval")]
    pub interval_ms: u64,
    /// Force a logout on every failed probe rather than only the first one of
    /// a down streak
    #[serde(default = "default_logout_on_every_failure")]
    pub logout_on_every_failure: bool,
}

/// Alert queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// How long an alert stays visible, in milliseconds
    #[serde(default = "default_alert_ttl")]
    pub ttl_ms: u64,
}

// Default functions
fn default_base_url() -> String {
    std::env::var("DAILOG_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_storage_path() -> Option<PathBuf> {
    match std::env::var("DAILOG_STORAGE_PATH") {
        Ok(path) if path.is_empty() => None,
        Ok(path) => Some(PathBuf::from(path)),
        Err(_) => Some(PathBuf::from(DEFAULT_STORAGE_FILE)),
    }
}

fn default_single_flight() -> bool {
    std::env::var("DAILOG_SINGLE_FLIGHT_RENEWAL")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(true)
}

fn default_health_interval() -> u64 {
    std::env::var("DAILOG_HEALTH_INTERVAL_MS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_HEALTH_INTERVAL_MS)
}

fn default_logout_on_every_failure() -> bool {
    std::env::var("DAILOG_HEALTH_LOGOUT_ON_EVERY_FAILURE")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(true)
}

fn default_alert_ttl() -> u64 {
    std::env::var("DAILOG_ALERT_TTL_MS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_ALERT_TTL_MS)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            event_capacity: default_event_capacity(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl ApiConfig {
    /// Resolve an endpoint path against the base url
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            single_flight: default_single_flight(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval(),
            logout_on_every_failure: default_logout_on_every_failure(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_alert_ttl(),
        }
    }
}

impl AlertConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Config {
    /// Configuration that talks to `base_url` and keeps everything in memory
    pub fn in_memory(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiConfig {
                base_url: base_url.into(),
                ..ApiConfig::default()
            },
            storage: StorageConfig { path: None },
            ..Config::default()
        }
    }

    /// Check values that would otherwise fail later at runtime
    pub fn validate(&self) -> ClientResult<()> {
        let url = Url::parse(&self.api.base_url)
            .map_err(|e| errors::config_invalid("api.base_url", e))?;
        if url.cannot_be_a_base() {
            return Err(errors::config_invalid(
                "api.base_url",
                "must be an absolute http(s) origin",
            ));
        }
        if self.health.interval_ms == 0 {
            return Err(errors::config_invalid(
                "health.interval_ms",
                "must be greater than zero",
            ));
        }
        if self.alerts.ttl_ms == 0 {
            return Err(errors::config_invalid(
                "alerts.ttl_ms",
                "must be greater than zero",
            ));
        }
        if self.api.event_capacity == 0 {
            return Err(errors::config_invalid(
                "api.event_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Get the path to the configuration file
pub fn get_config_path() -> PathBuf {
    std::env::var("DAILOG_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("dailog.config.json"))
}

/// Load configuration from file or create default
pub async fn load_config(path: &Path) -> Result<Config> {
    if !fs::try_exists(path).await? {
        let default_config = Config::default();
        save_config(path, &default_config).await?;
        info!("Created default configuration at {}", path.display());
        return Ok(default_config);
    }

    let config_str = fs::read_to_string(path).await?;
    let config: Config = serde_json::from_str(&config_str)?;
    config.validate()?;
    debug!("Loaded configuration from {}", path.display());

    Ok(config)
}

/// Save configuration to file
pub async fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(path, config_str).await?;
    debug!("Saved configuration to {}", path.display());

    Ok(())
}
