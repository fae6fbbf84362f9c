use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BeaconError, Result};

/// Top-level configuration for the Beacon agent.
///
/// Loaded from `~/.beacon/config.toml` by default. Each section corresponds
/// to one concern of the telemetry core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl BeaconConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BeaconConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BeaconError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Framework the host application is built with, reported as `platform`.
    pub application_framework: String,
    /// Version of that framework, reported as `platformVersion`.
    pub application_framework_version: String,
    /// Overrides the application build reported as `appBuild`.
    pub custom_build_identifier: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            application_framework: "Native".to_string(),
            application_framework_version: env!("CARGO_PKG_VERSION").to_string(),
            custom_build_identifier: None,
        }
    }
}

/// Event buffer limits and harvest cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum number of buffered events (clamped to 64..=1000).
    pub max_event_pool_size: usize,
    /// Maximum buffer age in seconds before a harvest is due (clamped to 60..=600).
    pub max_event_buffer_time_secs: u64,
    /// Seconds between harvest polls.
    pub harvest_interval_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_event_pool_size: 1000,
            max_event_buffer_time_secs: 600,
            harvest_interval_secs: 60,
        }
    }
}

/// Feature toggles consulted by the attribute registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Master switch for event collection and harvest.
    pub analytics_events: bool,
    /// Record request events for successful HTTP transactions.
    pub network_requests: bool,
    /// Record request-error events for failed HTTP transactions.
    pub network_error_requests: bool,
    /// Attach (base64) response bodies to HTTP error events.
    pub http_response_body_capture: bool,
    /// Stamp an `offline` attribute on events recorded while offline.
    pub offline_storage: bool,
    /// Stamp a `background` attribute on events recorded in the background.
    pub background_reporting: bool,
    /// Mirror buffered events into the event store until harvested.
    pub event_persistence: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            analytics_events: true,
            network_requests: true,
            network_error_requests: true,
            http_response_body_capture: true,
            offline_storage: false,
            background_reporting: false,
            event_persistence: false,
        }
    }
}

/// A URL obfuscation rule applied to network request events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlTransform {
    /// Regular expression matched against `requestUrl`.
    pub pattern: String,
    /// Replacement text. When absent, capture groups are masked with `*`.
    #[serde(default)]
    pub replacement: Option<String>,
}

/// Network instrumentation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hosts whose requests are never recorded (subdomains included).
    pub ignored_domains: Vec<String>,
    /// Rewrites applied to request URLs before events are buffered.
    pub url_transforms: Vec<UrlTransform>,
}

/// Local persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite database holding persistent attributes and events.
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "~/.beacon/beacon.db".to_string(),
        }
    }
}
