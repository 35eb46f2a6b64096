//! Configuration types shared across crates.

use crate::lease::LeaseExtension;
use crate::reuse::ReusePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Instance lifecycle configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Lease margin below which a cached instance is not offered for reuse.
    #[serde(default = "default_min_survival_time_secs")]
    pub min_survival_time_secs: u64,
    /// Minimum lease gain worth an extension call.
    #[serde(default = "default_extension_debounce_secs")]
    pub extension_debounce_secs: u64,
    /// Age after which a pending record is treated as abandoned.
    #[serde(default = "default_provisioning_timeout_secs")]
    pub provisioning_timeout_secs: u64,
    /// Directory holding the boot artifact inside a project repository.
    #[serde(default = "default_inference_dir")]
    pub inference_dir: String,
    /// Boot file name inside `inference_dir`.
    #[serde(default = "default_boot_file")]
    pub boot_file: String,
    /// Upper bound for long-polling an instance.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Delay between two polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_min_survival_time_secs() -> u64 {
    120
}

fn default_extension_debounce_secs() -> u64 {
    10
}

fn default_provisioning_timeout_secs() -> u64 {
    600
}

fn default_inference_dir() -> String {
    "inference".to_string()
}

fn default_boot_file() -> String {
    "app.py".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_survival_time_secs: default_min_survival_time_secs(),
            extension_debounce_secs: default_extension_debounce_secs(),
            provisioning_timeout_secs: default_provisioning_timeout_secs(),
            inference_dir: default_inference_dir(),
            boot_file: default_boot_file(),
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LifecycleConfig {
    /// Reuse policy derived from this configuration.
    pub fn reuse_policy(&self) -> ReusePolicy {
        ReusePolicy::new(
            saturating_secs(self.min_survival_time_secs),
            saturating_secs(self.provisioning_timeout_secs),
        )
    }

    /// Extension guards derived from this configuration.
    pub fn lease_extension(&self) -> LeaseExtension {
        LeaseExtension::new(saturating_secs(self.extension_debounce_secs))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn saturating_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// In-process messaging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Deliveries per event before it is dropped (default: 3).
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    /// Base delay between redeliveries; attempt `n` waits `n` times this.
    #[serde(default = "default_redelivery_backoff_ms")]
    pub redelivery_backoff_ms: u64,
    /// Maximum number of events handled concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_max_delivery_attempts() -> u32 {
    3
}

fn default_redelivery_backoff_ms() -> u64 {
    500
}

fn default_max_in_flight() -> usize {
    16
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: default_max_delivery_attempts(),
            redelivery_backoff_ms: default_redelivery_backoff_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl MessagingConfig {
    pub fn redelivery_backoff(&self) -> Duration {
        Duration::from_millis(self.redelivery_backoff_ms)
    }
}

/// Project, user and repository platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the platform API.
    pub base_url: String,
    /// Bearer token for the platform API.
    /// WARNING: Prefer EMBER_PLATFORM__TOKEN over storing it in config.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Compute provisioning backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the compute backend API.
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// Platform configuration (required).
    pub platform: PlatformConfig,
    /// Compute backend configuration (required).
    pub backend: BackendConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Collaborator URLs point at nothing.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            metadata: MetadataConfig::default(),
            lifecycle: LifecycleConfig::default(),
            messaging: MessagingConfig::default(),
            platform: PlatformConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                token: None,
                request_timeout_secs: default_request_timeout_secs(),
            },
            backend: BackendConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                request_timeout_secs: default_request_timeout_secs(),
            },
        }
    }

    /// Reject settings that would make the service misbehave.
    pub fn validate(&self) -> Result<(), String> {
        if self.lifecycle.min_survival_time_secs == 0 {
            return Err("lifecycle.min_survival_time_secs cannot be 0. \
                 Instances could be handed out at the instant their lease ends."
                .to_string());
        }
        if self.lifecycle.provisioning_timeout_secs == 0 {
            return Err("lifecycle.provisioning_timeout_secs cannot be 0. \
                 Every pending instance would count as abandoned and be provisioned again."
                .to_string());
        }
        if self.lifecycle.poll_interval_ms == 0 {
            return Err("lifecycle.poll_interval_ms cannot be 0".to_string());
        }
        if self.messaging.max_delivery_attempts == 0 {
            return Err("messaging.max_delivery_attempts cannot be 0. \
                 Events would be dropped without being handled."
                .to_string());
        }
        if self.messaging.max_in_flight == 0 {
            return Err("messaging.max_in_flight cannot be 0".to_string());
        }
        if self.platform.base_url.is_empty() {
            return Err("platform.base_url is required".to_string());
        }
        if self.backend.base_url.is_empty() {
            return Err("backend.base_url is required".to_string());
        }
        Ok(())
    }
}
