//! Service configuration settings

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::crypto::SignatureAlgorithm;

const A_MINUTE: u64 = 60;
const A_DAY: u64 = A_MINUTE * 60 * 24;
const TEN_DAYS: u64 = A_DAY * 10;
const A_MONTH: u64 = A_DAY * 31;

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub subscriber: SubscriberSettings,
    pub http: HttpSettings,
    pub database: DatabaseSettings,
    pub metrics: MetricsSettings,
}

/// Server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Hub policy
#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    /// Public URL of the hub endpoint; notifications must advertise it as `rel="hub"`
    pub public_url: String,
    #[serde(default = "default_min_lease")]
    pub min_lease_seconds: u64,
    #[serde(default = "default_lease")]
    pub default_lease_seconds: u64,
    #[serde(default = "default_max_lease")]
    pub max_lease_seconds: u64,
    /// Confirmation attempts before a request is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; doubles on every attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Accept `hub.mode=publish` requests
    #[serde(default)]
    pub publish_supported: bool,
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,
    #[serde(default = "default_daily")]
    pub cleanup_interval_sec: u64,
}

fn default_min_lease() -> u64 {
    A_MINUTE
}

fn default_lease() -> u64 {
    TEN_DAYS
}

fn default_max_lease() -> u64 {
    A_MONTH
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_daily() -> u64 {
    A_DAY
}

/// Subscriber behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberSettings {
    /// Externally reachable base URL of the callback endpoint
    pub callback_base_url: String,
    /// Largest accepted notification body, in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Generate a secret for `https` hubs when none is supplied
    #[serde(default = "default_true")]
    pub auto_set_secret: bool,
    /// How long an unconfirmed request is kept
    #[serde(default = "default_request_ttl")]
    pub request_ttl_sec: u64,
    /// Renew subscriptions expiring within this margin
    #[serde(default = "default_daily")]
    pub renew_margin_sec: u64,
    #[serde(default = "default_daily")]
    pub sweep_interval_sec: u64,
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_request_ttl() -> u64 {
    10 * A_MINUTE
}

fn default_true() -> bool {
    true
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_sec: u64,
}

fn default_request_timeout() -> u64 {
    3
}

impl HttpSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    /// HTTP client used for every outbound WebSub request
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .user_agent(concat!("websub-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client")
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

/// Database settings
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// RocksDB data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_true")]
    pub compression: bool,
    #[serde(default = "default_cache_size")]
    pub cache_size_mb: usize,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Rocksdb
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_cache_size() -> usize {
    64
}

/// Metrics settings
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Flat option names recognized in the environment, and the keys they set
const FLAT_OVERRIDES: [(&str, &str); 8] = [
    ("HUB_MIN_LEASE_SECONDS", "hub.min_lease_seconds"),
    ("HUB_DEFAULT_LEASE_SECONDS", "hub.default_lease_seconds"),
    ("HUB_MAX_LEASE_SECONDS", "hub.max_lease_seconds"),
    ("MAX_ATTEMPTS", "hub.max_attempts"),
    ("PUBLISH_SUPPORTED", "hub.publish_supported"),
    ("MAX_BODY_SIZE", "subscriber.max_body_size"),
    ("AUTO_SET_SECRET", "subscriber.auto_set_secret"),
    ("REQUEST_TIMEOUT", "http.request_timeout_sec"),
];

impl Settings {
    /// Load settings from file and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load settings from a specific config file path (without extension)
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref();

        let mut builder = Self::defaults()?
            // Add config file if it exists
            .add_source(File::with_name(config_path.to_str().unwrap_or("config")).required(false))
            // Add environment variables with prefix WEBSUB__
            .add_source(Environment::with_prefix("WEBSUB").prefix_separator("__").separator("__"));

        for (name, key) in FLAT_OVERRIDES {
            builder = builder.set_override_option(key, std::env::var(name).ok())?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.http_port", default_http_port() as i64)?
            .set_default("server.workers", default_workers() as i64)?
            .set_default("hub.public_url", "http://localhost:8080/hub")?
            .set_default("hub.min_lease_seconds", default_min_lease())?
            .set_default("hub.default_lease_seconds", default_lease())?
            .set_default("hub.max_lease_seconds", default_max_lease())?
            .set_default("hub.max_attempts", default_max_attempts() as i64)?
            .set_default("hub.retry_backoff_ms", default_retry_backoff_ms())?
            .set_default("hub.publish_supported", false)?
            .set_default("hub.signature_algorithm", "sha1")?
            .set_default("hub.cleanup_interval_sec", default_daily())?
            .set_default("subscriber.callback_base_url", "http://localhost:8080/callbacks")?
            .set_default("subscriber.max_body_size", default_max_body_size() as i64)?
            .set_default("subscriber.auto_set_secret", true)?
            .set_default("subscriber.request_ttl_sec", default_request_ttl())?
            .set_default("subscriber.renew_margin_sec", default_daily())?
            .set_default("subscriber.sweep_interval_sec", default_daily())?
            .set_default("http.request_timeout_sec", default_request_timeout())?
            .set_default("database.backend", "rocksdb")?
            .set_default("database.data_dir", default_data_dir())?
            .set_default("database.compression", true)?
            .set_default("database.cache_size_mb", default_cache_size() as i64)?
            .set_default("metrics.enabled", true)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hub = &self.hub;
        if hub.min_lease_seconds == 0 {
            return Err(ConfigError::Message(
                "hub.min_lease_seconds must be positive".to_string(),
            ));
        }
        if !(hub.min_lease_seconds <= hub.default_lease_seconds
            && hub.default_lease_seconds <= hub.max_lease_seconds)
        {
            return Err(ConfigError::Message(format!(
                "lease bounds must satisfy min <= default <= max (got {} / {} / {})",
                hub.min_lease_seconds, hub.default_lease_seconds, hub.max_lease_seconds
            )));
        }
        if hub.max_attempts == 0 {
            return Err(ConfigError::Message("hub.max_attempts must be positive".to_string()));
        }
        for (key, interval) in [
            ("hub.cleanup_interval_sec", hub.cleanup_interval_sec),
            ("subscriber.sweep_interval_sec", self.subscriber.sweep_interval_sec),
        ] {
            if interval == 0 {
                return Err(ConfigError::Message(format!("{} must be positive", key)));
            }
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::load().unwrap_or_else(|_| {
            // Provide minimal defaults if config loading fails
            Settings {
                server: ServerSettings {
                    host: default_host(),
                    http_port: default_http_port(),
                    workers: default_workers(),
                },
                hub: HubSettings {
                    public_url: "http://localhost:8080/hub".to_string(),
                    min_lease_seconds: default_min_lease(),
                    default_lease_seconds: default_lease(),
                    max_lease_seconds: default_max_lease(),
                    max_attempts: default_max_attempts(),
                    retry_backoff_ms: default_retry_backoff_ms(),
                    publish_supported: false,
                    signature_algorithm: SignatureAlgorithm::default(),
                    cleanup_interval_sec: default_daily(),
                },
                subscriber: SubscriberSettings {
                    callback_base_url: "http://localhost:8080/callbacks".to_string(),
                    max_body_size: default_max_body_size(),
                    auto_set_secret: true,
                    request_ttl_sec: default_request_ttl(),
                    renew_margin_sec: default_daily(),
                    sweep_interval_sec: default_daily(),
                },
                http: HttpSettings {
                    request_timeout_sec: default_request_timeout(),
                },
                database: DatabaseSettings {
                    backend: default_backend(),
                    data_dir: default_data_dir(),
                    compression: true,
                    cache_size_mb: default_cache_size(),
                },
                metrics: MetricsSettings { enabled: true },
            }
        })
    }
}
