//! # Connectivity Configuration
//!
//! Configuration management for the connectivity runtime.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TETHER_PROBE_URL=https://example.com/ping                          │
//! │     TETHER_SYNC_INTERVAL_SECS=10                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tether/tether.toml (Linux)                               │
//! │     ~/Library/Application Support/dev.tether.tether/tether.toml        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [probe]
//! primary_url = "https://clients3.google.com/generate_204"
//! fallback_urls = ["https://www.cloudflare.com/cdn-cgi/trace"]
//! interval_secs = 30
//! cellular_timeout_ms = 3000
//! default_timeout_ms = 5000
//!
//! [store]
//! freshness_secs = 120
//! flap_window_ms = 1000
//! flap_debounce_ms = 500
//! debounce_ms = 100
//!
//! [queue]
//! sync_interval_secs = 30
//! max_retries = 5
//! executor_timeout_ms = 15000
//!
//! [guard]
//! cellular_ceiling_ms = 5000
//!
//! [storage]
//! database_path = "/var/lib/tether/tether.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Probe Settings
// =============================================================================

/// Reachability probe settings.
///
/// ## Deadlines
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  cellular   ──► 3000 ms   (waiting on a metered radio is expensive)    │
/// │  otherwise  ──► 5000 ms                                                │
/// │                                                                         │
/// │  primary fails ──► all fallbacks raced in parallel, first 2xx-4xx wins │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Endpoint probed first.
    #[serde(default = "default_primary_url")]
    pub primary_url: String,

    /// Endpoints raced when the primary fails.
    #[serde(default = "default_fallback_urls")]
    pub fallback_urls: Vec<String>,

    /// Periodic probe interval (seconds).
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    /// Per-request deadline on cellular links (milliseconds).
    #[serde(default = "default_cellular_probe_timeout")]
    pub cellular_timeout_ms: u64,

    /// Per-request deadline on every other link (milliseconds).
    #[serde(default = "default_probe_timeout")]
    pub default_timeout_ms: u64,
}

fn default_primary_url() -> String {
    "https://clients3.google.com/generate_204".to_string()
}

fn default_fallback_urls() -> Vec<String> {
    vec![
        "https://www.cloudflare.com/cdn-cgi/trace".to_string(),
        "https://www.apple.com/library/test/success.html".to_string(),
        "https://www.msftconnecttest.com/connecttest.txt".to_string(),
    ]
}

fn default_probe_interval() -> u64 {
    30
}

fn default_cellular_probe_timeout() -> u64 {
    3000
}

fn default_probe_timeout() -> u64 {
    5000
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            primary_url: default_primary_url(),
            fallback_urls: default_fallback_urls(),
            interval_secs: default_probe_interval(),
            cellular_timeout_ms: default_cellular_probe_timeout(),
            default_timeout_ms: default_probe_timeout(),
        }
    }
}

impl ProbeSettings {
    /// Parses the endpoint list.
    pub fn targets(&self) -> SyncResult<ProbeTargets> {
        let primary = parse_probe_url(&self.primary_url)?;
        let fallbacks = self
            .fallback_urls
            .iter()
            .map(|u| parse_probe_url(u))
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(ProbeTargets { primary, fallbacks })
    }

    /// Periodic probe interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Deadline for a single probe on the given transport.
    pub fn deadline(&self, cellular: bool) -> Duration {
        if cellular {
            Duration::from_millis(self.cellular_timeout_ms)
        } else {
            Duration::from_millis(self.default_timeout_ms)
        }
    }
}

/// Parsed probe endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTargets {
    pub primary: Url,
    pub fallbacks: Vec<Url>,
}

fn parse_probe_url(raw: &str) -> SyncResult<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SyncError::InvalidUrl(format!(
            "Probe URL must be http:// or https://, got {}:// in {}",
            other, raw
        ))),
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Network state store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Persisted state older than this is discarded at startup (seconds).
    #[serde(default = "default_freshness")]
    pub freshness_secs: u64,

    /// A link event within this window of the previous one is a flap (ms).
    #[serde(default = "default_flap_window")]
    pub flap_window_ms: u64,

    /// Debounce applied to flapping events (ms).
    #[serde(default = "default_flap_debounce")]
    pub flap_debounce_ms: u64,

    /// Debounce applied to isolated events (ms).
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

fn default_freshness() -> u64 {
    120
}

fn default_flap_window() -> u64 {
    1000
}

fn default_flap_debounce() -> u64 {
    500
}

fn default_debounce() -> u64 {
    100
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            freshness_secs: default_freshness(),
            flap_window_ms: default_flap_window(),
            flap_debounce_ms: default_flap_debounce(),
            debounce_ms: default_debounce(),
        }
    }
}

impl StoreSettings {
    pub fn freshness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_secs as i64)
    }

    pub fn flap_window(&self) -> Duration {
        Duration::from_millis(self.flap_window_ms)
    }

    pub fn flap_debounce(&self) -> Duration {
        Duration::from_millis(self.flap_debounce_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// =============================================================================
// Queue Settings
// =============================================================================

/// Write-behind queue and scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Periodic drain interval (seconds).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Failed attempts after which an entry is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Deadline for a single executor call (ms).
    #[serde(default = "default_executor_timeout")]
    pub executor_timeout_ms: u64,
}

fn default_sync_interval() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    tether_core::MAX_RETRY_ATTEMPTS
}

fn default_executor_timeout() -> u64 {
    15_000
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            sync_interval_secs: default_sync_interval(),
            max_retries: default_max_retries(),
            executor_timeout_ms: default_executor_timeout(),
        }
    }
}

impl QueueSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_timeout_ms)
    }
}

// =============================================================================
// Guard Settings
// =============================================================================

/// Timeout guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardSettings {
    /// Upper bound on any guarded call over cellular (ms).
    #[serde(default = "default_cellular_ceiling")]
    pub cellular_ceiling_ms: u64,
}

fn default_cellular_ceiling() -> u64 {
    5000
}

impl Default for GuardSettings {
    fn default() -> Self {
        GuardSettings {
            cellular_ceiling_ms: default_cellular_ceiling(),
        }
    }
}

impl GuardSettings {
    pub fn cellular_ceiling(&self) -> Duration {
        Duration::from_millis(self.cellular_ceiling_ms)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Where the persisted records live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageSettings {
    /// Returns the configured path or the platform default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(ConnectivityConfig::default_database_path)
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete connectivity configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub guard: GuardSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl ConnectivityConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tether.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading connectivity config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load connectivity config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Connectivity config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        self.probe.targets()?;

        if self.probe.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe.interval_secs must be greater than 0".into(),
            ));
        }

        if self.probe.cellular_timeout_ms == 0 || self.probe.default_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "probe timeouts must be greater than 0".into(),
            ));
        }

        if self.store.flap_debounce_ms < self.store.debounce_ms {
            return Err(SyncError::InvalidConfig(
                "store.flap_debounce_ms must be at least store.debounce_ms".into(),
            ));
        }

        if self.queue.sync_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "queue.sync_interval_secs must be greater than 0".into(),
            ));
        }

        if self.queue.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "queue.max_retries must be at least 1".into(),
            ));
        }

        if self.queue.executor_timeout_ms == 0 || self.guard.cellular_ceiling_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "executor and guard timeouts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TETHER_PROBE_URL") {
            debug!(url = %url, "Overriding primary probe URL from environment");
            self.probe.primary_url = url;
        }

        if let Ok(urls) = std::env::var("TETHER_PROBE_FALLBACK_URLS") {
            self.probe.fallback_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(secs) = std::env::var("TETHER_PROBE_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.probe.interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid TETHER_PROBE_INTERVAL_SECS"),
            }
        }

        if let Ok(secs) = std::env::var("TETHER_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.queue.sync_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid TETHER_SYNC_INTERVAL_SECS"),
            }
        }

        if let Ok(retries) = std::env::var("TETHER_MAX_RETRIES") {
            if let Ok(r) = retries.parse::<u32>() {
                self.queue.max_retries = r;
            }
        }

        if let Ok(path) = std::env::var("TETHER_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("dev", "tether", "tether")
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("tether.toml"))
    }

    /// Returns the default database path.
    pub fn default_database_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().join("tether.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectivityConfig::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.probe.deadline(true), Duration::from_millis(3000));
        assert_eq!(config.probe.deadline(false), Duration::from_millis(5000));
        assert_eq!(config.store.freshness(), chrono::Duration::minutes(2));
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.guard.cellular_ceiling(), Duration::from_millis(5000));
    }

    #[test]
    fn test_probe_targets() {
        let targets = ProbeSettings::default().targets().unwrap();
        assert_eq!(targets.primary.host_str(), Some("clients3.google.com"));
        assert_eq!(targets.fallbacks.len(), 3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ConnectivityConfig::default();

        config.probe.primary_url = "ws://example.com".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.probe.primary_url = "not a url".to_string();
        assert!(config.validate().unwrap_err().is_config_error());

        config = ConnectivityConfig::default();
        config.queue.max_retries = 0;
        assert!(config.validate().is_err());

        config = ConnectivityConfig::default();
        config.store.flap_debounce_ms = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ConnectivityConfig = toml::from_str(
            r#"
            [queue]
            max_retries = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.queue.sync_interval_secs, 30);
        assert_eq!(config.probe.interval_secs, 30);
    }

    #[test]
    fn test_toml_serialization() {
        let config = ConnectivityConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[probe]"));
        assert!(toml_str.contains("[queue]"));
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let path = std::env::temp_dir().join("tether-config-that-does-not-exist.toml");
        let config = ConnectivityConfig::load_or_default(Some(path));
        assert_eq!(config.store.debounce_ms, 100);
    }
}
