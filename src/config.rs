//! Configuration types.
//!
//! Loaded once per session from `<root>/config.yaml`, with a handful of
//! environment overrides applied on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the configuration file looked up under the session root.
pub const CONFIG_FILE: &str = "config.yaml";

/// Harness configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Project name used in notifications.
    pub project_name: String,
    /// Path to the adb binary.
    pub adb_path: String,
    /// Named devices: name -> serial or `host:port`. Order is preserved so the
    /// first entry is the primary device.
    pub adb_devices: Vec<DeviceEntry>,
    pub connection: ConnectionConfig,
    pub workers: WorkerConfig,
    pub logging: LoggingConfig,
    pub notify: NotifyConfig,
    /// Free-form keys, exposed to actions and workers as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A configured device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub serial: String,
}

/// Retry and timing settings for device commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Retries allowed for connectivity failures.
    pub retry_budget: u32,
    /// Pause between retry attempts.
    pub retry_pause_ms: u64,
    /// Time a network device is given to settle after reconnecting.
    pub settle_ms: u64,
    /// Hard timeout for a single non-streaming command.
    pub command_timeout_secs: u64,
}

/// Worker supervision settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bounded wait for a worker's loop to exit after stop.
    pub join_timeout_ms: u64,
    /// Cap on the crash-retry backoff.
    pub max_backoff_secs: u64,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Session log files kept in `outputs/logs`.
    pub max_log_files: usize,
}

/// Notification settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Feishu bot webhook. Notifications are skipped when unset.
    #[serde(deserialize_with = "deserialize_secret")]
    pub feishu_webhook: Option<SecretString>,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(|value| value.map(SecretString::from))
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            project_name: "adb-harness".to_string(),
            adb_path: "adb".to_string(),
            adb_devices: Vec::new(),
            connection: ConnectionConfig::default(),
            workers: WorkerConfig::default(),
            logging: LoggingConfig::default(),
            notify: NotifyConfig::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            retry_pause_ms: 1000,
            settle_ms: 2000,
            command_timeout_secs: 30,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 2000,
            max_backoff_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            max_log_files: 5,
        }
    }
}

impl ConnectionConfig {
    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl WorkerConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

impl HarnessConfig {
    /// Load `<root>/config.yaml`, falling back to defaults when it is absent,
    /// then apply environment overrides.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let config = Self::from_yaml(&raw).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            tracing::info!(path = %path.display(), "Loaded configuration");
            config
        } else {
            tracing::warn!(path = %path.display(), "No config.yaml found, using defaults");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text.
    ///
    /// `adb_devices` is written as a mapping in YAML; insertion order is kept.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        if value.is_null() {
            return Ok(Self::default());
        }
        if let Some(map) = value.as_mapping_mut()
            && let Some(devices) = map.get_mut("adb_devices")
            && let Some(devices_map) = devices.as_mapping()
        {
            let list: Vec<serde_yaml::Value> = devices_map
                .iter()
                .map(|(name, serial)| {
                    let mut entry = serde_yaml::Mapping::new();
                    entry.insert("name".into(), name.clone());
                    entry.insert("serial".into(), serial.clone());
                    serde_yaml::Value::Mapping(entry)
                })
                .collect();
            *devices = serde_yaml::Value::Sequence(list);
        }
        serde_yaml::from_value(value)
    }

    /// Apply `HARNESS_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(adb) = std::env::var("HARNESS_ADB") {
            self.adb_path = adb;
        }
        if let Ok(webhook) = std::env::var("HARNESS_FEISHU_WEBHOOK") {
            self.notify.feishu_webhook = Some(SecretString::from(webhook));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.adb_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "adb_path".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.workers.join_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workers.join_timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Look up a free-form key.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

/// Resolve the session root: `HARNESS_ROOT` or the current directory.
pub fn resolve_root() -> PathBuf {
    std::env::var("HARNESS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_map_in_order() {
        let raw = r#"
project_name: demo
adb_devices:
  main_phone: 192.168.1.20:5555
  bench: R58M123ABC
connection:
  retry_budget: 5
camera_id: 3
"#;
        let config = HarnessConfig::from_yaml(raw).unwrap();
        assert_eq!(config.project_name, "demo");
        assert_eq!(config.adb_devices.len(), 2);
        assert_eq!(config.adb_devices[0].name, "main_phone");
        assert_eq!(config.adb_devices[1].serial, "R58M123ABC");
        assert_eq!(config.connection.retry_budget, 5);
        assert_eq!(config.connection.retry_pause_ms, 1000);
        assert_eq!(config.get("camera_id"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn empty_document_is_default() {
        let config = HarnessConfig::from_yaml("").unwrap();
        assert_eq!(config.adb_path, "adb");
        assert!(config.adb_devices.is_empty());
        assert_eq!(config.workers.join_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(dir.path()).unwrap();
        assert_eq!(config.connection.retry_budget, 3);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "adb_devices: [unclosed").unwrap();
        let err = HarnessConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
