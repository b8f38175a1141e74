//! Named devices sharing one adb transport.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::config::HarnessConfig;
use crate::device::connection::{ConnectionManager, ConnectionSettings};
use crate::device::handle::DeviceHandle;
use crate::device::runner::CommandRunner;
use crate::error::ConnectionError;

/// Devices configured for a session, in configuration order.
pub struct DevicePool {
    devices: Vec<(String, Arc<ConnectionManager>)>,
    default_device: Arc<ConnectionManager>,
}

impl DevicePool {
    /// Build managers for every configured device. All of them share one
    /// transport lock because they share one adb server.
    pub fn from_config(config: &HarnessConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let settings = ConnectionSettings::from_config(config);
        let transport = Arc::new(Mutex::new(()));

        let devices = config
            .adb_devices
            .iter()
            .map(|entry| {
                let manager = ConnectionManager::new(
                    DeviceHandle::new(Some(entry.serial.clone())),
                    Arc::clone(&runner),
                    settings.clone(),
                    Arc::clone(&transport),
                );
                (entry.name.clone(), Arc::new(manager))
            })
            .collect();

        let default_device = Arc::new(ConnectionManager::new(
            DeviceHandle::default_device(),
            runner,
            settings,
            transport,
        ));

        Self {
            devices,
            default_device,
        }
    }

    /// Device by configured name.
    pub fn get(&self, name: &str) -> Option<Arc<ConnectionManager>> {
        self.devices
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| Arc::clone(m))
    }

    /// First configured device, or adb's default device when none are configured.
    pub fn primary(&self) -> Arc<ConnectionManager> {
        self.devices
            .first()
            .map(|(_, m)| Arc::clone(m))
            .unwrap_or_else(|| Arc::clone(&self.default_device))
    }

    /// Resolve an optional `device` parameter.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<ConnectionManager>, ConnectionError> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| ConnectionError::UnknownDevice {
                name: name.to_string(),
            }),
            None => Ok(self.primary()),
        }
    }

    /// All configured devices with their names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ConnectionManager>)> {
        self.devices.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// Run `adb connect` for every configured device, in order. USB devices
    /// report connected without a call.
    pub async fn connect_all(&self) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(self.devices.len());
        for (name, adb) in &self.devices {
            let connected = adb.connect().await;
            if !connected {
                warn!(device = %name, "Device did not connect");
            }
            results.push((name.clone(), connected));
        }
        results
    }

    pub fn names(&self) -> Vec<String> {
        self.devices.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceEntry;
    use crate::test_support::ScriptedRunner;

    fn config() -> HarnessConfig {
        HarnessConfig {
            adb_devices: vec![
                DeviceEntry {
                    name: "main_phone".into(),
                    serial: "192.168.1.20:5555".into(),
                },
                DeviceEntry {
                    name: "bench".into(),
                    serial: "R58M123ABC".into(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn primary_is_first_configured() {
        let pool = DevicePool::from_config(&config(), Arc::new(ScriptedRunner::new()));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.primary().device_id(), Some("192.168.1.20:5555"));
        assert!(pool.primary().handle().is_network_device());
        assert_eq!(pool.get("bench").unwrap().device_id(), Some("R58M123ABC"));
        assert_eq!(pool.names(), vec!["main_phone", "bench"]);
    }

    #[tokio::test]
    async fn connect_all_only_dials_network_devices() {
        let runner = Arc::new(ScriptedRunner::new().respond(
            "connect 192.168.1.20:5555",
            crate::device::CommandOutput::ok("connected to 192.168.1.20:5555"),
        ));
        let pool = DevicePool::from_config(&config(), runner.clone());

        let results = pool.connect_all().await;
        assert_eq!(
            results,
            vec![("main_phone".to_string(), true), ("bench".to_string(), true)]
        );
        assert_eq!(runner.count("connect"), 1);
    }

    #[tokio::test]
    async fn connect_all_reports_unreachable_devices() {
        let runner = Arc::new(ScriptedRunner::new().respond(
            "connect 192.168.1.20:5555",
            crate::device::CommandOutput::ok("failed to connect to 192.168.1.20:5555"),
        ));
        let pool = DevicePool::from_config(&config(), runner);
        assert_eq!(pool.connect_all().await[0], ("main_phone".to_string(), false));
    }

    #[test]
    fn empty_pool_falls_back_to_default_device() {
        let pool = DevicePool::from_config(&HarnessConfig::default(), Arc::new(ScriptedRunner::new()));
        assert!(pool.is_empty());
        assert_eq!(pool.primary().device_id(), None);
    }

    #[test]
    fn resolve_unknown_device_fails() {
        let pool = DevicePool::from_config(&config(), Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            pool.resolve(Some("nope")),
            Err(ConnectionError::UnknownDevice { .. })
        ));
        assert_eq!(pool.resolve(None).unwrap().device_id(), Some("192.168.1.20:5555"));
    }
}
