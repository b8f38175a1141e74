//! Device identity.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Identity of one physical or virtual device.
///
/// The network classification is computed once at construction and never
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    device_id: Option<String>,
    is_network: bool,
}

impl DeviceHandle {
    /// Create a handle for `device_id`, or for adb's default device when `None`.
    pub fn new(device_id: Option<String>) -> Self {
        let device_id = device_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        let is_network = device_id.as_deref().is_some_and(is_network_address);
        Self {
            device_id,
            is_network,
        }
    }

    /// Handle for whatever device adb picks when no serial is given.
    pub fn default_device() -> Self {
        Self::new(None)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Whether the device is reached over TCP (`adb connect`).
    pub fn is_network_device(&self) -> bool {
        self.is_network
    }

    /// Arguments that scope an adb invocation to this device.
    pub fn scope_args(&self) -> Vec<String> {
        match &self.device_id {
            Some(id) => vec!["-s".to_string(), id.clone()],
            None => Vec::new(),
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.device_id.as_deref().unwrap_or("default"))
    }
}

fn is_network_address(id: &str) -> bool {
    id.parse::<SocketAddr>().is_ok() || id.parse::<IpAddr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_network_devices() {
        assert!(DeviceHandle::new(Some("192.168.1.20:5555".into())).is_network_device());
        assert!(DeviceHandle::new(Some("10.0.0.7".into())).is_network_device());
        assert!(DeviceHandle::new(Some("[::1]:5555".into())).is_network_device());
        assert!(!DeviceHandle::new(Some("R58M123ABC".into())).is_network_device());
        assert!(!DeviceHandle::new(Some("emulator-5554".into())).is_network_device());
        assert!(!DeviceHandle::default_device().is_network_device());
    }

    #[test]
    fn scope_args_prefix_serial() {
        let handle = DeviceHandle::new(Some("emulator-5554".into()));
        assert_eq!(handle.scope_args(), vec!["-s", "emulator-5554"]);
        assert!(DeviceHandle::default_device().scope_args().is_empty());
    }

    #[test]
    fn blank_id_is_default_device() {
        let handle = DeviceHandle::new(Some("  ".into()));
        assert_eq!(handle.device_id(), None);
        assert_eq!(handle.to_string(), "default");
    }
}
