//! Built-in actions.

mod connect;
mod logcat;
mod notify;
mod screenshot;

pub use connect::ConnectDevicesAction;
pub use logcat::LogcatOpsAction;
pub use notify::NotifyAction;
pub use screenshot::ScreenshotAction;

use crate::actions::{ActionRegistry, action_factory};

/// Register every built-in action.
pub fn register_all(registry: &ActionRegistry) {
    registry.register_sync("screenshot", action_factory(|| ScreenshotAction));
    registry.register_sync("connect_devices", action_factory(|| ConnectDevicesAction));
    registry.register_sync("logcat_ops", action_factory(|| LogcatOpsAction));
    registry.register_sync("notify", action_factory(NotifyAction::new));
}
