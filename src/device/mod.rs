//! Device connection layer.
//!
//! - `handle`: immutable device identity (serial or network address)
//! - `runner`: process execution seam (`CommandRunner`, real `AdbRunner`)
//! - `connection`: retrying, reconnecting command execution per device
//! - `pool`: named devices sharing one adb transport

pub mod connection;
pub mod handle;
pub mod pool;
pub mod runner;

pub use connection::{ConnectionManager, ConnectionSettings};
pub use handle::DeviceHandle;
pub use pool::DevicePool;
pub use runner::{AdbRunner, CommandOutput, CommandRunner};
