//! adb-harness: action dispatch and background workers for Android test
//! sessions.

pub mod actions;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod logging;
pub mod report;
pub mod test_support;
pub mod workers;

pub use context::{Session, SessionContext, SharedData};
pub use error::{Error, Result};
