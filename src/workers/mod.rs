//! Background workers.
//!
//! A worker is a named `WorkerUnit` whose `working()` is called in a loop on
//! its own task until it is stopped. The pool keeps at most one active
//! instance per name and hands each stopped worker's artifact to the report.

pub mod alert;
pub mod base;
pub mod builtin;
pub mod params;
pub mod pool;
pub mod registry;
pub mod state;

pub use alert::{AlertCallback, EscalationStrategy};
pub use base::{SupervisorSettings, WorkerContext, WorkerHandle, WorkerUnit, backoff_delay};
pub use params::WorkerArgs;
pub use pool::{StartOutcome, WorkerPool};
pub use registry::{WorkerFactory, WorkerRegistry, worker_factory};
pub use state::WorkerState;
