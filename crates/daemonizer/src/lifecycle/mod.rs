//! Lifecycle management for a named daemon.
//!
//! - [`types`] defines commands, outcomes, settings and IO helpers.
//! - [`error`] captures the error surface exposed to callers.
//! - [`controller`] implements the start/stop/restart/status flows.

mod controller;
mod error;
mod types;

pub use controller::DaemonLifecycle;
pub use error::LifecycleError;
pub use types::{
    LifecycleCommand, LifecycleOutcome, LifecycleOutput, LifecycleSettings, WorkloadError,
};

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");
