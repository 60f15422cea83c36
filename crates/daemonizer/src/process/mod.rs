//! Process-level plumbing: detaching into the background, redirecting the
//! standard streams and delivering or handling the termination signal.

mod descriptors;
mod detach;
mod errors;
mod handoff;
mod signals;

pub use detach::{
    DetachPlan, DetachedHandle, Detacher, Detachment, Handoff, InlineDetacher, LaunchMode,
    SystemDetacher,
};
pub use errors::DetachError;
pub use signals::{
    ProcessSignals, ShutdownError, SignalDeliveryError, StopToken, SystemSignals,
    TERMINATION_SIGNAL,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
