//! Scheduler Layer
//!
//! Fixed-interval collection driven from a single task.
//!
//! # Architecture
//!
//! - [`CadenceController`]: Target-time bookkeeping, drift handling, loop exit
//! - [`Orchestrator`]: Concurrent two-phase fan-out over all providers
//! - [`Clock`]: Wall time anchored to tokio's monotonic clock

mod cadence;
pub mod clock;
mod error;
mod orchestrator;

pub use cadence::{CadenceController, ExitReason, RunSummary, initial_target};
pub use clock::Clock;
pub use error::CycleError;
pub use orchestrator::{Assembled, Orchestrator, ProviderOutcome};
