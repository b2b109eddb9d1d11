//! Provider Layer
//!
//! Pluggable metric sources sampled once per cycle by the scheduler.
//!
//! # Architecture
//!
//! - [`Provider`]: Core trait every metric source implements
//! - [`ProviderEntry`]: A registered provider plus its per-cycle outcome
//! - [`format_record`]: Turns raw records into [`Measurement`](crate::Measurement)s
//! - [`rate`]: Per-second rates from monotonic counters
//! - [`system`]: Built-in host providers backed by `sysinfo`
//!
//! # Example
//!
//! ```rust,no_run
//! use metronome::provider::{CycleContext, Provider, ProviderError, StatsOutput};
//! use serde_json::json;
//!
//! struct Uptime;
//!
//! #[async_trait::async_trait]
//! impl Provider for Uptime {
//!     fn name(&self) -> &str {
//!         "uptime"
//!     }
//!
//!     async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
//!         StatsOutput::try_from(json!({"measurement": "uptime", "seconds": 42}))
//!     }
//! }
//! ```

mod entry;
pub mod rate;
mod record;
pub mod system;
mod traits;

pub use entry::{InitError, InitStage, PhaseErrors, ProviderDescriptor, ProviderEntry};
pub use record::{RecordError, format_record};
pub use traits::{
    Capabilities, CycleContext, DEFAULT_TIME_NEEDED, Phase, Provider, ProviderError, Record,
    StatsOutput,
};
