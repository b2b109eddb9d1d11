//! Metronome - Fixed-Interval Telemetry Collection
//!
//! This crate provides the core of the metronome agent. It can be used as a
//! library to drive custom providers, or run as a standalone daemon with the
//! `metronome` executable.
//!
//! # Architecture
//!
//! - **Providers**: Pluggable metric sources with optional poll phase
//! - **Scheduler**: Drift-correcting cadence plus concurrent two-phase fan-out
//! - **Delivery**: Bounded channel feeding a dedicated sink writer thread
//! - **Breaker**: Consecutive-failure accounting for collection and writes
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use metronome::{
//!     CadenceController, CircuitBreaker, DeliveryPipeline, Orchestrator, PrintSink,
//!     provider::system::MemoryProvider,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let interval = Duration::from_secs(10);
//! let mut orchestrator = Orchestrator::new();
//! orchestrator.register(Box::new(MemoryProvider::new()));
//!
//! let breaker = Arc::new(CircuitBreaker::new(3));
//! let pipeline = DeliveryPipeline::spawn(Box::new(PrintSink::stdout()), 30, breaker.clone())?;
//! let controller =
//!     CadenceController::new(orchestrator, pipeline, breaker, interval, CancellationToken::new());
//! let summary = controller.run().await;
//! println!("ran {} cycles", summary.cycles);
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod config;
pub mod delivery;
pub mod measurement;
pub mod provider;
pub mod scheduler;

pub use breaker::{CircuitBreaker, ErrorCounter};
pub use delivery::{DeliveryError, DeliveryPipeline, InfluxSink, PrintSink, Sink, SinkError};
pub use measurement::{Batch, FieldValue, Measurement};
pub use provider::{CycleContext, Provider, ProviderError, StatsOutput};
pub use scheduler::{CadenceController, CycleError, ExitReason, Orchestrator, RunSummary};
