//! Delivery Layer
//!
//! Decouples cycle production from sink I/O:
//! - **Producer**: the cadence controller enqueues one [`Batch`](crate::Batch) per cycle
//! - **Writer**: a dedicated thread owning the [`Sink`], writing FIFO
//!
//! # Components
//!
//! - [`DeliveryPipeline`]: Bounded channel, writer thread, drain-and-join shutdown
//! - [`Sink`]: Destination trait
//! - [`InfluxSink`]: InfluxDB 1.x line protocol over HTTP
//! - [`PrintSink`]: JSON to stdout for dry runs

mod influx;
mod pipeline;
mod print;
mod sink;

pub use influx::{InfluxSink, line_protocol};
pub use pipeline::{DeliveryError, DeliveryPipeline, channel_capacity};
pub use print::PrintSink;
pub use sink::{Sink, SinkError};
