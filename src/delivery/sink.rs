//! Sink trait and errors.

use thiserror::Error;

use crate::measurement::Batch;

/// Errors raised while writing a batch.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink rejected write with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Destination for batches.
///
/// A sink is moved onto the writer thread and only ever called from there, so
/// `write` may block.
pub trait Sink: Send + 'static {
    fn name(&self) -> &str;

    /// Write one batch. A failed batch is dropped by the caller.
    fn write(&mut self, batch: &Batch) -> Result<(), SinkError>;
}
