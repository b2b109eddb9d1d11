//! Bounded channel plus a dedicated writer thread.
//!
//! Single-writer pattern: one OS thread owns the sink and writes batches in
//! FIFO order as they arrive on a bounded `tokio::sync::mpsc` channel. The
//! producer side suspends in [`DeliveryPipeline::send`] while the channel is
//! full.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::breaker::CircuitBreaker;
use crate::delivery::Sink;
use crate::measurement::Batch;

// =============================================================================
// Constants
// =============================================================================

/// Seconds of backlog the channel may hold.
const BACKLOG_SECS: u64 = 300;

/// Pause between depth checks while draining.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Channel capacity for a collection interval: `max(1, 300 / interval_secs)`.
pub fn channel_capacity(collect_interval: Duration) -> usize {
    let secs = collect_interval.as_secs().max(1);
    (BACKLOG_SECS / secs).max(1) as usize
}

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by the pipeline itself (not by the sink).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The writer thread is gone.
    #[error("delivery channel closed")]
    Closed,

    #[error("failed to spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("writer thread panicked")]
    WriterPanicked,

    #[error("failed to join writer thread: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// =============================================================================
// Pipeline
// =============================================================================

/// Producer handle of the delivery pipeline.
pub struct DeliveryPipeline {
    tx: Sender<Batch>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for DeliveryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPipeline")
            .field("capacity", &self.capacity())
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

impl DeliveryPipeline {
    /// Start the writer thread.
    ///
    /// The sink is moved onto the thread; the breaker's sink counter is
    /// updated after every write.
    pub fn spawn(
        sink: Box<dyn Sink>,
        capacity: usize,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DeliveryError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = thread::Builder::new()
            .name("metronome-writer".to_string())
            .spawn(move || writer_loop(sink, rx, breaker))
            .map_err(DeliveryError::Spawn)?;

        tracing::debug!(capacity, "Delivery pipeline started");
        Ok(Self { tx, writer })
    }

    /// Enqueue a batch, suspending while the channel is full.
    pub async fn send(&self, batch: Batch) -> Result<(), DeliveryError> {
        self.tx.send(batch).await.map_err(|_| DeliveryError::Closed)
    }

    /// Batches waiting in the channel (excluding one being written).
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Wait for the channel to empty, then close it and join the writer.
    pub async fn drain(self) -> Result<(), DeliveryError> {
        let Self { tx, writer } = self;

        loop {
            let depth = tx.max_capacity() - tx.capacity();
            if depth == 0 || tx.is_closed() {
                break;
            }
            tracing::info!(depth, "Draining delivery pipeline");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        // Last sender gone: the writer finishes its current batch and exits.
        drop(tx);
        tokio::task::spawn_blocking(move || writer.join())
            .await?
            .map_err(|_| DeliveryError::WriterPanicked)?;

        tracing::info!("Delivery pipeline closed");
        Ok(())
    }
}

fn writer_loop(mut sink: Box<dyn Sink>, mut rx: Receiver<Batch>, breaker: Arc<CircuitBreaker>) {
    tracing::info!(sink = %sink.name(), "Writer thread started");

    while let Some(batch) = rx.blocking_recv() {
        match sink.write(&batch) {
            Ok(()) => {
                tracing::debug!(
                    sink = %sink.name(),
                    records = batch.len(),
                    time = %batch.timestamp(),
                    "Batch written"
                );
                breaker.record_write(true);
            }
            Err(e) => {
                tracing::error!(
                    sink = %sink.name(),
                    records = batch.len(),
                    time = %batch.timestamp(),
                    error = %e,
                    "Failed to write batch, dropping it"
                );
                breaker.record_write(false);
            }
        }
    }

    tracing::info!(sink = %sink.name(), "Writer thread stopped");
}
