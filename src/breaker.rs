//! Consecutive-failure circuit breaker.
//!
//! Two independent counters are kept: one for collection cycles (updated by the
//! cadence controller) and one for sink writes (updated by the writer thread).
//! Each counter resets to zero on a clean cycle or write.

use std::sync::atomic::{AtomicU32, Ordering};

use strum_macros::{AsRefStr, Display};

/// Which consecutive-failure counter tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCounter {
    Collection,
    Sink,
}

/// Shared error accounting; wrap in an `Arc` to share with the writer thread.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    max_consecutive_errors: u32,
    collection: AtomicU32,
    sink: AtomicU32,
}

impl CircuitBreaker {
    /// `0` disables tripping.
    pub fn new(max_consecutive_errors: u32) -> Self {
        Self {
            max_consecutive_errors,
            collection: AtomicU32::new(0),
            sink: AtomicU32::new(0),
        }
    }

    pub fn max_consecutive_errors(&self) -> u32 {
        self.max_consecutive_errors
    }

    /// Record the outcome of one collection cycle.
    pub fn record_cycle(&self, failed: bool) {
        Self::record(&self.collection, failed);
    }

    /// Record the outcome of one sink write.
    pub fn record_write(&self, ok: bool) {
        Self::record(&self.sink, !ok);
    }

    fn record(counter: &AtomicU32, failed: bool) {
        if failed {
            counter.fetch_add(1, Ordering::AcqRel);
        } else {
            counter.store(0, Ordering::Release);
        }
    }

    pub fn collection_errors(&self) -> u32 {
        self.collection.load(Ordering::Acquire)
    }

    pub fn sink_errors(&self) -> u32 {
        self.sink.load(Ordering::Acquire)
    }

    /// The first counter at or above the threshold, if any.
    pub fn tripped(&self) -> Option<ErrorCounter> {
        if self.max_consecutive_errors == 0 {
            return None;
        }
        if self.collection_errors() >= self.max_consecutive_errors {
            Some(ErrorCounter::Collection)
        } else if self.sink_errors() >= self.max_consecutive_errors {
            Some(ErrorCounter::Sink)
        } else {
            None
        }
    }
}
