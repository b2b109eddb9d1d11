//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;

use crate::delivery::DeliveryError;

/// Errors that fail one collection cycle without stopping the loop.
#[derive(Debug, Error)]
pub enum CycleError {
    /// Providers were still running when the cycle deadline expired.
    #[error("cycle exceeded {deadline:?}, unfinished providers: {unfinished:?}")]
    Timeout {
        deadline: Duration,
        unfinished: Vec<String>,
    },

    /// The batch could not be handed to the delivery pipeline.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}
