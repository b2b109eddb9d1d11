//! Fixed-interval cadence controller.
//!
//! Owns `target_time` and the cycle lifecycle. Each iteration wakes one
//! interval before `target_time`, runs the orchestrator, hands the batch to the
//! delivery pipeline and advances `target_time` by exactly one interval,
//! whatever the cycle's outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use crate::breaker::{CircuitBreaker, ErrorCounter};
use crate::delivery::DeliveryPipeline;
use crate::provider::CycleContext;
use crate::scheduler::clock::{Clock, ceil_to_second, to_delta};
use crate::scheduler::{CycleError, Orchestrator};

/// Falling this many intervals behind abandons alignment.
const CRITICAL_DRIFT_FACTOR: u32 = 5;

/// First target time: `ceil(now) + collect_interval`.
pub fn initial_target(clock: &Clock, collect_interval: Duration) -> DateTime<Utc> {
    ceil_to_second(clock.now()) + to_delta(collect_interval)
}

/// How far behind the wake point a cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drift {
    OnSchedule,
    /// Under half an interval late.
    Minor,
    /// Up to the critical factor late.
    Major,
    /// Past the critical factor; `target_time` was moved forward.
    SkippedAhead,
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The shutdown token was cancelled.
    Shutdown,
    /// A consecutive-error counter reached its threshold.
    CircuitOpen(ErrorCounter),
}

/// Returned to the process layer once the pipeline is drained.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Cycles that ran their collection.
    pub cycles: u64,
    pub exit_reason: ExitReason,
    /// Target time the next cycle would have used.
    pub next_target_time: DateTime<Utc>,
}

impl RunSummary {
    /// Process exit status: non-zero after a breaker trip.
    pub fn exit_code(&self) -> i32 {
        match self.exit_reason {
            ExitReason::Shutdown => 0,
            ExitReason::CircuitOpen(_) => 1,
        }
    }
}

/// Drives the orchestrator at a fixed interval until shutdown or breaker trip.
#[derive(Debug)]
pub struct CadenceController {
    orchestrator: Orchestrator,
    pipeline: DeliveryPipeline,
    breaker: Arc<CircuitBreaker>,
    collect_interval: Duration,
    clock: Clock,
    shutdown: CancellationToken,
    target_time: DateTime<Utc>,
}

impl CadenceController {
    pub fn new(
        orchestrator: Orchestrator,
        pipeline: DeliveryPipeline,
        breaker: Arc<CircuitBreaker>,
        collect_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_clock(
            orchestrator,
            pipeline,
            breaker,
            collect_interval,
            shutdown,
            Clock::new(),
        )
    }

    pub fn with_clock(
        orchestrator: Orchestrator,
        pipeline: DeliveryPipeline,
        breaker: Arc<CircuitBreaker>,
        collect_interval: Duration,
        shutdown: CancellationToken,
        clock: Clock,
    ) -> Self {
        Self {
            target_time: initial_target(&clock, collect_interval),
            orchestrator,
            pipeline,
            breaker,
            collect_interval,
            clock,
            shutdown,
        }
    }

    pub fn target_time(&self) -> DateTime<Utc> {
        self.target_time
    }

    /// Run until shutdown or breaker trip, then drain the pipeline.
    pub async fn run(mut self) -> RunSummary {
        let interval = to_delta(self.collect_interval);
        let mut cycles = 0u64;

        tracing::info!(
            interval = ?self.collect_interval,
            providers = self.orchestrator.len(),
            first_target = %self.target_time,
            "Starting collection loop"
        );

        let exit_reason = loop {
            if self.shutdown.is_cancelled() {
                break ExitReason::Shutdown;
            }
            if let Some(counter) = self.breaker.tripped() {
                tracing::error!(
                    counter = %counter,
                    max_consecutive_errors = self.breaker.max_consecutive_errors(),
                    "Too many consecutive errors, stopping"
                );
                break ExitReason::CircuitOpen(counter);
            }

            self.check_drift();

            let wake_time = self.target_time - interval;
            let woke = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => false,
                _ = self.clock.sleep_until(wake_time) => true,
            };
            if !woke {
                tracing::debug!(target_time = %self.target_time, "Shutdown during wait, skipping cycle");
                continue;
            }

            let ctx = CycleContext::new(self.target_time, self.collect_interval, self.clock);
            let failed = match self.run_cycle(&ctx).await {
                Ok(failed) => failed,
                Err(e) => {
                    tracing::error!(target_time = %self.target_time, error = %e, "Cycle failed");
                    true
                }
            };

            self.target_time += interval;
            self.breaker.record_cycle(failed);
            cycles += 1;
        };

        tracing::info!(cycles, reason = ?exit_reason, "Collection loop stopped");
        if let Err(e) = self.pipeline.drain().await {
            tracing::error!(error = %e, "Failed to drain delivery pipeline");
        }

        RunSummary {
            cycles,
            exit_reason,
            next_target_time: self.target_time,
        }
    }

    /// Collect, format and enqueue one cycle. Returns whether anything failed.
    async fn run_cycle(&mut self, ctx: &CycleContext) -> Result<bool, CycleError> {
        let mut failed = false;

        if let Err(e) = self
            .orchestrator
            .collect(ctx, self.collect_interval * 2)
            .await
        {
            tracing::error!(target_time = %ctx.target_time(), error = %e, "Cycle deadline expired");
            failed = true;
        }

        let assembled = self.orchestrator.assemble_batch(ctx.target_time());
        failed |= assembled.failed();
        tracing::debug!(
            target_time = %ctx.target_time(),
            records = assembled.batch.len(),
            queued = self.pipeline.depth(),
            "Cycle complete"
        );

        self.pipeline.send(assembled.batch).await?;
        Ok(failed)
    }

    /// Log how far behind the wake point we are; skip ahead past 5 intervals.
    fn check_drift(&mut self) -> Drift {
        let now = self.clock.now();
        let wake_time = self.target_time - to_delta(self.collect_interval);
        let Ok(behind) = (now - wake_time).to_std() else {
            return Drift::OnSchedule;
        };
        if behind.is_zero() {
            return Drift::OnSchedule;
        }

        if behind > self.collect_interval * CRITICAL_DRIFT_FACTOR {
            let skipped_to = ceil_to_second(now + TimeDelta::seconds(1));
            tracing::error!(
                critical = true,
                behind = ?behind,
                target_time = %self.target_time,
                skipped_to = %skipped_to,
                "Running far behind schedule, skipping ahead"
            );
            self.target_time = skipped_to;
            Drift::SkippedAhead
        } else if behind < self.collect_interval / 2 {
            tracing::info!(behind = ?behind, target_time = %self.target_time, "Running behind schedule");
            Drift::Minor
        } else {
            tracing::warn!(behind = ?behind, target_time = %self.target_time, "Running behind schedule");
            Drift::Major
        }
    }
}
