//! Concurrent collection of one cycle.
//!
//! All entries run as futures joined on the current task. Continuous entries
//! are placed first so that every poll is launched before any push wait is
//! evaluated. The whole join is bounded by the cycle deadline; dropping it on
//! expiry cancels whatever is still running while keeping the results of
//! entries that already finished.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::measurement::Batch;
use crate::provider::{
    CycleContext, InitError, PhaseErrors, Provider, ProviderDescriptor, ProviderEntry,
    StatsOutput, format_record,
};
use crate::scheduler::CycleError;

/// Result and per-phase errors of one provider for the last cycle.
pub type ProviderOutcome<'a> = (Option<&'a StatsOutput>, &'a PhaseErrors);

/// A formatted batch plus the failures found while building it.
#[derive(Debug)]
pub struct Assembled {
    pub batch: Batch,
    /// Provider calls that returned an error, were cancelled or panicked.
    pub provider_errors: usize,
    /// Records rejected by formatting.
    pub record_errors: usize,
}

impl Assembled {
    pub fn failed(&self) -> bool {
        self.provider_errors > 0 || self.record_errors > 0
    }
}

/// Owns the registered providers and runs them once per cycle.
#[derive(Debug, Default)]
pub struct Orchestrator {
    entries: Vec<ProviderEntry>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; its descriptor is built here and never recomputed.
    pub fn register(&mut self, provider: Box<dyn Provider>) -> &ProviderDescriptor {
        let entry = ProviderEntry::register(provider);
        tracing::info!(
            provider = %entry.name(),
            continuous = entry.descriptor().has_poll,
            time_needed = ?entry.descriptor().time_needed,
            "Registered provider"
        );
        self.entries.push(entry);
        let last = self.entries.len() - 1;
        self.entries[last].descriptor()
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every provider's one-time hooks in registration order.
    ///
    /// Stops at the first failure.
    pub async fn initialise(&mut self, ctx: &CycleContext) -> Result<(), InitError> {
        for entry in &mut self.entries {
            entry.initialise(ctx).await?;
        }
        Ok(())
    }

    /// Run one cycle, bounded by `deadline`.
    ///
    /// Previous results and errors are cleared first. On deadline expiry the
    /// unfinished entries get a `Cancelled` error for the phase they were in
    /// and [`CycleError::Timeout`] is returned; finished entries keep their
    /// results either way.
    pub async fn collect(
        &mut self,
        ctx: &CycleContext,
        deadline: Duration,
    ) -> Result<(), CycleError> {
        for entry in &mut self.entries {
            entry.reset();
        }

        let (continuous, point): (Vec<_>, Vec<_>) = self
            .entries
            .iter_mut()
            .partition(|entry| entry.descriptor().has_poll);
        let tasks = continuous
            .into_iter()
            .chain(point)
            .map(|entry| entry.run_cycle(ctx));

        if tokio::time::timeout(deadline, join_all(tasks)).await.is_ok() {
            return Ok(());
        }

        let unfinished: Vec<String> = self
            .entries
            .iter_mut()
            .filter_map(|entry| entry.mark_cancelled().then(|| entry.name().to_string()))
            .collect();
        Err(CycleError::Timeout {
            deadline,
            unfinished,
        })
    }

    /// Per-provider outcome of the last cycle, keyed by provider name.
    pub fn outcomes(&self) -> BTreeMap<&str, ProviderOutcome<'_>> {
        self.entries
            .iter()
            .map(|entry| (entry.name(), (entry.result(), entry.errors())))
            .collect()
    }

    /// Log the last cycle's errors and format its results into a batch.
    ///
    /// Measurements appear in provider registration order. Results are moved
    /// out of the entries.
    pub fn assemble_batch(&mut self, target_time: DateTime<Utc>) -> Assembled {
        let mut batch = Batch::new(target_time);
        let mut provider_errors = 0;
        let mut record_errors = 0;

        for entry in &mut self.entries {
            for (phase, error) in entry.errors() {
                tracing::error!(
                    provider = %entry.name(),
                    phase = %phase,
                    error = %error,
                    "Provider call failed"
                );
                provider_errors += 1;
            }

            let Some(output) = entry.take_result() else {
                continue;
            };
            for record in output.into_records() {
                match format_record(record) {
                    Ok(Some(measurement)) => batch.measurements.push(measurement),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(provider = %entry.name(), error = %e, "Rejected record");
                        record_errors += 1;
                    }
                }
            }
        }

        Assembled {
            batch,
            provider_errors,
            record_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::FieldValue;
    use crate::provider::{Capabilities, Phase, ProviderError};
    use crate::scheduler::clock::Clock;
    use chrono::{TimeDelta, TimeZone};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Appends `label` to a shared log on every call.
    struct Traced {
        name: &'static str,
        caps: Capabilities,
        log: Arc<Mutex<Vec<String>>>,
        output: serde_json::Value,
    }

    impl Traced {
        fn push(&self, event: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event));
        }
    }

    #[async_trait::async_trait]
    impl Provider for Traced {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> Capabilities {
            self.caps
        }

        async fn poll_stats(&mut self, ctx: &CycleContext) -> Result<(), ProviderError> {
            self.push("poll-start");
            while ctx.next_sample(self.time_needed()).await {}
            self.push("poll-end");
            Ok(())
        }

        async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
            self.push("push");
            StatsOutput::try_from(self.output.clone())
        }
    }

    /// Never finishes its push phase.
    struct Stuck;

    #[async_trait::async_trait]
    impl Provider for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
            std::future::pending().await
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn ctx() -> CycleContext {
        CycleContext::new(
            start() + TimeDelta::seconds(1),
            Duration::from_secs(1),
            Clock::starting_at(start()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_launch_before_pushes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::new();
        orch.register(Box::new(Traced {
            name: "point",
            caps: Capabilities::default(),
            log: log.clone(),
            output: json!({"measurement": "p", "v": 1}),
        }));
        orch.register(Box::new(Traced {
            name: "cont",
            caps: Capabilities::default().with_poll(),
            log: log.clone(),
            output: json!({"measurement": "c", "v": 2}),
        }));

        orch.collect(&ctx(), Duration::from_secs(2)).await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log[0], "cont:poll-start");
        assert!(log.contains(&"point:push".to_string()));
        assert!(log.contains(&"cont:push".to_string()));

        // batch keeps registration order
        let assembled = orch.assemble_batch(ctx().target_time());
        assert!(!assembled.failed());
        let names: Vec<_> = assembled
            .batch
            .measurements
            .iter()
            .map(|m| m.measurement.as_str())
            .collect();
        assert_eq!(names, ["p", "c"]);
        assert_eq!(assembled.batch.measurements[1].fields["v"], FieldValue::Int(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_partial_results() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::new();
        orch.register(Box::new(Traced {
            name: "fast",
            caps: Capabilities::default(),
            log,
            output: json!({"measurement": "fast", "v": 1}),
        }));
        orch.register(Box::new(Stuck));

        let err = orch.collect(&ctx(), Duration::from_secs(2)).await.unwrap_err();
        match err {
            CycleError::Timeout { unfinished, .. } => assert_eq!(unfinished, ["stuck"]),
            other => panic!("unexpected error: {other:?}"),
        }

        let outcomes = orch.outcomes();
        assert!(outcomes["fast"].0.is_some());
        assert!(matches!(
            outcomes["stuck"].1.get(&Phase::Push),
            Some(ProviderError::Cancelled)
        ));

        let assembled = orch.assemble_batch(ctx().target_time());
        assert_eq!(assembled.batch.len(), 1);
        assert_eq!(assembled.provider_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_errors_are_counted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut orch = Orchestrator::new();
        orch.register(Box::new(Traced {
            name: "mixed",
            caps: Capabilities::default(),
            log,
            output: json!([
                {"measurement": "good", "v": 1},
                {"v": 2},
                {"measurement": null, "v": 3},
            ]),
        }));

        orch.collect(&ctx(), Duration::from_secs(2)).await.unwrap();
        let assembled = orch.assemble_batch(ctx().target_time());
        assert_eq!(assembled.batch.len(), 1);
        assert_eq!(assembled.record_errors, 1);
        assert!(assembled.failed());
    }
}
