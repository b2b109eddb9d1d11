//! Core provider traits and types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::provider::rate::RateError;
use crate::scheduler::clock::{Clock, to_delta};

/// Default lead a provider needs before `target_time` to finish its push (200 ms).
pub const DEFAULT_TIME_NEEDED: Duration = Duration::from_millis(200);

/// A raw record as returned by a provider.
///
/// Must carry a `measurement` key; may carry a `tags` object; every other key
/// is a field.
pub type Record = serde_json::Map<String, Value>;

/// Errors raised by provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Generic provider failure.
    #[error("{0}")]
    Failed(String),

    /// I/O error while reading a metric source.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading a kernel statistics file failed.
    #[error("procfs error: {0}")]
    Procfs(#[from] procfs::ProcError),

    /// The metric source does not exist on this host.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The provider returned something that is not a record or list of records.
    #[error("invalid output: {0}")]
    InvalidOutput(String),

    /// Counter rate computation failed.
    #[error("rate error: {0}")]
    Rate(#[from] RateError),

    /// The call was still running when the cycle deadline expired.
    #[error("cancelled by cycle deadline")]
    Cancelled,

    /// The call panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl ProviderError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Steady-state phase of a provider call within a cycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr, EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Continuous sampling (`poll_stats`).
    Poll,
    /// Point sampling (`get_stats`).
    Push,
}

/// Optional capabilities a provider declares.
///
/// Read once when the provider is registered; the scheduler never asks again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Implements `poll_stats`; makes the provider continuous.
    pub poll: bool,
    /// Implements `init_fetch`.
    pub init_fetch: bool,
    /// Implements `async_init`.
    pub async_init: bool,
}

impl Capabilities {
    pub fn with_poll(mut self) -> Self {
        self.poll = true;
        self
    }

    pub fn with_init_fetch(mut self) -> Self {
        self.init_fetch = true;
        self
    }

    pub fn with_async_init(mut self) -> Self {
        self.async_init = true;
        self
    }
}

/// Per-cycle context passed to every provider call.
///
/// All tasks of one cycle observe the same `target_time`.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext {
    target_time: DateTime<Utc>,
    collect_interval: Duration,
    clock: Clock,
}

impl CycleContext {
    pub fn new(target_time: DateTime<Utc>, collect_interval: Duration, clock: Clock) -> Self {
        Self {
            target_time,
            collect_interval,
            clock,
        }
    }

    /// Nominal deadline and output timestamp of this cycle.
    pub fn target_time(&self) -> DateTime<Utc> {
        self.target_time
    }

    pub fn collect_interval(&self) -> Duration {
        self.collect_interval
    }

    /// Current wall time on the scheduler's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Time left until `target_time`, zero if it has passed.
    pub fn remaining(&self) -> Duration {
        self.clock.until(self.target_time).unwrap_or_default()
    }

    /// Sleep until wall time `t`.
    pub async fn sleep_until(&self, t: DateTime<Utc>) {
        self.clock.sleep_until(t).await;
    }

    /// Wait one sampling step (a tenth of the interval).
    ///
    /// Returns `false` without sleeping once the next sample would land inside
    /// the final `lead` before `target_time`, which is the signal for a poll
    /// loop to stop.
    pub async fn next_sample(&self, lead: Duration) -> bool {
        let next = self.now() + to_delta(self.collect_interval / 10);
        if next >= self.target_time - to_delta(lead) {
            return false;
        }
        self.clock.sleep_until(next).await;
        true
    }
}

/// What one `get_stats` call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StatsOutput {
    #[default]
    Empty,
    Single(Record),
    Multiple(Vec<Record>),
}

impl StatsOutput {
    /// Flatten into a list of records.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::Empty => Vec::new(),
            Self::Single(r) => vec![r],
            Self::Multiple(rs) => rs,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Single(_) => false,
            Self::Multiple(rs) => rs.is_empty(),
        }
    }
}

impl From<Record> for StatsOutput {
    fn from(r: Record) -> Self {
        Self::Single(r)
    }
}

impl From<Vec<Record>> for StatsOutput {
    fn from(rs: Vec<Record>) -> Self {
        Self::Multiple(rs)
    }
}

impl From<Option<Record>> for StatsOutput {
    fn from(r: Option<Record>) -> Self {
        r.map_or(Self::Empty, Self::Single)
    }
}

impl TryFrom<Value> for StatsOutput {
    type Error = ProviderError;

    /// `null` → empty, object → one record, array of objects → many records.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::Empty),
            Value::Object(map) => Ok(Self::Single(map)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(ProviderError::InvalidOutput(format!(
                        "expected record object, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Multiple),
            other => Err(ProviderError::InvalidOutput(format!(
                "expected record or list of records, got {other}"
            ))),
        }
    }
}

/// Core trait for metric providers.
///
/// Only `name` and `get_stats` are required. The optional hooks must be
/// announced through [`Provider::capabilities`]; a hook whose capability is
/// not declared is never called.
///
/// # Lifecycle
///
/// 1. `async_init` once after registration
/// 2. `init_fetch` once before the scheduling loop (seed counter baselines)
/// 3. each cycle: `poll_stats` (continuous providers only), then `get_stats`
///    at `target_time - time_needed`
///
/// Errors from steps 1 and 2 abort startup. Errors from step 3 are isolated to
/// the provider and phase that raised them.
#[async_trait::async_trait]
pub trait Provider: Send + 'static {
    /// Human-readable name used in logs and error reports.
    fn name(&self) -> &str;

    /// Declared optional hooks.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Lead needed before `target_time` for `get_stats` to complete.
    fn time_needed(&self) -> Duration {
        DEFAULT_TIME_NEEDED
    }

    /// One-time setup that needs a suspend point (e.g. probing hardware).
    async fn async_init(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        Ok(())
    }

    /// One-time baseline capture for delta-rate counters.
    async fn init_fetch(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Sample repeatedly through the cycle window.
    ///
    /// Must return before `target_time - time_needed`; use
    /// [`CycleContext::next_sample`] to pace the loop.
    async fn poll_stats(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Produce this cycle's records.
    async fn get_stats(&mut self, ctx: &CycleContext) -> Result<StatsOutput, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_phase_strings() {
        assert_eq!(Phase::Poll.to_string(), "poll");
        assert_eq!(Phase::Push.as_ref(), "push");
        assert_eq!(Phase::from_str("poll").unwrap(), Phase::Poll);
        assert!(Phase::from_str("init").is_err());
    }

    #[test]
    fn test_stats_output_from_value() {
        assert_eq!(
            StatsOutput::try_from(json!(null)).unwrap(),
            StatsOutput::Empty
        );

        let single = StatsOutput::try_from(json!({"measurement": "a", "x": 1})).unwrap();
        assert_eq!(single.into_records().len(), 1);

        let many = StatsOutput::try_from(json!([
            {"measurement": "a", "x": 1},
            {"measurement": "b", "y": 2},
        ]))
        .unwrap();
        assert_eq!(many.into_records().len(), 2);

        assert!(StatsOutput::try_from(json!(42)).is_err());
        assert!(StatsOutput::try_from(json!([1, 2])).is_err());
    }

    #[test]
    fn test_capabilities_builder() {
        let caps = Capabilities::default().with_poll().with_init_fetch();
        assert!(caps.poll);
        assert!(caps.init_fetch);
        assert!(!caps.async_init);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_sample_stops_before_lead() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Clock::starting_at(start);
        let ctx = CycleContext::new(
            start + chrono::TimeDelta::seconds(1),
            Duration::from_secs(1),
            clock,
        );

        let mut samples = 1;
        while ctx.next_sample(DEFAULT_TIME_NEEDED).await {
            samples += 1;
        }

        // 100 ms steps from t=0 stop once the next step would reach t=0.8 s
        assert_eq!(samples, 8);
        assert!(ctx.now() < ctx.target_time() - chrono::TimeDelta::milliseconds(200));
    }
}
