//! Per-second rates from monotonic counters.
//!
//! Providers that report counters (network bytes, disk operations, context
//! switches) keep a [`DeltaRate`] holding the previous [`CounterSnapshot`].
//! Each call to [`DeltaRate::advance`] computes the rates against the stored
//! baseline and commits the new snapshot in the same step, so a cycle that is
//! cancelled at one of its await points never leaves the baseline half updated.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use thiserror::Error;

/// Errors produced by rate computation.
#[derive(Debug, Error, PartialEq)]
pub enum RateError {
    /// `advance` was called before any baseline was seeded.
    #[error("counter baseline was never seeded")]
    NotSeeded,

    /// The two snapshots were captured at the same instant (or out of order).
    #[error("snapshots are not separated in time")]
    ZeroElapsed,
}

/// Counter values captured at one instant of the provider's own clock.
#[derive(Debug, Clone)]
pub struct CounterSnapshot {
    counters: HashMap<String, u64>,
    captured_at: Instant,
}

impl CounterSnapshot {
    /// Snapshot taken now.
    pub fn now(counters: impl IntoIterator<Item = (impl Into<String>, u64)>) -> Self {
        Self::at(counters, Instant::now())
    }

    /// Snapshot taken at a given instant.
    pub fn at(
        counters: impl IntoIterator<Item = (impl Into<String>, u64)>,
        captured_at: Instant,
    ) -> Self {
        Self {
            counters: counters.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            captured_at,
        }
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.counters.get(key).copied()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// One output field derived from a counter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateField {
    /// Counter key inside the snapshot.
    pub counter: String,
    /// Field name written to the measurement.
    pub output: String,
    /// Unit multiplier applied to the per-second rate.
    pub multiplier: f64,
}

impl RateField {
    /// Report `counter` under its own name.
    pub fn new(counter: impl Into<String>) -> Self {
        let counter = counter.into();
        Self {
            output: counter.clone(),
            counter,
            multiplier: 1.0,
        }
    }

    /// Report `counter` as `output`.
    pub fn renamed(counter: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            counter: counter.into(),
            output: output.into(),
            multiplier: 1.0,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

/// Compute `round((next - previous) / elapsed * multiplier)` for every field.
///
/// Fields whose counter is missing from either snapshot are skipped. A counter
/// that went backwards (reset or wrap) reports 0.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use metronome::provider::rate::{compute_rates, CounterSnapshot, RateField};
///
/// let t0 = Instant::now();
/// let previous = CounterSnapshot::at([("x", 100)], t0);
/// let next = CounterSnapshot::at([("x", 150)], t0 + Duration::from_secs(5));
/// let rates = compute_rates(&previous, &next, &[RateField::new("x")]).unwrap();
/// assert_eq!(rates["x"], 10);
/// ```
pub fn compute_rates(
    previous: &CounterSnapshot,
    next: &CounterSnapshot,
    fields: &[RateField],
) -> Result<BTreeMap<String, i64>, RateError> {
    let elapsed = next
        .captured_at
        .checked_duration_since(previous.captured_at)
        .map(|d| d.as_secs_f64())
        .filter(|secs| *secs > 0.0)
        .ok_or(RateError::ZeroElapsed)?;

    let mut rates = BTreeMap::new();
    for field in fields {
        let (Some(before), Some(after)) = (previous.get(&field.counter), next.get(&field.counter))
        else {
            continue;
        };
        let delta = after.saturating_sub(before) as f64;
        let rate = (delta / elapsed * field.multiplier).round() as i64;
        rates.insert(field.output.clone(), rate);
    }
    Ok(rates)
}

/// Provider-owned rate state: the field list plus the last committed snapshot.
#[derive(Debug, Clone)]
pub struct DeltaRate {
    fields: Vec<RateField>,
    baseline: Option<CounterSnapshot>,
}

impl DeltaRate {
    pub fn new(fields: Vec<RateField>) -> Self {
        Self {
            fields,
            baseline: None,
        }
    }

    /// Store the initial baseline (called from `init_fetch`).
    pub fn seed(&mut self, snapshot: CounterSnapshot) {
        self.baseline = Some(snapshot);
    }

    pub fn is_seeded(&self) -> bool {
        self.baseline.is_some()
    }

    /// Compute rates against the baseline and make `snapshot` the new baseline.
    ///
    /// The baseline is replaced even when the elapsed time is zero, so the next
    /// call measures from the latest capture.
    pub fn advance(&mut self, snapshot: CounterSnapshot) -> Result<BTreeMap<String, i64>, RateError> {
        let previous = self.baseline.replace(snapshot).ok_or(RateError::NotSeeded)?;
        let current = self.baseline.as_ref().ok_or(RateError::NotSeeded)?;
        compute_rates(&previous, current, &self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_compute_rates_basic() {
        let t0 = Instant::now();
        let prev = CounterSnapshot::at([("x", 100)], t0);
        let next = CounterSnapshot::at([("x", 150)], t0 + Duration::from_secs(5));
        let rates = compute_rates(&prev, &next, &[RateField::new("x")]).unwrap();
        assert_eq!(rates.get("x"), Some(&10));
    }

    #[test]
    fn test_compute_rates_rename_and_multiplier() {
        let t0 = Instant::now();
        let prev = CounterSnapshot::at([("bytes_recv", 0), ("packets_recv", 0)], t0);
        let next = CounterSnapshot::at(
            [("bytes_recv", 3000), ("packets_recv", 7)],
            t0 + Duration::from_secs(2),
        );
        let fields = [
            RateField::renamed("bytes_recv", "rx_bits").with_multiplier(8.0),
            RateField::renamed("packets_recv", "rx_packets"),
        ];
        let rates = compute_rates(&prev, &next, &fields).unwrap();
        assert_eq!(rates["rx_bits"], 12_000);
        // 3.5 rounds away from zero
        assert_eq!(rates["rx_packets"], 4);
    }

    #[test]
    fn test_counter_reset_reports_zero() {
        let t0 = Instant::now();
        let prev = CounterSnapshot::at([("x", 500)], t0);
        let next = CounterSnapshot::at([("x", 20)], t0 + Duration::from_secs(1));
        let rates = compute_rates(&prev, &next, &[RateField::new("x")]).unwrap();
        assert_eq!(rates["x"], 0);
    }

    #[test]
    fn test_missing_counter_skipped() {
        let t0 = Instant::now();
        let prev = CounterSnapshot::at([("x", 1)], t0);
        let next = CounterSnapshot::at([("y", 2)], t0 + Duration::from_secs(1));
        let rates = compute_rates(&prev, &next, &[RateField::new("x")]).unwrap();
        assert!(rates.is_empty());
    }

    #[test]
    fn test_zero_elapsed_is_error() {
        let t0 = Instant::now();
        let prev = CounterSnapshot::at([("x", 1)], t0);
        let next = CounterSnapshot::at([("x", 2)], t0);
        assert_eq!(
            compute_rates(&prev, &next, &[RateField::new("x")]),
            Err(RateError::ZeroElapsed)
        );
    }

    #[test]
    fn test_delta_rate_requires_seed() {
        let mut rate = DeltaRate::new(vec![RateField::new("x")]);
        assert!(!rate.is_seeded());
        assert_eq!(
            rate.advance(CounterSnapshot::now([("x", 1)])),
            Err(RateError::NotSeeded)
        );
        // the failed call still leaves a usable baseline behind
        assert!(rate.is_seeded());
    }

    #[test]
    fn test_delta_rate_commits_each_snapshot() {
        let t0 = Instant::now();
        let mut rate = DeltaRate::new(vec![RateField::new("x")]);
        rate.seed(CounterSnapshot::at([("x", 0)], t0));

        let first = rate
            .advance(CounterSnapshot::at([("x", 10)], t0 + Duration::from_secs(1)))
            .unwrap();
        assert_eq!(first["x"], 10);

        let second = rate
            .advance(CounterSnapshot::at([("x", 40)], t0 + Duration::from_secs(2)))
            .unwrap();
        assert_eq!(second["x"], 30);
    }
}
