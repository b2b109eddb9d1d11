//! Per-core CPU utilisation and frequency, averaged over the cycle window,
//! plus kernel counters from `/proc/stat`: the context switch rate and the
//! share of time spent in each CPU mode since the previous cycle.

use procfs::prelude::*;
use procfs::KernelStats;
use serde_json::{Map, Value, json};
use sysinfo::System;

use super::{percent, round1};
use crate::provider::rate::{CounterSnapshot, DeltaRate, RateField};
use crate::provider::{
    Capabilities, CycleContext, Provider, ProviderError, Record, StatsOutput,
};

const CONTEXT_SWITCHES: &str = "ctxt";

/// One refresh worth of per-core readings.
#[derive(Debug, Clone, Default, PartialEq)]
struct CpuSample {
    usage: Vec<f32>,
    /// MHz
    freq: Vec<u64>,
}

/// Cumulative ticks per CPU mode, summed over all cores.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ModeTicks {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl From<&KernelStats> for ModeTicks {
    fn from(stats: &KernelStats) -> Self {
        let t = &stats.total;
        Self {
            user: t.user,
            nice: t.nice,
            system: t.system,
            idle: t.idle,
            iowait: t.iowait.unwrap_or(0),
            irq: t.irq.unwrap_or(0),
            softirq: t.softirq.unwrap_or(0),
            steal: t.steal.unwrap_or(0),
        }
    }
}

impl ModeTicks {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Percentage of elapsed ticks spent in each reported mode.
    fn percentages_since(&self, previous: &ModeTicks) -> [(&'static str, f64); 6] {
        let elapsed = self.total().saturating_sub(previous.total());
        let share = |now: u64, before: u64| percent(now.saturating_sub(before), elapsed);
        [
            ("user", share(self.user, previous.user)),
            ("system", share(self.system, previous.system)),
            ("iowait", share(self.iowait, previous.iowait)),
            ("nice", share(self.nice, previous.nice)),
            ("irq", share(self.irq, previous.irq)),
            ("softirq", share(self.softirq, previous.softirq)),
        ]
    }
}

/// Continuous provider sampling every tenth of the interval.
pub struct CpuProvider {
    system: System,
    samples: Vec<CpuSample>,
    switches: DeltaRate,
    last_ticks: Option<ModeTicks>,
}

impl Default for CpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            samples: Vec::new(),
            switches: DeltaRate::new(vec![RateField::renamed(
                CONTEXT_SWITCHES,
                "ctx_switches",
            )]),
            last_ticks: None,
        }
    }

    /// Rates and mode shares since the previous call; commits the new baseline.
    fn kernel_fields(&mut self, record: &mut Record) -> Result<(), ProviderError> {
        let stats = KernelStats::current()?;
        let rates = self
            .switches
            .advance(CounterSnapshot::now([(CONTEXT_SWITCHES, stats.ctxt)]))?;
        for (field, value) in rates {
            record.insert(field, Value::from(value));
        }

        let ticks = ModeTicks::from(&stats);
        if let Some(previous) = self.last_ticks.replace(ticks) {
            for (mode, share) in ticks.percentages_since(&previous) {
                record.insert(mode.to_string(), json!(share));
            }
        }
        Ok(())
    }

    fn sample(&mut self) -> CpuSample {
        self.system.refresh_cpu_all();
        let cpus = self.system.cpus();
        CpuSample {
            usage: cpus.iter().map(|cpu| cpu.cpu_usage()).collect(),
            freq: cpus.iter().map(|cpu| cpu.frequency()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl Provider for CpuProvider {
    fn name(&self) -> &str {
        "cpu"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
            .with_poll()
            .with_async_init()
            .with_init_fetch()
    }

    async fn async_init(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        // usage is computed between refreshes; take the first one now
        self.system.refresh_cpu_all();
        if self.system.cpus().is_empty() {
            return Err(ProviderError::Unavailable("no CPUs detected".to_string()));
        }
        Ok(())
    }

    async fn init_fetch(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        let stats = KernelStats::current()?;
        self.switches
            .seed(CounterSnapshot::now([(CONTEXT_SWITCHES, stats.ctxt)]));
        self.last_ticks = Some(ModeTicks::from(&stats));
        Ok(())
    }

    async fn poll_stats(&mut self, ctx: &CycleContext) -> Result<(), ProviderError> {
        self.samples.clear();
        loop {
            let sample = self.sample();
            self.samples.push(sample);
            if !ctx.next_sample(self.time_needed()).await {
                break;
            }
        }
        Ok(())
    }

    async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
        if self.samples.is_empty() {
            let sample = self.sample();
            self.samples.push(sample);
        }
        let samples = std::mem::take(&mut self.samples);
        let mut record = summarise(&samples);
        self.kernel_fields(&mut record)?;
        Ok(StatsOutput::Single(record))
    }
}

/// Mean per core (`cpu{N}`, `cpu{N}_freq` in Hz) plus the overall `util`.
fn summarise(samples: &[CpuSample]) -> Record {
    let mut record = Map::new();
    record.insert("measurement".to_string(), json!("cpu"));

    let cores = samples.iter().map(|s| s.usage.len()).min().unwrap_or(0);
    if cores == 0 {
        return record;
    }

    let mut overall = 0.0;
    for core in 0..cores {
        let usage = mean(samples.iter().map(|s| f64::from(s.usage[core])));
        let freq_mhz = mean(samples.iter().filter_map(|s| s.freq.get(core)).map(|f| *f as f64));
        overall += usage;
        record.insert(format!("cpu{core}"), json!(round1(usage)));
        record.insert(
            format!("cpu{core}_freq"),
            Value::from((freq_mhz * 1_000_000.0).round() as i64),
        );
    }
    record.insert("util".to_string(), json!(round1(overall / cores as f64)));
    record
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarise_averages_samples() {
        let samples = vec![
            CpuSample {
                usage: vec![10.0, 50.0],
                freq: vec![1000, 2000],
            },
            CpuSample {
                usage: vec![20.0, 70.0],
                freq: vec![3000, 2000],
            },
        ];
        let record = summarise(&samples);
        assert_eq!(record["measurement"], "cpu");
        assert_eq!(record["cpu0"], 15.0);
        assert_eq!(record["cpu1"], 60.0);
        assert_eq!(record["cpu0_freq"], 2_000_000_000i64);
        assert_eq!(record["util"], 37.5);
    }

    #[test]
    fn test_mode_percentages() {
        let previous = ModeTicks {
            user: 100,
            idle: 800,
            ..ModeTicks::default()
        };
        let now = ModeTicks {
            user: 130,
            system: 10,
            idle: 850,
            iowait: 10,
            ..ModeTicks::default()
        };
        let shares: std::collections::BTreeMap<_, _> =
            now.percentages_since(&previous).into_iter().collect();
        assert_eq!(shares["user"], 30.0);
        assert_eq!(shares["system"], 10.0);
        assert_eq!(shares["iowait"], 10.0);
        assert_eq!(shares["nice"], 0.0);
    }

    #[test]
    fn test_mode_percentages_without_elapsed_ticks() {
        let ticks = ModeTicks {
            user: 5,
            ..ModeTicks::default()
        };
        for (_, share) in ticks.percentages_since(&ticks) {
            assert_eq!(share, 0.0);
        }
    }

    #[test]
    fn test_summarise_without_samples_has_no_fields() {
        let record = summarise(&[]);
        assert_eq!(record.len(), 1);
    }

    #[tokio::test]
    async fn test_get_stats_reports_util() {
        let mut provider = CpuProvider::new();
        let ctx = CycleContext::new(
            chrono::Utc::now(),
            std::time::Duration::from_secs(1),
            crate::scheduler::Clock::new(),
        );
        provider.async_init(&ctx).await.unwrap();
        provider.init_fetch(&ctx).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let records = provider.get_stats(&ctx).await.unwrap().into_records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert!(record.contains_key("util"));
        assert!(record["ctx_switches"].as_i64().unwrap() >= 0);
        for mode in ["user", "system", "iowait", "nice", "irq", "softirq"] {
            assert!(record.contains_key(mode), "{mode}");
        }
    }

    #[tokio::test]
    async fn test_get_stats_without_baseline_fails() {
        let ctx = CycleContext::new(
            chrono::Utc::now(),
            std::time::Duration::from_secs(1),
            crate::scheduler::Clock::new(),
        );
        let err = CpuProvider::new().get_stats(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Rate(crate::provider::rate::RateError::NotSeeded)
        ));
    }
}
