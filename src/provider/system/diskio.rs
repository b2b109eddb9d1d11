//! Block device throughput as per-second rates, from `/proc/diskstats`.

use std::path::Path;

use serde_json::{Map, Value, json};

use crate::provider::rate::{CounterSnapshot, DeltaRate, RateField};
use crate::provider::{Capabilities, CycleContext, Provider, ProviderError, StatsOutput};

/// `/proc/diskstats` counts 512-byte sectors regardless of the device.
const SECTOR_SIZE: u64 = 512;

const SECTORS_READ: &str = "sectors_read";
const READS: &str = "reads";
const SECTORS_WRITTEN: &str = "sectors_written";
const WRITES: &str = "writes";

/// Counters of one device line.
#[derive(Debug, Clone, Default, PartialEq)]
struct DeviceCounters {
    name: String,
    sectors_read: u64,
    reads: u64,
    sectors_written: u64,
    writes: u64,
}

/// Sum counters over whole disks only, so partitions are not counted twice.
fn totals<'a>(
    devices: impl IntoIterator<Item = &'a DeviceCounters>,
    is_disk: impl Fn(&str) -> bool,
) -> CounterSnapshot {
    let mut sums = [0u64; 4];
    for device in devices.into_iter().filter(|d| is_disk(&d.name)) {
        sums[0] += device.sectors_read;
        sums[1] += device.reads;
        sums[2] += device.sectors_written;
        sums[3] += device.writes;
    }
    CounterSnapshot::now([
        (SECTORS_READ, sums[0]),
        (READS, sums[1]),
        (SECTORS_WRITTEN, sums[2]),
        (WRITES, sums[3]),
    ])
}

/// Partitions have no entry of their own under `/sys/block`.
fn is_whole_disk(name: &str) -> bool {
    Path::new("/sys/block").join(name).exists()
}

pub struct DiskIoProvider {
    rate: DeltaRate,
}

impl Default for DiskIoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskIoProvider {
    pub fn new() -> Self {
        Self {
            rate: DeltaRate::new(vec![
                RateField::renamed(SECTORS_READ, "read_bytes").with_multiplier(SECTOR_SIZE as f64),
                RateField::renamed(READS, "disk_reads"),
                RateField::renamed(SECTORS_WRITTEN, "write_bytes")
                    .with_multiplier(SECTOR_SIZE as f64),
                RateField::renamed(WRITES, "disk_writes"),
            ]),
        }
    }

    fn snapshot(&self) -> Result<CounterSnapshot, ProviderError> {
        let devices: Vec<DeviceCounters> = procfs::diskstats()?
            .into_iter()
            .map(|stat| DeviceCounters {
                name: stat.name,
                sectors_read: stat.sectors_read as u64,
                reads: stat.reads as u64,
                sectors_written: stat.sectors_written as u64,
                writes: stat.writes as u64,
            })
            .collect();
        Ok(totals(&devices, is_whole_disk))
    }
}

#[async_trait::async_trait]
impl Provider for DiskIoProvider {
    fn name(&self) -> &str {
        "diskio"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default().with_init_fetch()
    }

    async fn init_fetch(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        let baseline = self.snapshot()?;
        self.rate.seed(baseline);
        Ok(())
    }

    async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
        let snapshot = self.snapshot()?;
        let rates = self.rate.advance(snapshot)?;

        let mut record = Map::new();
        record.insert("measurement".to_string(), json!("diskio"));
        for (field, value) in rates {
            record.insert(field, Value::from(value));
        }
        Ok(StatsOutput::Single(record))
    }
}
