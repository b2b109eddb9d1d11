//! Network throughput as per-second rates over all interfaces.

use serde_json::{Map, Value, json};
use sysinfo::Networks;

use crate::provider::rate::{CounterSnapshot, DeltaRate, RateField};
use crate::provider::{Capabilities, CycleContext, Provider, ProviderError, StatsOutput};

const BYTES_RECV: &str = "bytes_recv";
const BYTES_SENT: &str = "bytes_sent";
const PACKETS_RECV: &str = "packets_recv";
const PACKETS_SENT: &str = "packets_sent";

pub struct NetworkProvider {
    networks: Networks,
    rate: DeltaRate,
}

impl Default for NetworkProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProvider {
    pub fn new() -> Self {
        Self {
            networks: Networks::new(),
            rate: DeltaRate::new(vec![
                RateField::renamed(BYTES_RECV, "rx_bytes"),
                RateField::renamed(BYTES_SENT, "tx_bytes"),
                RateField::renamed(PACKETS_RECV, "rx_packets"),
                RateField::renamed(PACKETS_SENT, "tx_packets"),
            ]),
        }
    }

    /// Sum the cumulative counters of every interface.
    fn snapshot(&mut self) -> CounterSnapshot {
        self.networks.refresh();
        let mut totals = [0u64; 4];
        for (_name, data) in self.networks.iter() {
            totals[0] += data.total_received();
            totals[1] += data.total_transmitted();
            totals[2] += data.total_packets_received();
            totals[3] += data.total_packets_transmitted();
        }
        CounterSnapshot::now([
            (BYTES_RECV, totals[0]),
            (BYTES_SENT, totals[1]),
            (PACKETS_RECV, totals[2]),
            (PACKETS_SENT, totals[3]),
        ])
    }
}

#[async_trait::async_trait]
impl Provider for NetworkProvider {
    fn name(&self) -> &str {
        "netio"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default().with_init_fetch()
    }

    async fn init_fetch(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        self.networks = Networks::new_with_refreshed_list();
        let baseline = self.snapshot();
        self.rate.seed(baseline);
        Ok(())
    }

    async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
        let snapshot = self.snapshot();
        let rates = self.rate.advance(snapshot)?;

        let mut record = Map::new();
        record.insert("measurement".to_string(), json!("netio"));
        for (field, value) in rates {
            record.insert(field, Value::from(value));
        }
        Ok(StatsOutput::Single(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::rate::RateError;
    use crate::scheduler::Clock;
    use std::time::Duration;

    fn ctx() -> CycleContext {
        CycleContext::new(chrono::Utc::now(), Duration::from_secs(1), Clock::new())
    }

    #[tokio::test]
    async fn test_get_stats_without_baseline_fails() {
        let mut provider = NetworkProvider::new();
        let err = provider.get_stats(&ctx()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rate(RateError::NotSeeded)));
    }

    #[tokio::test]
    async fn test_reports_all_rate_fields() {
        let mut provider = NetworkProvider::new();
        provider.init_fetch(&ctx()).await.unwrap();
        std::thread::sleep(Duration::from_millis(5));

        let records = provider.get_stats(&ctx()).await.unwrap().into_records();
        let record = &records[0];
        for key in ["rx_bytes", "tx_bytes", "rx_packets", "tx_packets"] {
            assert!(record[key].as_i64().unwrap() >= 0, "{key}");
        }
    }
}
