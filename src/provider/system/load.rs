//! Load averages, process count and uptime.

use serde_json::{Map, Value, json};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use crate::provider::{CycleContext, Provider, ProviderError, StatsOutput};

pub struct LoadProvider {
    system: System,
}

impl Default for LoadProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Number of live processes; only the process list is refreshed.
    fn count_processes(&mut self) -> usize {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new(),
        );
        self.system.processes().len()
    }
}

#[async_trait::async_trait]
impl Provider for LoadProvider {
    fn name(&self) -> &str {
        "misc"
    }

    async fn get_stats(&mut self, ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
        let load = System::load_average();
        let uptime = ctx.target_time().timestamp() - System::boot_time() as i64;

        let mut record = Map::new();
        record.insert("measurement".to_string(), json!("misc"));
        record.insert("load_1".to_string(), json!(load.one));
        record.insert("load_5".to_string(), json!(load.five));
        record.insert("load_15".to_string(), json!(load.fifteen));
        record.insert("uptime".to_string(), Value::from(uptime.max(0)));
        record.insert(
            "processes".to_string(),
            Value::from(self.count_processes() as u64),
        );
        Ok(StatsOutput::Single(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Clock;
    use std::time::Duration;

    #[tokio::test]
    async fn test_uptime_measured_from_target_time() {
        let ctx = CycleContext::new(chrono::Utc::now(), Duration::from_secs(1), Clock::new());
        let records = LoadProvider::new().get_stats(&ctx).await.unwrap().into_records();
        let record = &records[0];
        assert_eq!(record["measurement"], "misc");
        assert!(record["uptime"].as_i64().unwrap() >= 0);
        assert!(record.contains_key("load_1"));
    }

    #[tokio::test]
    async fn test_process_count_includes_this_process() {
        let ctx = CycleContext::new(chrono::Utc::now(), Duration::from_secs(1), Clock::new());
        let mut provider = LoadProvider::new();
        let records = provider.get_stats(&ctx).await.unwrap().into_records();
        assert!(records[0]["processes"].as_u64().unwrap() >= 1);

        // a second refresh reuses the same table
        assert!(provider.count_processes() >= 1);
    }
}
