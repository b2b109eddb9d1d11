//! Physical memory usage.

use serde_json::json;
use sysinfo::System;

use super::percent;
use crate::provider::{CycleContext, Provider, ProviderError, StatsOutput};

pub struct MemoryProvider {
    system: System,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

#[async_trait::async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProviderError::Unavailable(
                "total memory reported as zero".to_string(),
            ));
        }
        let used = total.saturating_sub(self.system.available_memory());

        StatsOutput::try_from(json!({
            "measurement": "memory",
            "total": total,
            "used": used,
            "percent": percent(used, total),
        }))
    }
}
