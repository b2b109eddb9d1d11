//! Usage of configured mount points.

use std::path::Path;

use serde_json::{Value, json};
use sysinfo::Disks;

use super::percent;
use crate::provider::{Capabilities, CycleContext, Provider, ProviderError, StatsOutput};

/// One record per configured mount path, tagged `path`.
pub struct DiskProvider {
    paths: Vec<String>,
    disks: Disks,
}

impl DiskProvider {
    pub fn new(paths: Vec<String>) -> Self {
        Self {
            paths,
            disks: Disks::new(),
        }
    }

    fn usage(&self, path: &str) -> Option<(u64, u64)> {
        self.disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == Path::new(path))
            .map(|disk| {
                let total = disk.total_space();
                (total, total.saturating_sub(disk.available_space()))
            })
    }
}

#[async_trait::async_trait]
impl Provider for DiskProvider {
    fn name(&self) -> &str {
        "disk"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default().with_async_init()
    }

    /// Reject paths that are not mount points.
    async fn async_init(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        self.disks = Disks::new_with_refreshed_list();
        for path in &self.paths {
            if self.usage(path).is_none() {
                return Err(ProviderError::Unavailable(format!(
                    "'{path}' is not a mount point"
                )));
            }
        }
        tracing::debug!(paths = ?self.paths, "Disk paths validated");
        Ok(())
    }

    async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
        self.disks.refresh();

        let mut records = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let Some((total, used)) = self.usage(path) else {
                tracing::warn!(path = %path, "Mount point disappeared");
                continue;
            };
            records.push(json!({
                "measurement": "disk",
                "tags": {"path": path},
                "total": total,
                "used": used,
                "percent": percent(used, total),
            }));
        }
        StatsOutput::try_from(Value::Array(records))
    }
}
