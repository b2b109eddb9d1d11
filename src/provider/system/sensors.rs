//! CPU temperature from hardware sensors.

use serde_json::json;
use sysinfo::Components;

use super::round1;
use crate::provider::{Capabilities, CycleContext, Provider, ProviderError, StatsOutput};

/// Labels that identify a CPU temperature sensor.
const CPU_SENSOR_LABELS: &[&str] = &["coretemp", "k10temp", "cpu", "package", "tctl"];

/// Reports `cpu_temp`; disables itself (null measurement) when no sensor exists.
pub struct SensorsProvider {
    components: Components,
    detected: bool,
}

impl Default for SensorsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorsProvider {
    pub fn new() -> Self {
        Self {
            components: Components::new(),
            detected: false,
        }
    }

    fn cpu_temperature(&self) -> Option<f32> {
        self.components
            .list()
            .iter()
            .filter(|c| is_cpu_sensor(c.label()))
            .map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .reduce(f32::max)
    }
}

fn is_cpu_sensor(label: &str) -> bool {
    let label = label.to_lowercase();
    CPU_SENSOR_LABELS.iter().any(|known| label.contains(known))
}

#[async_trait::async_trait]
impl Provider for SensorsProvider {
    fn name(&self) -> &str {
        "sensors"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default().with_async_init()
    }

    async fn async_init(&mut self, _ctx: &CycleContext) -> Result<(), ProviderError> {
        self.components = Components::new_with_refreshed_list();
        self.detected = self.cpu_temperature().is_some();
        if !self.detected {
            tracing::info!("No CPU temperature sensor found, sensors provider disabled");
        }
        Ok(())
    }

    async fn get_stats(&mut self, _ctx: &CycleContext) -> Result<StatsOutput, ProviderError> {
        if !self.detected {
            return StatsOutput::try_from(json!({"measurement": null}));
        }
        self.components.refresh();
        match self.cpu_temperature() {
            Some(temp) => StatsOutput::try_from(json!({
                "measurement": "sensors",
                "cpu_temp": round1(f64::from(temp)),
            })),
            None => Err(ProviderError::Unavailable(
                "CPU temperature sensor stopped reporting".to_string(),
            )),
        }
    }
}
