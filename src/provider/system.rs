//! Built-in host providers backed by `sysinfo`.
//!
//! | provider  | measurement | kind       |
//! |-----------|-------------|------------|
//! | `cpu`     | `cpu`       | continuous |
//! | `memory`  | `memory`    | point      |
//! | `disk`    | `disk`      | point      |
//! | `diskio`  | `diskio`    | point      |
//! | `netio`   | `netio`     | point      |
//! | `misc`    | `misc`      | point      |
//! | `sensors` | `sensors`   | point      |

mod cpu;
mod disk;
mod diskio;
mod load;
mod memory;
mod network;
mod sensors;

pub use cpu::CpuProvider;
pub use disk::DiskProvider;
pub use diskio::DiskIoProvider;
pub use load::LoadProvider;
pub use memory::MemoryProvider;
pub use network::NetworkProvider;
pub use sensors::SensorsProvider;

use crate::config::ProvidersConfig;
use crate::provider::Provider;

/// Instantiate the providers enabled in `config`, in reporting order.
///
/// The disk provider is skipped when no mount paths are configured.
pub fn default_providers(config: &ProvidersConfig) -> Vec<Box<dyn Provider>> {
    let mut providers: Vec<Box<dyn Provider>> = Vec::new();
    if config.cpu {
        providers.push(Box::new(CpuProvider::new()));
    }
    if config.memory {
        providers.push(Box::new(MemoryProvider::new()));
    }
    if config.disk.enabled && !config.disk.paths.is_empty() {
        providers.push(Box::new(DiskProvider::new(config.disk.paths.clone())));
    }
    if config.diskio {
        providers.push(Box::new(DiskIoProvider::new()));
    }
    if config.network {
        providers.push(Box::new(NetworkProvider::new()));
    }
    if config.load {
        providers.push(Box::new(LoadProvider::new()));
    }
    if config.sensors {
        providers.push(Box::new(SensorsProvider::new()));
    }
    providers
}

/// `part / whole` as a percentage with one decimal.
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round1(part as f64 / whole as f64 * 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
