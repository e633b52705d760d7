//! Host health figures carried in the heartbeat.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::{Components, Disks, System};

/// SoC temperature on Raspberry Pi boards, in millidegrees Celsius.
const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// One sample of host resource usage. Sizes are bytes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_percent: f32,
    pub disk_total: u64,
    pub disk_used: u64,
    pub disk_free: u64,
    pub disk_percent: f32,
    /// Degrees Celsius, when the board exposes a sensor.
    pub temperature: Option<f32>,
    pub uptime_secs: u64,
}

/// Samples [`SystemMetrics`].
///
/// CPU usage is measured between two refreshes, so the sampler keeps its `System`
/// and the first sample after start reads as idle.
pub struct SystemSampler {
    system: System,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }

    pub fn sample(&mut self) -> SystemMetrics {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        let cpu_percent = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };
        let memory_total = self.system.total_memory();
        let memory_used = self.system.used_memory();
        let (disk_total, disk_free) = root_disk();
        let disk_used = disk_total.saturating_sub(disk_free);

        SystemMetrics {
            cpu_percent,
            memory_total,
            memory_used,
            memory_percent: percent(memory_used, memory_total),
            disk_total,
            disk_used,
            disk_free,
            disk_percent: percent(disk_used, disk_total),
            temperature: read_temperature(),
            uptime_secs: System::uptime(),
        }
    }
}

fn percent(part: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 100.0) as f32
    }
}

/// Total and available bytes of the root filesystem.
fn root_disk() -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| (disk.total_space(), disk.available_space()))
        .unwrap_or((0, 0))
}

/// Board temperature: the Pi thermal zone first, then any sensor sysinfo knows.
pub fn read_temperature() -> Option<f32> {
    if let Some(celsius) = std::fs::read_to_string(THERMAL_ZONE)
        .ok()
        .and_then(|raw| parse_millidegrees(&raw))
    {
        return Some(celsius);
    }
    let components = Components::new_with_refreshed_list();
    components.iter().find_map(|component| component.temperature())
}

fn parse_millidegrees(raw: &str) -> Option<f32> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .map(|milli| milli as f32 / 1000.0)
}
