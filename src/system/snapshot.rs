use std::time::SystemTime;

use serde::Serialize;

use super::process::ProcessTree;

/// Raw cumulative CPU tick counters from one `cpu` line of `/proc/stat`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        [
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
        .into_iter()
        .fold(self.user, u64::saturating_add)
    }

    /// Every non-idle category, iowait included.
    pub fn active(&self) -> u64 {
        self.total().saturating_sub(self.idle)
    }

    /// Busy share between two samples, in percent. `0.0` when no ticks elapsed.
    pub fn usage_since(&self, previous: &CpuTimes) -> f64 {
        let total = self.total().saturating_sub(previous.total());
        if total == 0 {
            return 0.0;
        }
        let active = self.active().saturating_sub(previous.active());
        (active as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Aggregate `cpu` line plus one entry per `cpuN` line.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CpuSample {
    pub total: CpuTimes,
    pub cores: Vec<CpuTimes>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
    pub free: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

impl MemoryInfo {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    pub fn swap_used(&self) -> u64 {
        self.swap_total.saturating_sub(self.swap_free)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SystemTotals {
    pub process_count: usize,
    pub thread_count: u64,
    pub running_count: usize,
    pub cpu_usage_percent: f64,
    pub per_core_usage: Vec<f64>,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub load_average: LoadAverage,
    pub uptime_seconds: f64,
}

/// One fully built point-in-time capture. Never mutated once published.
#[derive(Clone, Debug, Serialize)]
pub struct DataSnapshot {
    pub tree: ProcessTree,
    pub totals: SystemTotals,
    pub timestamp: SystemTime,
}

impl Default for DataSnapshot {
    fn default() -> Self {
        DataSnapshot {
            tree: ProcessTree::default(),
            totals: SystemTotals::default(),
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }
}
