use std::collections::HashSet;
use std::time::SystemTime;

use tracing::{debug_span, warn};

use super::history::CpuHistory;
use super::platform::{HostConfig, ProcessDataProvider, SystemDataProvider};
use super::process::{ProcessInfo, ProcessState, build_process_tree_from_flat};
use super::snapshot::{CpuSample, DataSnapshot, SystemTotals};

/// Output of one collection tick.
pub struct Tick {
    pub snapshot: DataSnapshot,
    pub errors: Vec<String>,
}

/// Turns two raw providers into fully built snapshots. Single-threaded: the
/// CPU history lives here and needs no lock.
pub struct Collector {
    processes: Box<dyn ProcessDataProvider>,
    system: Box<dyn SystemDataProvider>,
    history: CpuHistory,
    previous_cpu: Option<CpuSample>,
}

/// `(cpu_percent, total_cpu_percent)` for a process that used `process_delta`
/// ticks while the whole machine accumulated `system_delta`.
pub fn cpu_percentages(process_delta: u64, system_delta: u64, cores: usize) -> (f64, f64) {
    if system_delta == 0 {
        return (0.0, 0.0);
    }
    let total = process_delta as f64 / system_delta as f64 * 100.0;
    (total * cores.max(1) as f64, total)
}

impl Collector {
    pub fn new(processes: Box<dyn ProcessDataProvider>, system: Box<dyn SystemDataProvider>) -> Self {
        Collector {
            processes,
            system,
            history: CpuHistory::new(),
            previous_cpu: None,
        }
    }

    pub fn host(&self) -> &HostConfig {
        self.system.host()
    }

    pub fn history(&self) -> &CpuHistory {
        &self.history
    }

    pub fn refresh(&mut self) -> Tick {
        let _refresh_span = debug_span!("collector.refresh").entered();
        let mut errors = Vec::new();

        let cpu = self.system.cpu_times().unwrap_or_else(|err| {
            warn!("Failed to read CPU times: {err}");
            errors.push(err.to_string());
            CpuSample::default()
        });
        let scan = self.processes.all_processes();
        errors.extend(scan.errors);

        let previous = self.previous_cpu.take();
        let system_delta = previous
            .as_ref()
            .map(|prev| cpu.total.total().saturating_sub(prev.total.total()))
            .unwrap_or(0);
        let cores = if cpu.cores.is_empty() {
            self.host().num_cpus
        } else {
            cpu.cores.len()
        };

        let mut processes = scan.processes;
        let mut alive = HashSet::with_capacity(processes.len());
        for process in &mut processes {
            alive.insert(process.pid);
            let ticks = process.user_ticks.saturating_add(process.kernel_ticks);
            let delta = self.history.record(process.pid, process.start_ticks, ticks);
            let (cpu_percent, total_cpu_percent) = match delta {
                Some(delta) => cpu_percentages(delta, system_delta, cores),
                None => (0.0, 0.0),
            };
            process.cpu_percent = cpu_percent;
            process.total_cpu_percent = total_cpu_percent;
        }
        self.history.retain_seen(&alive);

        let totals = self.system_totals(&processes, &cpu, previous.as_ref(), &mut errors);
        let tree = {
            let _tree_span = debug_span!("collector.build_tree").entered();
            build_process_tree_from_flat(processes)
        };
        self.previous_cpu = Some(cpu);

        Tick {
            snapshot: DataSnapshot {
                tree,
                totals,
                timestamp: SystemTime::now(),
            },
            errors,
        }
    }

    fn system_totals(
        &self,
        processes: &[ProcessInfo],
        cpu: &CpuSample,
        previous: Option<&CpuSample>,
        errors: &mut Vec<String>,
    ) -> SystemTotals {
        let (cpu_usage_percent, per_core_usage) = match previous {
            Some(prev) => (
                cpu.total.usage_since(&prev.total),
                cpu.cores
                    .iter()
                    .enumerate()
                    .map(|(i, core)| prev.cores.get(i).map_or(0.0, |p| core.usage_since(p)))
                    .collect(),
            ),
            None => (0.0, vec![0.0; cpu.cores.len()]),
        };

        let memory = self.system.memory().unwrap_or_else(|err| {
            warn!("Failed to read memory info: {err}");
            errors.push(err.to_string());
            Default::default()
        });
        let load_average = self.system.load_average().unwrap_or_else(|err| {
            warn!("Failed to read load average: {err}");
            errors.push(err.to_string());
            Default::default()
        });
        let uptime_seconds = self.system.uptime().unwrap_or_else(|err| {
            warn!("Failed to read uptime: {err}");
            errors.push(err.to_string());
            0.0
        });

        SystemTotals {
            process_count: processes.len(),
            thread_count: processes.iter().map(|p| u64::from(p.threads)).sum(),
            running_count: processes
                .iter()
                .filter(|p| p.state == ProcessState::Running)
                .count(),
            cpu_usage_percent,
            per_core_usage,
            memory_total: memory.total,
            memory_used: memory.used(),
            memory_available: memory.available,
            swap_total: memory.swap_total,
            swap_used: memory.swap_used(),
            load_average,
            uptime_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_formula() {
        // 50 of 400 machine ticks on a 4-core box: 12.5% of the machine,
        // 50% of one core.
        let (per_core, total) = cpu_percentages(50, 400, 4);
        assert!((total - 12.5).abs() < 1e-9);
        assert!((per_core - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_system_delta_is_zero() {
        assert_eq!(cpu_percentages(10, 0, 8), (0.0, 0.0));
    }
}
