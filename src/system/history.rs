use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug)]
struct CpuEntry {
    start_ticks: u64,
    ticks: u64,
}

/// Previous-tick CPU counters per pid, owned by the collector thread.
#[derive(Debug, Default)]
pub struct CpuHistory {
    entries: HashMap<u32, CpuEntry>,
}

impl CpuHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the current `user + kernel` ticks for `pid` and return the delta
    /// since the previous call. `None` for a pid seen for the first time, or
    /// whose start time changed because the pid was recycled.
    pub fn record(&mut self, pid: u32, start_ticks: u64, ticks: u64) -> Option<u64> {
        let previous = self.entries.insert(pid, CpuEntry { start_ticks, ticks })?;
        (previous.start_ticks == start_ticks).then(|| ticks.saturating_sub(previous.ticks))
    }

    /// Remove entries for pids that were not observed in the latest tick.
    pub fn retain_seen(&mut self, alive_pids: &HashSet<u32>) {
        self.entries.retain(|pid, _| alive_pids.contains(pid));
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.entries.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_has_no_delta() {
        let mut history = CpuHistory::new();
        assert_eq!(history.record(1, 10, 500), None);
        assert_eq!(history.record(1, 10, 650), Some(150));
    }

    #[test]
    fn recycled_pid_starts_over() {
        let mut history = CpuHistory::new();
        history.record(7, 100, 5000);
        assert_eq!(history.record(7, 900, 20), None);
        assert_eq!(history.record(7, 900, 30), Some(10));
    }

    #[test]
    fn counter_going_backwards_saturates() {
        let mut history = CpuHistory::new();
        history.record(3, 1, 100);
        assert_eq!(history.record(3, 1, 90), Some(0));
    }

    #[test]
    fn retain_removes_dead_pids() {
        let mut history = CpuHistory::new();
        history.record(1, 0, 100);
        history.record(2, 0, 200);
        history.record(3, 0, 300);

        let alive: HashSet<u32> = [1, 3].into_iter().collect();
        history.retain_seen(&alive);

        assert!(history.contains(1));
        assert!(!history.contains(2));
        assert!(history.contains(3));
        assert_eq!(history.len(), 2);
    }
}
