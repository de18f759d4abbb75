use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::platform::ProcessControl;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Signal 0: checks that the pid exists without delivering anything.
    Probe,
    Terminate,
    Kill,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Probe => "signal 0",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
pub enum KillError {
    #[error("permission denied for PID {pid} (try running with elevated privileges)")]
    PermissionDenied { pid: u32 },
    #[error("process {pid} not found")]
    NotFound { pid: u32 },
    #[error("invalid signal for PID {pid}")]
    InvalidSignal { pid: u32 },
    #[error("{pid} is not a valid process id")]
    InvalidPid { pid: u32 },
    #[error("failed to signal PID {pid}: {message}")]
    Other { pid: u32, message: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KillResult {
    pub success: bool,
    /// Set when the process survived a graceful signal; a forced retry may help.
    pub process_still_running: bool,
    pub error: Option<KillError>,
}

impl KillResult {
    fn delivered(still_running: bool) -> Self {
        KillResult {
            success: true,
            process_still_running: still_running,
            error: None,
        }
    }

    fn failed(error: KillError, still_running: bool) -> Self {
        KillResult {
            success: false,
            process_still_running: still_running,
            error: Some(error),
        }
    }

    pub fn error_message(&self) -> String {
        self.error.as_ref().map(ToString::to_string).unwrap_or_default()
    }
}

/// Terminates processes and whole subtrees. The topology is always re-read
/// from the live process table, never taken from a snapshot.
pub struct ProcessKiller<C> {
    control: C,
    grace_period: Duration,
}

impl<C: ProcessControl> ProcessKiller<C> {
    pub fn new(control: C) -> Self {
        Self::with_grace_period(control, DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(control: C, grace_period: Duration) -> Self {
        ProcessKiller {
            control,
            grace_period,
        }
    }

    pub fn kill_process(&self, pid: u32, force: bool) -> KillResult {
        let signal = if force { Signal::Kill } else { Signal::Terminate };
        match self.control.send_signal(pid, signal) {
            Ok(()) => self.confirm(pid, force),
            Err(KillError::NotFound { .. }) => {
                debug!("PID {pid} already gone");
                KillResult::delivered(false)
            }
            Err(err) => {
                warn!("Failed to send {} to PID {pid}: {err}", signal.name());
                KillResult::failed(err, self.control.is_alive(pid))
            }
        }
    }

    pub fn kill_process_tree(&self, pid: u32, force: bool) -> KillResult {
        let signal = if force { Signal::Kill } else { Signal::Terminate };
        let order = kill_order(pid, &self.control.parent_table());
        debug!("Killing tree of PID {pid}: {order:?}");

        let mut first_error = None;
        for &target in &order {
            match self.control.send_signal(target, signal) {
                Ok(()) | Err(KillError::NotFound { .. }) => {}
                Err(err) => {
                    warn!("Failed to send {} to PID {target}: {err}", signal.name());
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => KillResult::failed(err, self.control.is_alive(pid)),
            None => self.confirm(pid, force),
        }
    }

    fn confirm(&self, pid: u32, force: bool) -> KillResult {
        if force {
            return KillResult::delivered(false);
        }
        if !self.grace_period.is_zero() {
            thread::sleep(self.grace_period);
        }
        KillResult::delivered(self.control.is_alive(pid))
    }
}

/// Post-order kill sequence for `root`'s subtree: deepest descendants first,
/// `root` last. `table` holds `(pid, ppid)` pairs from a live scan.
pub fn kill_order(root: u32, table: &[(u32, u32)]) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, ppid) in table {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }

    let mut subtree = HashSet::from([root]);
    let mut frontier = vec![root];
    while let Some(pid) = frontier.pop() {
        for &child in children.get(&pid).into_iter().flatten() {
            if subtree.insert(child) {
                frontier.push(child);
            }
        }
    }

    // Only edges inside the subtree; a recycled pid elsewhere cannot pull in strangers.
    let restricted: HashMap<u32, Vec<u32>> = children
        .into_iter()
        .filter(|(parent, _)| subtree.contains(parent))
        .map(|(parent, mut kids)| {
            kids.retain(|kid| subtree.contains(kid));
            kids.sort_unstable();
            (parent, kids)
        })
        .collect();

    let mut order = Vec::with_capacity(subtree.len());
    let mut visited = HashSet::with_capacity(subtree.len());
    let mut stack = vec![(root, false)];
    while let Some((pid, children_done)) = stack.pop() {
        if children_done {
            order.push(pid);
            continue;
        }
        if !visited.insert(pid) {
            continue;
        }
        stack.push((pid, true));
        for &kid in restricted.get(&pid).into_iter().flatten().rev() {
            if !visited.contains(&kid) {
                stack.push((kid, false));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakeControl {
        table: Vec<(u32, u32)>,
        alive: RefCell<HashSet<u32>>,
        denied: HashSet<u32>,
        ignores_term: HashSet<u32>,
        sent: RefCell<Vec<(u32, Signal)>>,
    }

    impl FakeControl {
        fn with_tree(table: &[(u32, u32)]) -> Self {
            FakeControl {
                table: table.to_vec(),
                alive: RefCell::new(table.iter().map(|&(pid, _)| pid).collect()),
                ..Default::default()
            }
        }
    }

    impl ProcessControl for FakeControl {
        fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), KillError> {
            if !self.alive.borrow().contains(&pid) {
                return Err(KillError::NotFound { pid });
            }
            if self.denied.contains(&pid) {
                return Err(KillError::PermissionDenied { pid });
            }
            self.sent.borrow_mut().push((pid, signal));
            if signal == Signal::Kill || !self.ignores_term.contains(&pid) {
                self.alive.borrow_mut().remove(&pid);
            }
            Ok(())
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.alive.borrow().contains(&pid)
        }

        fn parent_table(&self) -> Vec<(u32, u32)> {
            self.table
                .iter()
                .filter(|(pid, _)| self.alive.borrow().contains(pid))
                .copied()
                .collect()
        }
    }

    fn killer(control: FakeControl) -> ProcessKiller<FakeControl> {
        ProcessKiller::with_grace_period(control, Duration::ZERO)
    }

    #[test]
    fn tree_kill_signals_deepest_first() {
        // A(10) -> B(20) -> C(30), plus an unrelated process 40 under 1.
        let k = killer(FakeControl::with_tree(&[(1, 0), (10, 1), (20, 10), (30, 20), (40, 1)]));
        let result = k.kill_process_tree(10, false);
        assert!(result.success);
        assert!(!result.process_still_running);
        let sent: Vec<u32> = k.control.sent.borrow().iter().map(|&(pid, _)| pid).collect();
        assert_eq!(sent, vec![30, 20, 10]);
    }

    #[test]
    fn kill_order_is_post_order_with_siblings_by_pid() {
        let table = [(1, 0), (2, 1), (3, 1), (4, 2), (5, 2), (6, 3)];
        assert_eq!(kill_order(1, &table), vec![4, 5, 2, 6, 3, 1]);
        assert_eq!(kill_order(3, &table), vec![6, 3]);
        assert_eq!(kill_order(99, &table), vec![99]);
    }

    #[test]
    fn kill_order_survives_parent_cycles() {
        let table = [(2, 3), (3, 2), (4, 3)];
        let order = kill_order(2, &table);
        assert_eq!(order.len(), 3);
        assert_eq!(*order.last().unwrap(), 2);
    }

    #[test]
    fn gone_process_is_success() {
        let k = killer(FakeControl::with_tree(&[(1, 0)]));
        let single = k.kill_process(777, false);
        assert!(single.success);
        assert!(single.error.is_none());
        let tree = k.kill_process_tree(777, true);
        assert!(tree.success);
        assert!(!tree.process_still_running);
    }

    #[test]
    fn permission_denied_is_reported() {
        let mut control = FakeControl::with_tree(&[(1, 0), (5, 1)]);
        control.denied.insert(5);
        let k = killer(control);
        let result = k.kill_process(5, false);
        assert!(!result.success);
        assert!(result.process_still_running);
        assert_eq!(result.error, Some(KillError::PermissionDenied { pid: 5 }));
        assert!(result.error_message().contains("elevated privileges"));
    }

    #[test]
    fn survivor_of_sigterm_is_flagged_still_running() {
        let mut control = FakeControl::with_tree(&[(1, 0), (8, 1)]);
        control.ignores_term.insert(8);
        let k = killer(control);

        let graceful = k.kill_process(8, false);
        assert!(graceful.success);
        assert!(graceful.process_still_running);

        let forced = k.kill_process(8, true);
        assert!(forced.success);
        assert!(!forced.process_still_running);
        assert_eq!(k.control.sent.borrow().last(), Some(&(8, Signal::Kill)));
    }

    #[test]
    fn tree_kill_continues_past_denied_child() {
        let mut control = FakeControl::with_tree(&[(1, 0), (10, 1), (11, 10), (12, 10)]);
        control.denied.insert(11);
        let k = killer(control);
        let result = k.kill_process_tree(10, true);
        assert!(!result.success);
        assert_eq!(result.error, Some(KillError::PermissionDenied { pid: 11 }));
        let sent: Vec<u32> = k.control.sent.borrow().iter().map(|&(pid, _)| pid).collect();
        assert_eq!(sent, vec![12, 10]);
    }
}
