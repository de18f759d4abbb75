use std::collections::{HashMap, HashSet};

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ProcessState {
    Running,
    Sleeping,
    DiskWait,
    Zombie,
    Stopped,
    Idle,
    #[default]
    Unknown,
}

impl ProcessState {
    /// Maps the single-letter state code used by `/proc/<pid>/stat`.
    pub fn from_code(code: char) -> Self {
        match code {
            'R' => ProcessState::Running,
            'S' => ProcessState::Sleeping,
            'D' => ProcessState::DiskWait,
            'Z' => ProcessState::Zombie,
            'T' | 't' => ProcessState::Stopped,
            'I' => ProcessState::Idle,
            _ => ProcessState::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProcessState::Running => "Running",
            ProcessState::Sleeping => "Sleeping",
            ProcessState::DiskWait => "Disk Wait",
            ProcessState::Zombie => "Zombie",
            ProcessState::Stopped => "Stopped",
            ProcessState::Idle => "Idle",
            ProcessState::Unknown => "Unknown",
        }
    }
}

/// One process as sampled from the kernel.
///
/// `user_ticks` and `kernel_ticks` are cumulative counters and only mean
/// something as a delta between two samples of the same pid.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub command: String,
    pub exe_path: String,
    pub state: ProcessState,
    /// Empty, and `uid` is `None`, when `status` could not be read.
    pub user: String,
    pub uid: Option<u32>,
    pub cpu_percent: f64,
    pub total_cpu_percent: f64,
    pub memory_bytes: u64,
    pub virtual_bytes: u64,
    pub memory_percent: f64,
    pub threads: u32,
    pub priority: i64,
    pub nice: i64,
    /// Seconds since the UNIX epoch.
    pub start_time: u64,
    pub start_ticks: u64,
    pub user_ticks: u64,
    pub kernel_ticks: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessNode {
    pub info: ProcessInfo,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub subtree_memory: u64,
    pub subtree_memory_percent: f64,
    pub subtree_cpu_percent: f64,
    pub subtree_total_cpu_percent: f64,
}

impl ProcessNode {
    fn new(info: ProcessInfo) -> Self {
        ProcessNode {
            subtree_memory: info.memory_bytes,
            subtree_memory_percent: info.memory_percent,
            subtree_cpu_percent: info.cpu_percent,
            subtree_total_cpu_percent: info.total_cpu_percent,
            info,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Arena of process nodes keyed by pid. The map doubles as the pid index.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProcessTree {
    pub nodes: HashMap<u32, ProcessNode>,
    pub roots: Vec<u32>,
}

pub fn build_process_tree_from_flat(processes: Vec<ProcessInfo>) -> ProcessTree {
    let mut nodes = HashMap::with_capacity(processes.len());
    for info in processes {
        nodes.insert(info.pid, ProcessNode::new(info));
    }

    let mut pids: Vec<u32> = nodes.keys().copied().collect();
    pids.sort_unstable();

    // Candidate links from pid/ppid only; pids are sorted so every child list is too.
    let mut candidates: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut roots = Vec::new();
    for &pid in &pids {
        let ppid = nodes.get(&pid).map(|n: &ProcessNode| n.info.ppid).unwrap_or(pid);
        if ppid == pid || !nodes.contains_key(&ppid) {
            roots.push(pid);
        } else {
            candidates.entry(ppid).or_default().push(pid);
        }
    }

    let mut attached = HashSet::with_capacity(pids.len());
    for &root in &roots {
        attach_subtree(root, &candidates, &mut nodes, &mut attached);
    }

    // Whatever is still detached sits on a parent cycle. Promote the lowest pid
    // of each cycle to a root so nothing is dropped.
    for &pid in &pids {
        if !attached.contains(&pid) {
            roots.push(pid);
            attach_subtree(pid, &candidates, &mut nodes, &mut attached);
        }
    }
    roots.sort_unstable();

    let mut tree = ProcessTree { nodes, roots };
    tree.compute_aggregates();
    tree
}

fn attach_subtree(
    root: u32,
    candidates: &HashMap<u32, Vec<u32>>,
    nodes: &mut HashMap<u32, ProcessNode>,
    attached: &mut HashSet<u32>,
) {
    attached.insert(root);
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        let Some(kids) = candidates.get(&pid) else {
            continue;
        };
        for &child in kids {
            if !attached.insert(child) {
                continue;
            }
            if let Some(node) = nodes.get_mut(&child) {
                node.parent = Some(pid);
            }
            if let Some(node) = nodes.get_mut(&pid) {
                node.children.push(child);
            }
            stack.push(child);
        }
    }
}

impl ProcessTree {
    pub fn get(&self, pid: u32) -> Option<&ProcessNode> {
        self.nodes.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every reachable pid, parents before children, siblings by pid.
    pub fn preorder(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<u32> = self.roots.iter().rev().copied().collect();
        while let Some(pid) = stack.pop() {
            out.push(pid);
            if let Some(node) = self.nodes.get(&pid) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Recompute subtree totals bottom-up. Reverse pre-order visits every child
    /// before its parent, so no recursion is needed.
    pub fn compute_aggregates(&mut self) {
        for pid in self.preorder().into_iter().rev() {
            let Some(node) = self.nodes.get(&pid) else {
                continue;
            };
            let mut memory = node.info.memory_bytes;
            let mut memory_percent = node.info.memory_percent;
            let mut cpu = node.info.cpu_percent;
            let mut total_cpu = node.info.total_cpu_percent;
            for child in node.children.iter().filter_map(|c| self.nodes.get(c)) {
                memory = memory.saturating_add(child.subtree_memory);
                memory_percent += child.subtree_memory_percent;
                cpu += child.subtree_cpu_percent;
                total_cpu += child.subtree_total_cpu_percent;
            }
            if let Some(node) = self.nodes.get_mut(&pid) {
                node.subtree_memory = memory;
                node.subtree_memory_percent = memory_percent;
                node.subtree_cpu_percent = cpu;
                node.subtree_total_cpu_percent = total_cpu;
            }
        }
    }

    /// All descendants of `pid` in pre-order, excluding `pid` itself.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let Some(node) = self.nodes.get(&pid) else {
            return out;
        };
        let mut stack: Vec<u32> = node.children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Rows a tree view would show: `(pid, depth)` in pre-order, with the
    /// children of collapsed pids left out.
    pub fn visible_pids(&self, collapsed: &HashSet<u32>) -> Vec<(u32, usize)> {
        let mut out = Vec::new();
        let mut stack: Vec<(u32, usize)> = self.roots.iter().rev().map(|&p| (p, 0)).collect();
        while let Some((pid, depth)) = stack.pop() {
            out.push((pid, depth));
            if collapsed.contains(&pid) {
                continue;
            }
            if let Some(node) = self.nodes.get(&pid) {
                stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
            }
        }
        out
    }
}
