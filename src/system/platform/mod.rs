use std::path::PathBuf;

use super::details::{EnvVar, FileHandle, Library, MemoryMap, NetworkConnection, ThreadInfo};
use super::error::ProcError;
use super::kill::{KillError, Signal};
use super::process::ProcessInfo;
use super::snapshot::{CpuSample, LoadAverage, MemoryInfo};

/// Host constants the providers need, detected once and passed in explicitly.
#[derive(Clone, Debug, PartialEq)]
pub struct HostConfig {
    pub proc_root: PathBuf,
    pub page_size: u64,
    /// Kernel ticks per second.
    pub clock_ticks: u64,
    pub num_cpus: usize,
    /// Seconds since the epoch.
    pub boot_time: u64,
    pub total_memory: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            proc_root: PathBuf::from("/proc"),
            page_size: 4096,
            clock_ticks: 100,
            num_cpus: 1,
            boot_time: 0,
            total_memory: 0,
        }
    }
}

/// Result of enumerating every process once.
#[derive(Clone, Debug, Default)]
pub struct ProcessScan {
    pub processes: Vec<ProcessInfo>,
    /// Non-fatal problems worth showing (vanished processes are not reported).
    pub errors: Vec<String>,
}

/// Per-pid kernel data. Every query tolerates the process disappearing and
/// returns an empty result rather than an error.
pub trait ProcessDataProvider: Send {
    fn all_processes(&mut self) -> ProcessScan;
    fn process_info(&mut self, pid: u32) -> Option<ProcessInfo>;
    fn threads(&self, pid: u32) -> Vec<ThreadInfo>;
    fn thread_stack(&self, pid: u32, tid: u32) -> Vec<String>;
    fn file_handles(&self, pid: u32) -> Vec<FileHandle>;
    fn network_connections(&self, pid: u32) -> Vec<NetworkConnection>;
    fn memory_maps(&self, pid: u32) -> Vec<MemoryMap>;
    fn environment(&self, pid: u32) -> Vec<EnvVar>;
    fn libraries(&self, pid: u32) -> Vec<Library>;
}

pub trait SystemDataProvider: Send {
    fn host(&self) -> &HostConfig;
    fn cpu_times(&self) -> Result<CpuSample, ProcError>;
    fn memory(&self) -> Result<MemoryInfo, ProcError>;
    fn load_average(&self) -> Result<LoadAverage, ProcError>;
    fn uptime(&self) -> Result<f64, ProcError>;
}

/// Signal delivery and a live view of the process table.
pub trait ProcessControl {
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), KillError>;
    fn is_alive(&self, pid: u32) -> bool;
    /// `(pid, ppid)` for every process, read fresh on each call.
    fn parent_table(&self) -> Vec<(u32, u32)>;
}

impl<C: ProcessControl + ?Sized> ProcessControl for Box<C> {
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), KillError> {
        (**self).send_signal(pid, signal)
    }

    fn is_alive(&self, pid: u32) -> bool {
        (**self).is_alive(pid)
    }

    fn parent_table(&self) -> Vec<(u32, u32)> {
        (**self).parent_table()
    }
}

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
use linux as platform_impl;

#[cfg(target_os = "linux")]
pub fn detect_host(proc_root: impl Into<PathBuf>) -> Result<HostConfig, ProcError> {
    platform_impl::detect_host(proc_root)
}

#[cfg(not(target_os = "linux"))]
pub fn detect_host(_proc_root: impl Into<PathBuf>) -> Result<HostConfig, ProcError> {
    Err(ProcError::Unsupported)
}

#[cfg(target_os = "linux")]
pub fn host_process_data(host: &HostConfig) -> Result<Box<dyn ProcessDataProvider>, ProcError> {
    Ok(Box::new(platform_impl::LinuxProcessData::new(host.clone())))
}

#[cfg(not(target_os = "linux"))]
pub fn host_process_data(_host: &HostConfig) -> Result<Box<dyn ProcessDataProvider>, ProcError> {
    Err(ProcError::Unsupported)
}

#[cfg(target_os = "linux")]
pub fn host_system_data(host: &HostConfig) -> Result<Box<dyn SystemDataProvider>, ProcError> {
    Ok(Box::new(platform_impl::LinuxSystemData::new(host.clone())))
}

#[cfg(not(target_os = "linux"))]
pub fn host_system_data(_host: &HostConfig) -> Result<Box<dyn SystemDataProvider>, ProcError> {
    Err(ProcError::Unsupported)
}

#[cfg(target_os = "linux")]
pub fn host_control(host: &HostConfig) -> Result<Box<dyn ProcessControl>, ProcError> {
    Ok(Box::new(platform_impl::LinuxControl::new(host.proc_root.clone())))
}

#[cfg(not(target_os = "linux"))]
pub fn host_control(_host: &HostConfig) -> Result<Box<dyn ProcessControl>, ProcError> {
    Err(ProcError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn host_providers_read_current_process() {
        let host = detect_host("/proc").expect("host detection");
        let mut processes = host_process_data(&host).expect("process provider");
        let system = host_system_data(&host).expect("system provider");

        let me = processes
            .process_info(std::process::id())
            .expect("own process is readable");
        assert_eq!(me.pid, std::process::id());
        assert!(me.memory_bytes > 0);
        assert!(me.threads >= 1);

        assert!(system.cpu_times().expect("cpu times").total.total() > 0);
        assert!(system.memory().expect("meminfo").total > 0);
        assert!(system.uptime().expect("uptime") > 0.0);
    }
}
