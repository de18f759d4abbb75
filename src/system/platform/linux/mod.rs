//! `/proc`-backed providers.

pub mod control;
pub mod maps;
pub mod net;
pub mod parse;
pub mod process;
pub mod system;
pub mod users;

use std::fs;
use std::path::{Path, PathBuf};

pub use control::LinuxControl;
pub use process::LinuxProcessData;
pub use system::LinuxSystemData;

use super::HostConfig;
use crate::system::error::ProcError;

pub(crate) fn read_lossy(path: &Path) -> Result<String, ProcError> {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| ProcError::from_io(path, e))
}

pub(crate) fn read_raw(path: &Path) -> Result<Vec<u8>, ProcError> {
    fs::read(path).map_err(|e| ProcError::from_io(path, e))
}

/// Numeric entries of a `/proc`-like directory (pids, or tids under `task`).
pub(crate) fn numeric_entries(dir: &Path) -> Result<Vec<u32>, ProcError> {
    let entries = fs::read_dir(dir).map_err(|e| ProcError::from_io(dir, e))?;
    let mut ids: Vec<u32> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

fn sysconf(name: libc::c_int, fallback: u64) -> u64 {
    // SAFETY: sysconf has no memory-safety preconditions; -1 signals an error.
    let value = unsafe { libc::sysconf(name) };
    if value > 0 { value as u64 } else { fallback }
}

/// Probe the running kernel for the constants the providers need.
pub fn detect_host(proc_root: impl Into<PathBuf>) -> Result<HostConfig, ProcError> {
    let proc_root = proc_root.into();
    let stat = read_lossy(&proc_root.join("stat"))?;
    let meminfo = read_lossy(&proc_root.join("meminfo"))?;

    let cores_from_stat = parse::parse_cpu_stat(&stat).map(|s| s.cores.len()).unwrap_or(0);
    let num_cpus = if cores_from_stat > 0 {
        cores_from_stat
    } else {
        sysconf(libc::_SC_NPROCESSORS_ONLN, 1) as usize
    };

    Ok(HostConfig {
        page_size: sysconf(libc::_SC_PAGESIZE, 4096),
        clock_ticks: sysconf(libc::_SC_CLK_TCK, 100),
        num_cpus,
        boot_time: parse::parse_boot_time(&stat).unwrap_or(0),
        total_memory: parse::parse_meminfo(&meminfo).total,
        proc_root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_host_on_live_proc() {
        let host = detect_host("/proc").expect("live /proc should be readable");
        assert!(host.page_size >= 4096);
        assert!(host.clock_ticks > 0);
        assert!(host.num_cpus >= 1);
        assert!(host.total_memory > 0);
    }

    #[test]
    fn detect_host_missing_root_fails() {
        assert!(detect_host("/nonexistent/proc").is_err());
    }
}
