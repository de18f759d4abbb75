use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::maps::{LibraryIndex, aggregate_libraries, parse_maps};
use super::net::{parse_socket_table, socket_inode};
use super::parse::{
    parse_cmdline, parse_environ, parse_stack, parse_stat, parse_statm, parse_status_uid,
    parse_syscall_pc,
};
use super::users::UserCache;
use super::{numeric_entries, read_lossy, read_raw};
use crate::system::details::{
    EnvVar, FileHandle, FileKind, Library, MemoryMap, NetworkConnection, Protocol, ThreadInfo,
};
use crate::system::error::ProcError;
use crate::system::platform::{HostConfig, ProcessDataProvider, ProcessScan};
use crate::system::process::{ProcessInfo, ProcessState};

pub struct LinuxProcessData {
    host: HostConfig,
    users: UserCache,
}

impl LinuxProcessData {
    pub fn new(host: HostConfig) -> Self {
        LinuxProcessData {
            host,
            users: UserCache::new(),
        }
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.host.proc_root.join(pid.to_string())
    }

    fn read_process(&mut self, pid: u32) -> Result<ProcessInfo, ProcError> {
        let dir = self.pid_dir(pid);
        let stat = parse_stat(&read_lossy(&dir.join("stat"))?)?;

        let page_size = self.host.page_size;
        let (virtual_bytes, memory_bytes) = match read_lossy(&dir.join("statm"))
            .ok()
            .and_then(|s| parse_statm(&s))
        {
            Some((size, resident)) => (
                size.saturating_mul(page_size),
                resident.saturating_mul(page_size),
            ),
            None => (stat.vsize, stat.rss_pages.saturating_mul(page_size)),
        };
        let memory_percent = if self.host.total_memory > 0 {
            memory_bytes as f64 / self.host.total_memory as f64 * 100.0
        } else {
            0.0
        };

        let command = read_raw(&dir.join("cmdline"))
            .map(|raw| parse_cmdline(&raw))
            .unwrap_or_default();
        let exe_path = fs::read_link(dir.join("exe"))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let uid = read_lossy(&dir.join("status"))
            .ok()
            .and_then(|s| parse_status_uid(&s));
        let user = uid.map(|uid| self.users.name_for(uid)).unwrap_or_default();

        let start_time = if self.host.clock_ticks > 0 {
            self.host.boot_time.saturating_add(stat.start_ticks / self.host.clock_ticks)
        } else {
            self.host.boot_time
        };

        Ok(ProcessInfo {
            pid,
            ppid: stat.ppid,
            command: if command.is_empty() {
                format!("[{}]", stat.name)
            } else {
                command
            },
            name: stat.name,
            exe_path,
            state: ProcessState::from_code(stat.state),
            user,
            uid,
            cpu_percent: 0.0,
            total_cpu_percent: 0.0,
            memory_bytes,
            virtual_bytes,
            memory_percent,
            threads: stat.num_threads,
            priority: stat.priority,
            nice: stat.nice,
            start_time,
            start_ticks: stat.start_ticks,
            user_ticks: stat.utime,
            kernel_ticks: stat.stime,
        })
    }

    fn read_thread(&self, task_dir: &Path, tid: u32, libraries: &LibraryIndex) -> Option<ThreadInfo> {
        let dir = task_dir.join(tid.to_string());
        let stat = parse_stat(&read_lossy(&dir.join("stat")).ok()?).ok()?;
        let name = read_lossy(&dir.join("comm"))
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| stat.name.clone());
        let pc = read_lossy(&dir.join("syscall"))
            .ok()
            .and_then(|s| parse_syscall_pc(&s))
            .or(Some(stat.kstkeip).filter(|&pc| pc != 0));
        let current_library = pc
            .and_then(|pc| libraries.lookup(pc))
            .unwrap_or_default()
            .to_string();

        Some(ThreadInfo {
            tid,
            name,
            state: ProcessState::from_code(stat.state),
            priority: stat.priority,
            processor: stat.processor,
            user_ticks: stat.utime,
            kernel_ticks: stat.stime,
            current_library,
        })
    }

    fn fd_targets(&self, pid: u32) -> Vec<(u32, PathBuf, String)> {
        let fd_dir = self.pid_dir(pid).join("fd");
        let Ok(fds) = numeric_entries(&fd_dir) else {
            return Vec::new();
        };
        fds.into_iter()
            .filter_map(|fd| {
                let link = fd_dir.join(fd.to_string());
                let target = fs::read_link(&link).ok()?;
                Some((fd, link, target.to_string_lossy().into_owned()))
            })
            .collect()
    }
}

/// Pseudo-file targets are recognised from the link text alone.
pub fn classify_link_target(target: &str) -> Option<FileKind> {
    if target.starts_with("socket:") {
        Some(FileKind::Socket)
    } else if target.starts_with("pipe:") {
        Some(FileKind::Pipe)
    } else if target.starts_with("anon_inode:") {
        Some(FileKind::Anon)
    } else {
        None
    }
}

fn classify_path(link: &Path) -> FileKind {
    let Ok(meta) = fs::metadata(link) else {
        return FileKind::Unknown;
    };
    let ft = meta.file_type();
    if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_file() {
        FileKind::File
    } else if ft.is_char_device() {
        FileKind::CharDevice
    } else if ft.is_block_device() {
        FileKind::BlockDevice
    } else if ft.is_fifo() {
        FileKind::Fifo
    } else if ft.is_socket() {
        FileKind::Socket
    } else {
        FileKind::Unknown
    }
}

impl ProcessDataProvider for LinuxProcessData {
    fn all_processes(&mut self) -> ProcessScan {
        let mut scan = ProcessScan::default();
        let pids = match numeric_entries(&self.host.proc_root) {
            Ok(pids) => pids,
            Err(err) => {
                scan.errors.push(err.to_string());
                return scan;
            }
        };

        let mut seen_uids = HashSet::new();
        for pid in pids {
            match self.read_process(pid) {
                Ok(info) => {
                    seen_uids.extend(info.uid);
                    scan.processes.push(info);
                }
                Err(err) if err.is_vanished() => debug!("Skipping process {pid}: vanished"),
                Err(err) => {
                    debug!("Skipping process {pid}: {err}");
                    scan.errors.push(format!("pid {pid}: {err}"));
                }
            }
        }
        self.users.retain(&seen_uids);
        scan
    }

    fn process_info(&mut self, pid: u32) -> Option<ProcessInfo> {
        self.read_process(pid).ok()
    }

    fn threads(&self, pid: u32) -> Vec<ThreadInfo> {
        let dir = self.pid_dir(pid);
        let task_dir = dir.join("task");
        let Ok(tids) = numeric_entries(&task_dir) else {
            return Vec::new();
        };
        let libraries = read_lossy(&dir.join("maps"))
            .map(|m| LibraryIndex::from_maps(&parse_maps(&m)))
            .unwrap_or_default();
        tids.into_iter()
            .filter_map(|tid| self.read_thread(&task_dir, tid, &libraries))
            .collect()
    }

    fn thread_stack(&self, pid: u32, tid: u32) -> Vec<String> {
        let path = self
            .pid_dir(pid)
            .join("task")
            .join(tid.to_string())
            .join("stack");
        read_lossy(&path).map(|s| parse_stack(&s)).unwrap_or_default()
    }

    fn file_handles(&self, pid: u32) -> Vec<FileHandle> {
        // fd_targets is already ordered by descriptor number.
        self.fd_targets(pid)
            .into_iter()
            .map(|(fd, link, target)| {
                let kind = classify_link_target(&target).unwrap_or_else(|| {
                    if target.starts_with('/') {
                        classify_path(&link)
                    } else {
                        FileKind::Unknown
                    }
                });
                FileHandle { fd, kind, target }
            })
            .collect()
    }

    fn network_connections(&self, pid: u32) -> Vec<NetworkConnection> {
        let inodes: HashSet<u64> = self
            .fd_targets(pid)
            .iter()
            .filter_map(|(_, _, target)| socket_inode(target))
            .collect();
        if inodes.is_empty() {
            return Vec::new();
        }

        let net_dir = self.host.proc_root.join("net");
        Protocol::ALL
            .iter()
            .filter_map(|&protocol| {
                read_lossy(&net_dir.join(protocol.table_name()))
                    .ok()
                    .map(|table| parse_socket_table(&table, protocol))
            })
            .flatten()
            .filter(|conn| inodes.contains(&conn.inode))
            .collect()
    }

    fn memory_maps(&self, pid: u32) -> Vec<MemoryMap> {
        read_lossy(&self.pid_dir(pid).join("maps"))
            .map(|m| parse_maps(&m))
            .unwrap_or_default()
    }

    fn environment(&self, pid: u32) -> Vec<EnvVar> {
        read_raw(&self.pid_dir(pid).join("environ"))
            .map(|raw| parse_environ(&raw))
            .unwrap_or_default()
    }

    fn libraries(&self, pid: u32) -> Vec<Library> {
        let dir = self.pid_dir(pid);
        let exe_path = fs::read_link(dir.join("exe"))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let maps = self.memory_maps(pid);
        aggregate_libraries(&maps, &exe_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_targets() {
        assert_eq!(classify_link_target("socket:[1]"), Some(FileKind::Socket));
        assert_eq!(classify_link_target("pipe:[2]"), Some(FileKind::Pipe));
        assert_eq!(classify_link_target("anon_inode:[eventfd]"), Some(FileKind::Anon));
        assert_eq!(classify_link_target("/dev/null"), None);
    }

    #[test]
    fn classify_real_paths() {
        assert_eq!(classify_path(Path::new("/")), FileKind::Directory);
        assert_eq!(classify_path(Path::new("/dev/null")), FileKind::CharDevice);
        assert_eq!(classify_path(Path::new("/nonexistent/x")), FileKind::Unknown);
    }
}
