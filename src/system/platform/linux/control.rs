use std::io;
use std::path::PathBuf;

use super::parse::parse_stat;
use super::{numeric_entries, read_lossy};
use crate::system::kill::{KillError, Signal};
use crate::system::platform::ProcessControl;

/// Signal delivery through `kill(2)` and a live `/proc` scan for topology.
pub struct LinuxControl {
    proc_root: PathBuf,
}

impl LinuxControl {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        LinuxControl {
            proc_root: proc_root.into(),
        }
    }

    fn is_zombie(&self, pid: u32) -> bool {
        read_lossy(&self.proc_root.join(pid.to_string()).join("stat"))
            .ok()
            .and_then(|s| parse_stat(&s).ok())
            .is_some_and(|stat| stat.state == 'Z')
    }
}

fn raw_signal(signal: Signal) -> libc::c_int {
    match signal {
        Signal::Probe => 0,
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    }
}

/// Pids that `kill(2)` would read as a group or broadcast target.
fn to_pid_t(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|&p| p > 0)
}

impl ProcessControl for LinuxControl {
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), KillError> {
        let Some(target) = to_pid_t(pid) else {
            return Err(KillError::InvalidPid { pid });
        };
        // SAFETY: kill(2) takes plain integers; target is a positive pid.
        let ret = unsafe { libc::kill(target, raw_signal(signal)) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        Err(match err.raw_os_error() {
            Some(libc::EPERM) => KillError::PermissionDenied { pid },
            Some(libc::ESRCH) => KillError::NotFound { pid },
            Some(libc::EINVAL) => KillError::InvalidSignal { pid },
            _ => KillError::Other {
                pid,
                message: err.to_string(),
            },
        })
    }

    fn is_alive(&self, pid: u32) -> bool {
        match self.send_signal(pid, Signal::Probe) {
            // A zombie has already exited; only its parent's wait is pending.
            Ok(()) => !self.is_zombie(pid),
            Err(KillError::PermissionDenied { .. }) => true,
            Err(_) => false,
        }
    }

    fn parent_table(&self) -> Vec<(u32, u32)> {
        numeric_entries(&self.proc_root)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|pid| {
                let stat = read_lossy(&self.proc_root.join(pid.to_string()).join("stat")).ok()?;
                parse_stat(&stat).ok().map(|s| (pid, s.ppid))
            })
            .collect()
    }
}
