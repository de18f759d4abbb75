#![cfg(target_os = "linux")]

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use proctop::system::kill::{KillError, ProcessKiller};
use proctop::system::platform::{self, HostConfig, ProcessControl};

fn spawn_shell(script: &str) -> Child {
    Command::new("sh")
        .args(["-c", script])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn child process")
}

fn killer() -> ProcessKiller<Box<dyn ProcessControl>> {
    let control = platform::host_control(&HostConfig::default()).expect("host control");
    ProcessKiller::with_grace_period(control, Duration::from_millis(200))
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn wait_for_exit(child: &mut Child) {
    let exited = wait_until(Duration::from_secs(5), || {
        matches!(child.try_wait(), Ok(Some(_)))
    });
    if !exited {
        let _ = child.kill();
        panic!("child process did not exit before timeout");
    }
}

#[test]
fn kill_nonexistent_pid_is_success() {
    // Above the kernel's pid_max ceiling, so never a live process.
    let result = killer().kill_process(4_194_305, false);
    assert!(result.success);
    assert!(!result.process_still_running);
}

#[test]
fn kill_rejects_broadcast_pid() {
    let result = killer().kill_process(0, true);
    assert!(!result.success);
    assert_eq!(result.error, Some(KillError::InvalidPid { pid: 0 }));
}

#[test]
fn kill_spawned_child_terminates() {
    let mut child = spawn_shell("sleep 30");
    let pid = child.id();
    let killer = killer();

    let mut result = killer.kill_process(pid, false);
    if result.process_still_running {
        result = killer.kill_process(pid, true);
    }
    if !result.success {
        let _ = child.kill();
        panic!("kill_process reported failure: {}", result.error_message());
    }
    wait_for_exit(&mut child);
}

#[test]
fn kill_tree_takes_down_grandchildren() {
    let mut child = spawn_shell("sleep 30 & sleep 30 & wait");
    let pid = child.id();
    let control = platform::host_control(&HostConfig::default()).expect("host control");

    let mut grandchildren = Vec::new();
    let found = wait_until(Duration::from_secs(3), || {
        grandchildren = control
            .parent_table()
            .into_iter()
            .filter(|&(_, ppid)| ppid == pid)
            .map(|(child_pid, _)| child_pid)
            .collect();
        grandchildren.len() == 2
    });
    if !found {
        let _ = child.kill();
        panic!("shell {pid} did not start its two sleepers");
    }

    let result = killer().kill_process_tree(pid, true);
    assert!(result.success, "tree kill failed: {}", result.error_message());
    wait_for_exit(&mut child);

    let gone = wait_until(Duration::from_secs(5), || {
        grandchildren.iter().all(|&gc| !control.is_alive(gc))
    });
    assert!(gone, "grandchildren {grandchildren:?} survived the tree kill");
}
