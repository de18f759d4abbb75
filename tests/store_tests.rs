use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use proctop::system::collector::Collector;
use proctop::system::details::{EnvVar, FileHandle, Library, MemoryMap, NetworkConnection, ThreadInfo};
use proctop::system::error::ProcError;
use proctop::system::platform::{HostConfig, ProcessDataProvider, ProcessScan, SystemDataProvider};
use proctop::system::process::ProcessInfo;
use proctop::system::snapshot::{CpuSample, CpuTimes, LoadAverage, MemoryInfo};
use proctop::system::store::DataStore;

const WAIT: Duration = Duration::from_secs(5);

/// Process list and per-tick errors shared with the test body.
#[derive(Clone, Default)]
struct Script {
    processes: Arc<Mutex<Vec<ProcessInfo>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

struct FakeProcesses(Script);

impl ProcessDataProvider for FakeProcesses {
    fn all_processes(&mut self) -> ProcessScan {
        ProcessScan {
            processes: self.0.processes.lock().unwrap().clone(),
            errors: self.0.errors.lock().unwrap().clone(),
        }
    }

    fn process_info(&mut self, pid: u32) -> Option<ProcessInfo> {
        self.0.processes.lock().unwrap().iter().find(|p| p.pid == pid).cloned()
    }

    fn threads(&self, _pid: u32) -> Vec<ThreadInfo> {
        Vec::new()
    }

    fn thread_stack(&self, _pid: u32, _tid: u32) -> Vec<String> {
        Vec::new()
    }

    fn file_handles(&self, _pid: u32) -> Vec<FileHandle> {
        Vec::new()
    }

    fn network_connections(&self, _pid: u32) -> Vec<NetworkConnection> {
        Vec::new()
    }

    fn memory_maps(&self, _pid: u32) -> Vec<MemoryMap> {
        Vec::new()
    }

    fn environment(&self, _pid: u32) -> Vec<EnvVar> {
        Vec::new()
    }

    fn libraries(&self, _pid: u32) -> Vec<Library> {
        Vec::new()
    }
}

/// Every read advances the clock by 100 ticks, a quarter of them busy.
struct FakeSystem {
    host: HostConfig,
    clock: AtomicU64,
}

impl SystemDataProvider for FakeSystem {
    fn host(&self) -> &HostConfig {
        &self.host
    }

    fn cpu_times(&self) -> Result<CpuSample, ProcError> {
        let n = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let times = CpuTimes {
            user: 25 * n,
            idle: 75 * n,
            ..Default::default()
        };
        Ok(CpuSample {
            total: times,
            cores: vec![times],
        })
    }

    fn memory(&self) -> Result<MemoryInfo, ProcError> {
        Ok(MemoryInfo {
            total: 1000,
            available: 400,
            ..Default::default()
        })
    }

    fn load_average(&self) -> Result<LoadAverage, ProcError> {
        Err(ProcError::malformed("/proc/loadavg", "empty"))
    }

    fn uptime(&self) -> Result<f64, ProcError> {
        Ok(42.0)
    }
}

fn chain(n: u32) -> Vec<ProcessInfo> {
    (1..=n)
        .map(|pid| ProcessInfo {
            pid,
            ppid: pid.saturating_sub(1),
            name: format!("p{pid}"),
            memory_bytes: 10,
            ..Default::default()
        })
        .collect()
}

fn store_with(script: &Script, interval: Duration, error_capacity: usize) -> DataStore {
    let collector = Collector::new(
        Box::new(FakeProcesses(script.clone())),
        Box::new(FakeSystem {
            host: HostConfig::default(),
            clock: AtomicU64::new(0),
        }),
    );
    DataStore::with_options(collector, interval, error_capacity)
}

fn scripted(n: u32) -> Script {
    let script = Script::default();
    *script.processes.lock().unwrap() = chain(n);
    script
}

#[test]
fn worker_publishes_and_notifies() {
    let script = scripted(5);
    let store = store_with(&script, Duration::from_millis(10), 16);
    let (tx, rx) = mpsc::channel();
    store.set_on_data_updated(move |snapshot| {
        let _ = tx.send(snapshot);
    });

    store.start().unwrap();
    assert!(store.is_running());
    let first = rx.recv_timeout(WAIT).expect("first tick");
    let second = rx.recv_timeout(WAIT).expect("second tick");
    store.stop();

    assert_eq!(first.tree.len(), 5);
    assert_eq!(second.tree.get(1).unwrap().subtree_memory, 50);
    assert!((second.totals.cpu_usage_percent - 25.0).abs() < 1e-9);
    assert_eq!(second.totals.memory_used, 600);
    assert!(!store.is_running());
}

#[test]
fn start_and_stop_are_idempotent_and_restartable() {
    let script = scripted(2);
    let store = store_with(&script, Duration::from_millis(10), 16);

    store.stop();
    store.start().unwrap();
    store.start().unwrap();
    store.stop();
    store.stop();
    assert!(!store.is_running());

    let (tx, rx) = mpsc::channel();
    store.set_on_data_updated(move |snapshot| {
        let _ = tx.send(snapshot.tree.len());
    });
    store.start().unwrap();
    assert_eq!(rx.recv_timeout(WAIT).expect("tick after restart"), 2);
}

#[test]
fn pause_stops_ticks_and_refresh_now_forces_one() {
    let script = scripted(3);
    let store = store_with(&script, Duration::from_millis(10), 16);
    let (tx, rx) = mpsc::channel();
    store.set_on_data_updated(move |_| {
        let _ = tx.send(());
    });
    store.start().unwrap();
    rx.recv_timeout(WAIT).expect("first tick");

    store.pause();
    assert!(store.is_paused());
    // Let a tick that was already running finish, then drain.
    thread::sleep(Duration::from_millis(100));
    while rx.try_recv().is_ok() {}
    thread::sleep(Duration::from_millis(150));
    assert!(rx.try_recv().is_err(), "ticked while paused");

    store.refresh_now();
    rx.recv_timeout(WAIT).expect("forced tick");
    assert!(store.is_paused());
    thread::sleep(Duration::from_millis(150));
    assert!(rx.try_recv().is_err(), "forced refresh resumed the cycle");

    store.resume();
    rx.recv_timeout(WAIT).expect("tick after resume");
}

#[test]
fn interval_change_wakes_the_worker() {
    let script = scripted(1);
    let store = store_with(&script, Duration::from_secs(3600), 16);
    let (tx, rx) = mpsc::channel();
    store.set_on_data_updated(move |_| {
        let _ = tx.send(());
    });
    store.start().unwrap();
    rx.recv_timeout(WAIT).expect("immediate first tick");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    store.set_refresh_interval(Duration::from_millis(10));
    assert_eq!(store.refresh_interval(), Duration::from_millis(10));
    rx.recv_timeout(WAIT).expect("tick after shortening the interval");
}

#[test]
fn error_log_is_bounded_and_ordered() {
    let script = scripted(1);
    *script.errors.lock().unwrap() = vec!["pid 7: a".into(), "pid 8: b".into()];
    let store = store_with(&script, Duration::from_secs(3600), 3);

    store.refresh_now();
    // Two scan errors plus the failing load average.
    assert_eq!(store.recent_errors().len(), 3);
    assert!(store.recent_errors()[2].contains("loadavg"));

    *script.errors.lock().unwrap() = vec!["pid 9: c".into()];
    store.refresh_now();
    let errors = store.recent_errors();
    assert_eq!(errors.len(), 3);
    assert_eq!(errors[1], "pid 9: c");
    assert!(errors[2].contains("loadavg"));
}

#[test]
fn published_snapshots_are_immutable() {
    let script = scripted(4);
    let store = store_with(&script, Duration::from_secs(3600), 16);

    store.refresh_now();
    let before = store.snapshot();
    *script.processes.lock().unwrap() = chain(2);
    store.refresh_now();
    let after = store.snapshot();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.tree.len(), 4);
    assert_eq!(after.tree.len(), 2);
}

#[test]
fn callback_runs_without_store_locks() {
    let script = scripted(3);
    let store = Arc::new(store_with(&script, Duration::from_secs(3600), 16));
    let weak = Arc::downgrade(&store);
    let (tx, rx) = mpsc::channel();
    store.set_on_data_updated(move |published| {
        // Reading back inside the callback would deadlock if a lock were held.
        if let Some(store) = weak.upgrade() {
            let _ = tx.send(Arc::ptr_eq(&store.snapshot(), &published));
        }
    });

    store.refresh_now();
    assert!(rx.recv_timeout(WAIT).expect("callback ran"));
}

#[test]
fn readers_only_see_complete_snapshots() {
    let script = scripted(50);
    let store = Arc::new(store_with(&script, Duration::from_millis(1), 16));
    store.start().unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..500 {
                    let snapshot = store.snapshot();
                    let len = snapshot.tree.len();
                    assert!(len == 0 || len == 50);
                    if len == 50 {
                        assert_eq!(snapshot.tree.get(1).unwrap().subtree_memory, 500);
                    }
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().expect("reader thread");
    }
    store.stop();
}
