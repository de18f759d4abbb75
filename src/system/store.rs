use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::collector::{Collector, Tick};
use super::snapshot::DataSnapshot;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_ERROR_CAPACITY: usize = 64;

pub type UpdateCallback = Arc<dyn Fn(Arc<DataSnapshot>) + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to spawn the collector thread")]
    Spawn(#[source] io::Error),
    #[error("collector was lost when its worker thread panicked")]
    CollectorLost,
}

/// Bounded log of recent collection problems, oldest first.
#[derive(Debug)]
pub struct ErrorLog {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        ErrorLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: String) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

struct Control {
    running: bool,
    paused: bool,
    force: bool,
    interval: Duration,
}

struct Shared {
    snapshot: Mutex<Arc<DataSnapshot>>,
    control: Mutex<Control>,
    wake: Condvar,
    callback: Mutex<Option<UpdateCallback>>,
    errors: Mutex<ErrorLog>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn publish(&self, tick: Tick) {
        let snapshot = Arc::new(tick.snapshot);
        if !tick.errors.is_empty() {
            let mut log = lock(&self.errors);
            for err in tick.errors {
                log.push(err);
            }
        }
        *lock(&self.snapshot) = Arc::clone(&snapshot);

        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback(snapshot);
        }
    }

    /// Blocks until the next tick is due. `false` means stop.
    fn wait_for_tick(&self, last_tick: Option<Instant>) -> bool {
        let mut control = lock(&self.control);
        loop {
            if !control.running {
                return false;
            }
            if control.force {
                control.force = false;
                return true;
            }
            if control.paused {
                control = self.wake.wait(control).unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            let Some(last) = last_tick else {
                return true;
            };
            // Recomputed on every wake so an interval change applies at once.
            let deadline = last + control.interval;
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            control = self
                .wake
                .wait_timeout(control, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

enum Worker {
    Idle(Collector),
    Running(JoinHandle<Collector>),
    Lost,
}

/// Timer-driven sampling engine. A background thread asks the collector for
/// a tick once per interval and publishes the result as an immutable
/// `Arc<DataSnapshot>`.
pub struct DataStore {
    shared: Arc<Shared>,
    worker: Mutex<Worker>,
}

impl DataStore {
    pub fn new(collector: Collector) -> Self {
        Self::with_options(collector, DEFAULT_REFRESH_INTERVAL, DEFAULT_ERROR_CAPACITY)
    }

    pub fn with_options(collector: Collector, interval: Duration, error_capacity: usize) -> Self {
        let shared = Shared {
            snapshot: Mutex::new(Arc::new(DataSnapshot::default())),
            control: Mutex::new(Control {
                running: false,
                paused: false,
                force: false,
                interval,
            }),
            wake: Condvar::new(),
            callback: Mutex::new(None),
            errors: Mutex::new(ErrorLog::new(error_capacity)),
        };
        DataStore {
            shared: Arc::new(shared),
            worker: Mutex::new(Worker::Idle(collector)),
        }
    }

    pub fn start(&self) -> Result<(), StoreError> {
        let mut worker = lock(&self.worker);
        let collector = match std::mem::replace(&mut *worker, Worker::Lost) {
            Worker::Idle(collector) => collector,
            Worker::Running(handle) => {
                *worker = Worker::Running(handle);
                return Ok(());
            }
            Worker::Lost => return Err(StoreError::CollectorLost),
        };

        lock(&self.shared.control).running = true;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("proctop-collector".to_string())
            .spawn(move || run_worker(&shared, collector));

        match spawned {
            Ok(handle) => {
                *worker = Worker::Running(handle);
                info!("Data store started");
                Ok(())
            }
            Err(err) => {
                // The collector went down with the unspawned closure.
                lock(&self.shared.control).running = false;
                Err(StoreError::Spawn(err))
            }
        }
    }

    pub fn stop(&self) {
        let mut worker = lock(&self.worker);
        let Worker::Running(_) = &*worker else {
            return;
        };
        lock(&self.shared.control).running = false;
        self.shared.wake.notify_all();

        if let Worker::Running(handle) = std::mem::replace(&mut *worker, Worker::Lost) {
            match handle.join() {
                Ok(collector) => {
                    *worker = Worker::Idle(collector);
                    info!("Data store stopped");
                }
                _ => warn!("Collector thread panicked; the store cannot be restarted"),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.worker), Worker::Running(_))
    }

    pub fn pause(&self) {
        lock(&self.shared.control).paused = true;
    }

    pub fn resume(&self) {
        lock(&self.shared.control).paused = false;
        self.shared.wake.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.shared.control).paused
    }

    /// Collect once out of cycle. With the worker running this wakes it
    /// (even while paused); otherwise the tick runs on the calling thread.
    pub fn refresh_now(&self) {
        let mut worker = lock(&self.worker);
        let tick = match &mut *worker {
            Worker::Idle(collector) => collector.refresh(),
            Worker::Running(_) => {
                lock(&self.shared.control).force = true;
                self.shared.wake.notify_all();
                return;
            }
            Worker::Lost => {
                warn!("Refresh requested but the collector is gone");
                return;
            }
        };
        drop(worker);
        self.shared.publish(tick);
    }

    pub fn set_refresh_interval(&self, interval: Duration) {
        lock(&self.shared.control).interval = interval;
        self.shared.wake.notify_all();
    }

    pub fn refresh_interval(&self) -> Duration {
        lock(&self.shared.control).interval
    }

    pub fn snapshot(&self) -> Arc<DataSnapshot> {
        Arc::clone(&lock(&self.shared.snapshot))
    }

    /// The callback runs on the collector thread after each publish, with no
    /// store lock held. It must not call `stop`.
    pub fn set_on_data_updated<F>(&self, callback: F)
    where
        F: Fn(Arc<DataSnapshot>) + Send + Sync + 'static,
    {
        *lock(&self.shared.callback) = Some(Arc::new(callback));
    }

    pub fn recent_errors(&self) -> Vec<String> {
        lock(&self.shared.errors).to_vec()
    }
}

impl Drop for DataStore {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &Shared, mut collector: Collector) -> Collector {
    let mut last_tick = None;
    while shared.wait_for_tick(last_tick) {
        last_tick = Some(Instant::now());
        let tick = collector.refresh();
        debug!(
            processes = tick.snapshot.tree.len(),
            errors = tick.errors.len(),
            "Collected tick"
        );
        shared.publish(tick);
    }
    collector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_keeps_most_recent_last() {
        let mut log = ErrorLog::new(3);
        for i in 0..5 {
            log.push(format!("e{i}"));
        }
        assert_eq!(log.to_vec(), vec!["e2", "e3", "e4"]);
    }

    #[test]
    fn zero_capacity_log_stays_empty() {
        let mut log = ErrorLog::new(0);
        log.push("dropped".to_string());
        assert!(log.to_vec().is_empty());
    }
}
