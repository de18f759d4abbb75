use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

pub const DEFAULT_SERVICES_PATH: &str = "/etc/services";

/// Cache state for one address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEntry {
    Resolving,
    NotFound,
    Resolved(String),
}

/// Blocking reverse lookup of an address to a host name.
pub trait ReverseLookup: Send + Sync {
    fn reverse(&self, ip: IpAddr) -> Option<String>;
}

pub type ResolvedCallback = Arc<dyn Fn(&str, &HostEntry) + Send + Sync>;

struct Queue {
    pending: VecDeque<String>,
    running: bool,
}

struct Inner {
    cache: Mutex<HashMap<String, HostEntry>>,
    queue: Mutex<Queue>,
    ready: Condvar,
    callback: Mutex<Option<ResolvedCallback>>,
    lookup: Box<dyn ReverseLookup>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_wildcard(ip: &str) -> bool {
    matches!(ip, "" | "*" | "0.0.0.0" | "::")
}

/// Background reverse-DNS with a non-blocking cache, plus synchronous
/// service-name lookup from the services database.
pub struct NameResolver {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    services: HashMap<String, String>,
}

impl NameResolver {
    /// `services_path` is read once; a missing or unreadable file leaves the
    /// service table empty.
    pub fn new(lookup: impl ReverseLookup + 'static, services_path: &Path) -> Self {
        let services = match fs::read_to_string(services_path) {
            Ok(content) => parse_services(&content),
            Err(err) => {
                debug!("No services table at {}: {err}", services_path.display());
                HashMap::new()
            }
        };
        Self::with_services(lookup, services)
    }

    pub fn with_services(lookup: impl ReverseLookup + 'static, services: HashMap<String, String>) -> Self {
        NameResolver {
            inner: Arc::new(Inner {
                cache: Mutex::new(HashMap::new()),
                queue: Mutex::new(Queue {
                    pending: VecDeque::new(),
                    running: false,
                }),
                ready: Condvar::new(),
                callback: Mutex::new(None),
                lookup: Box::new(lookup),
            }),
            worker: Mutex::new(None),
            services,
        }
    }

    pub fn start(&self) -> io::Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }
        lock(&self.inner.queue).running = true;
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("proctop-resolver".to_string())
            .spawn(move || run_worker(&inner));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!("Name resolver started");
                Ok(())
            }
            Err(err) => {
                lock(&self.inner.queue).running = false;
                Err(err)
            }
        }
    }

    pub fn stop(&self) {
        // Held until the join completes so a concurrent start cannot slip in.
        let mut worker = lock(&self.worker);
        let Some(handle) = worker.take() else {
            return;
        };
        lock(&self.inner.queue).running = false;
        self.inner.ready.notify_all();
        if handle.join().is_err() {
            warn!("Resolver thread panicked");
        }
        info!("Name resolver stopped");
    }

    /// Never blocks. Returns `"*"` for wildcard addresses, `""` while a lookup
    /// is pending, the address itself when it has no name.
    pub fn hostname(&self, ip: &str) -> String {
        if is_wildcard(ip) {
            return "*".to_string();
        }
        {
            let mut cache = lock(&self.inner.cache);
            match cache.get(ip) {
                Some(HostEntry::Resolved(name)) => return name.clone(),
                Some(HostEntry::NotFound) => return ip.to_string(),
                Some(HostEntry::Resolving) => return String::new(),
                None => {
                    cache.insert(ip.to_string(), HostEntry::Resolving);
                }
            }
        }
        lock(&self.inner.queue).pending.push_back(ip.to_string());
        self.inner.ready.notify_one();
        String::new()
    }

    pub fn host_entry(&self, ip: &str) -> Option<HostEntry> {
        lock(&self.inner.cache).get(ip).cloned()
    }

    /// Service name registered for `port/protocol`, or empty.
    pub fn service_name(&self, port: u16, protocol: &str) -> String {
        self.services
            .get(&format!("{port}/{protocol}"))
            .cloned()
            .unwrap_or_default()
    }

    /// Runs on the resolver thread after each cache update.
    pub fn set_on_resolved<F>(&self, callback: F)
    where
        F: Fn(&str, &HostEntry) + Send + Sync + 'static,
    {
        *lock(&self.inner.callback) = Some(Arc::new(callback));
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner.queue).pending.len()
    }
}

impl Drop for NameResolver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(inner: &Inner) {
    loop {
        let ip = {
            let mut queue = lock(&inner.queue);
            loop {
                if !queue.running {
                    return;
                }
                if let Some(ip) = queue.pending.pop_front() {
                    break ip;
                }
                queue = inner.ready.wait(queue).unwrap_or_else(PoisonError::into_inner);
            }
        };

        let entry = match ip.parse::<IpAddr>() {
            Ok(addr) => inner
                .lookup
                .reverse(addr)
                .map_or(HostEntry::NotFound, HostEntry::Resolved),
            Err(_) => HostEntry::NotFound,
        };
        debug!("Resolved {ip} -> {entry:?}");
        lock(&inner.cache).insert(ip.clone(), entry.clone());

        let callback = lock(&inner.callback).clone();
        if let Some(callback) = callback {
            callback(&ip, &entry);
        }
    }
}

/// `"port/proto" -> name` from services(5) content. The first entry for a
/// key wins.
pub fn parse_services(content: &str) -> HashMap<String, String> {
    let mut table = HashMap::new();
    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("");
        let mut fields = line.split_whitespace();
        let (Some(name), Some(port_proto)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        if port.parse::<u16>().is_err() || proto.is_empty() {
            continue;
        }
        table
            .entry(port_proto.to_string())
            .or_insert_with(|| name.to_string());
    }
    table
}

/// Reverse lookup through the system resolver (`getnameinfo` with
/// `NI_NAMEREQD`).
#[cfg(unix)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLookup;

#[cfg(unix)]
impl ReverseLookup for SystemLookup {
    fn reverse(&self, ip: IpAddr) -> Option<String> {
        use std::ffi::CStr;
        use std::mem;

        // NI_MAXHOST from <netdb.h>.
        const HOST_BUF_LEN: usize = 1025;
        let mut host = [0 as libc::c_char; HOST_BUF_LEN];

        let ret = match ip {
            IpAddr::V4(v4) => {
                // SAFETY: sockaddr_in is plain old data; all-zero is a valid value.
                let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
                addr.sin_family = libc::AF_INET as libc::sa_family_t;
                addr.sin_addr.s_addr = u32::from_ne_bytes(v4.octets());
                // SAFETY: addr and host outlive the call and their lengths are passed exactly.
                unsafe {
                    libc::getnameinfo(
                        (&addr as *const libc::sockaddr_in).cast(),
                        mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                        host.as_mut_ptr(),
                        HOST_BUF_LEN as libc::socklen_t,
                        std::ptr::null_mut(),
                        0,
                        libc::NI_NAMEREQD,
                    )
                }
            }
            IpAddr::V6(v6) => {
                // SAFETY: sockaddr_in6 is plain old data; all-zero is a valid value.
                let mut addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
                addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                addr.sin6_addr.s6_addr = v6.octets();
                // SAFETY: as above.
                unsafe {
                    libc::getnameinfo(
                        (&addr as *const libc::sockaddr_in6).cast(),
                        mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                        host.as_mut_ptr(),
                        HOST_BUF_LEN as libc::socklen_t,
                        std::ptr::null_mut(),
                        0,
                        libc::NI_NAMEREQD,
                    )
                }
            }
        };
        if ret != 0 {
            return None;
        }
        // SAFETY: getnameinfo NUL-terminates the buffer on success.
        let name = unsafe { CStr::from_ptr(host.as_ptr()) };
        let name = name.to_string_lossy().into_owned();
        (!name.is_empty()).then_some(name)
    }
}
