use super::parse::{parse_cpu_stat, parse_loadavg, parse_meminfo, parse_uptime};
use super::read_lossy;
use crate::system::error::ProcError;
use crate::system::platform::{HostConfig, SystemDataProvider};
use crate::system::snapshot::{CpuSample, LoadAverage, MemoryInfo};

/// Stateless reader of the system-wide `/proc` files.
pub struct LinuxSystemData {
    host: HostConfig,
}

impl LinuxSystemData {
    pub fn new(host: HostConfig) -> Self {
        LinuxSystemData { host }
    }

    fn read(&self, name: &str) -> Result<String, ProcError> {
        read_lossy(&self.host.proc_root.join(name))
    }
}

impl SystemDataProvider for LinuxSystemData {
    fn host(&self) -> &HostConfig {
        &self.host
    }

    fn cpu_times(&self) -> Result<CpuSample, ProcError> {
        parse_cpu_stat(&self.read("stat")?)
    }

    fn memory(&self) -> Result<MemoryInfo, ProcError> {
        Ok(parse_meminfo(&self.read("meminfo")?))
    }

    fn load_average(&self) -> Result<LoadAverage, ProcError> {
        parse_loadavg(&self.read("loadavg")?)
    }

    fn uptime(&self) -> Result<f64, ProcError> {
        parse_uptime(&self.read("uptime")?)
    }
}
