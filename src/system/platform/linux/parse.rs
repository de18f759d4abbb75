//! Pure parsers for `/proc` text formats. Nothing here touches the filesystem.

use crate::system::details::EnvVar;
use crate::system::error::ProcError;
use crate::system::snapshot::{CpuSample, CpuTimes, LoadAverage, MemoryInfo};

/// Fields of `/proc/<pid>/stat` (or `task/<tid>/stat`) this crate uses.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatFields {
    pub pid: u32,
    pub name: String,
    pub state: char,
    pub ppid: u32,
    pub utime: u64,
    pub stime: u64,
    pub priority: i64,
    pub nice: i64,
    pub num_threads: u32,
    pub start_ticks: u64,
    pub vsize: u64,
    pub rss_pages: u64,
    pub kstkeip: u64,
    pub processor: i32,
}

/// Parse a stat line. The name sits between the first `(` and the *last* `)`
/// because the name itself may contain parentheses and spaces.
pub fn parse_stat(content: &str) -> Result<StatFields, ProcError> {
    let open = content
        .find('(')
        .ok_or_else(|| ProcError::malformed("stat", "missing '('"))?;
    let close = content
        .rfind(')')
        .filter(|&close| close > open)
        .ok_or_else(|| ProcError::malformed("stat", "missing ')'"))?;

    let pid = content[..open]
        .trim()
        .parse()
        .map_err(|_| ProcError::malformed("stat", "bad pid"))?;
    let name = content[open + 1..close].to_string();

    // Fields after the name: state(0) ppid(1) pgrp(2) session(3) tty_nr(4)
    // tpgid(5) flags(6) minflt(7) cminflt(8) majflt(9) cmajflt(10)
    // utime(11) stime(12) cutime(13) cstime(14) priority(15) nice(16)
    // num_threads(17) itrealvalue(18) starttime(19) vsize(20) rss(21)
    // ... kstkeip(27) ... processor(36)
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if fields.len() < 2 {
        return Err(ProcError::malformed("stat", "truncated after name"));
    }

    let num = |idx: usize| -> u64 { fields.get(idx).and_then(|f| f.parse().ok()).unwrap_or(0) };
    let signed = |idx: usize| -> i64 { fields.get(idx).and_then(|f| f.parse().ok()).unwrap_or(0) };

    Ok(StatFields {
        pid,
        name,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: fields[1].parse().unwrap_or(0),
        utime: num(11),
        stime: num(12),
        priority: signed(15),
        nice: signed(16),
        num_threads: u32::try_from(num(17)).unwrap_or(u32::MAX),
        start_ticks: num(19),
        vsize: num(20),
        rss_pages: num(21),
        kstkeip: num(27),
        processor: i32::try_from(signed(36)).unwrap_or(i32::MAX),
    })
}

/// `/proc/<pid>/statm`: returns `(size_pages, resident_pages)`.
pub fn parse_statm(content: &str) -> Option<(u64, u64)> {
    let mut parts = content.split_whitespace();
    let size = parts.next()?.parse().ok()?;
    let resident = parts.next()?.parse().ok()?;
    Some((size, resident))
}

/// Real uid from the `Uid:` line of `/proc/<pid>/status`.
pub fn parse_status_uid(content: &str) -> Option<u32> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|uid| uid.parse().ok())
}

/// NUL-separated argv joined with single spaces.
pub fn parse_cmdline(raw: &[u8]) -> String {
    raw.split(|&b| b == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a NUL-delimited environment blob on the first `=` of each entry.
pub fn parse_environ(raw: &[u8]) -> Vec<EnvVar> {
    let mut vars: Vec<EnvVar> = raw
        .split(|&b| b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            match entry.split_once('=') {
                Some((name, value)) => EnvVar {
                    name: name.to_string(),
                    value: value.to_string(),
                },
                None => EnvVar {
                    name: entry.into_owned(),
                    value: String::new(),
                },
            }
        })
        .collect();
    vars.sort_by(|a, b| a.name.cmp(&b.name));
    vars
}

fn parse_cpu_line(parts: &[&str]) -> CpuTimes {
    let field = |idx: usize| -> u64 { parts.get(idx).and_then(|v| v.parse().ok()).unwrap_or(0) };
    CpuTimes {
        user: field(1),
        nice: field(2),
        system: field(3),
        idle: field(4),
        iowait: field(5),
        irq: field(6),
        softirq: field(7),
        steal: field(8),
    }
}

/// `cpu` and `cpuN` lines of `/proc/stat`. Cores are ordered by their index.
pub fn parse_cpu_stat(content: &str) -> Result<CpuSample, ProcError> {
    let mut total = None;
    let mut cores: Vec<(usize, CpuTimes)> = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&label) = parts.first() else {
            continue;
        };
        if label == "cpu" {
            total = Some(parse_cpu_line(&parts));
        } else if let Some(index) = label.strip_prefix("cpu")
            && let Ok(index) = index.parse::<usize>()
        {
            cores.push((index, parse_cpu_line(&parts)));
        }
    }

    let total = total.ok_or_else(|| ProcError::malformed("/proc/stat", "no aggregate cpu line"))?;
    cores.sort_by_key(|(index, _)| *index);
    Ok(CpuSample {
        total,
        cores: cores.into_iter().map(|(_, times)| times).collect(),
    })
}

/// `btime` from `/proc/stat`, seconds since the epoch.
pub fn parse_boot_time(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime"))
        .and_then(|v| v.trim().parse().ok())
}

/// `/proc/meminfo`; values are reported in kB. Missing keys stay zero.
pub fn parse_meminfo(content: &str) -> MemoryInfo {
    let mut info = MemoryInfo::default();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kb: u64 = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let bytes = kb.saturating_mul(1024);
        match key {
            "MemTotal" => info.total = bytes,
            "MemFree" => info.free = bytes,
            "MemAvailable" => info.available = bytes,
            "Buffers" => info.buffers = bytes,
            "Cached" => info.cached = bytes,
            "SwapTotal" => info.swap_total = bytes,
            "SwapFree" => info.swap_free = bytes,
            _ => {}
        }
    }
    // Kernels before 3.14 have no MemAvailable.
    if info.available == 0 {
        info.available = info.free.saturating_add(info.buffers).saturating_add(info.cached);
    }
    info
}

/// `/proc/loadavg`, e.g. `"0.00 0.01 0.05 1/234 5678"`.
pub fn parse_loadavg(content: &str) -> Result<LoadAverage, ProcError> {
    let parts: Vec<f64> = content
        .split_whitespace()
        .take(3)
        .map(|v| v.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| ProcError::malformed("/proc/loadavg", e.to_string()))?;
    match parts.as_slice() {
        [one, five, fifteen] => Ok(LoadAverage {
            one: *one,
            five: *five,
            fifteen: *fifteen,
        }),
        _ => Err(ProcError::malformed(
            "/proc/loadavg",
            format!("expected 3 fields, got {}", parts.len()),
        )),
    }
}

/// First field of `/proc/uptime`, in seconds.
pub fn parse_uptime(content: &str) -> Result<f64, ProcError> {
    content
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ProcError::malformed("/proc/uptime", content.trim().to_string()))
}

/// Program counter from `task/<tid>/syscall`: the last field, unless the
/// thread is currently running.
pub fn parse_syscall_pc(content: &str) -> Option<u64> {
    let last = content.split_whitespace().last()?;
    let hex = last.strip_prefix("0x")?;
    u64::from_str_radix(hex, 16).ok().filter(|&pc| pc != 0)
}

/// Kernel stack frames with the `[<addr>]` prefix removed.
pub fn parse_stack(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| match line.split_once("] ") {
            Some((prefix, frame)) if prefix.starts_with('[') => frame.trim().to_string(),
            _ => line.trim().to_string(),
        })
        .filter(|frame| !frame.is_empty())
        .collect()
}
