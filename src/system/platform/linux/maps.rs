//! `/proc/<pid>/maps` parsing, library aggregation and program-counter lookup.

use std::collections::HashMap;

use crate::format::format_bytes;
use crate::system::details::{Library, MemoryMap};

pub fn parse_maps(content: &str) -> Vec<MemoryMap> {
    content.lines().filter_map(parse_map_line).collect()
}

fn parse_map_line(line: &str) -> Option<MemoryMap> {
    // address perms offset dev inode [padding] path
    let mut parts = line.splitn(6, ' ');
    let range = parts.next()?;
    let permissions = parts.next()?.to_string();
    let offset = u64::from_str_radix(parts.next()?, 16).ok()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let path = parts.next().unwrap_or("").trim().to_string();

    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let size = end.saturating_sub(start);

    Some(MemoryMap {
        start,
        end,
        size,
        size_human: format_bytes(size),
        permissions,
        offset,
        path,
    })
}

/// A mapping counts towards a library only when it is backed by a real file.
fn is_library_path(path: &str) -> bool {
    path.starts_with('/') && !path.ends_with("(deleted)") && !path.starts_with("/dev/")
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Group mappings by path: sizes are summed, the first mapping gives the base
/// address. The process's own executable sorts first, the rest by name.
pub fn aggregate_libraries(maps: &[MemoryMap], exe_path: &str) -> Vec<Library> {
    let mut by_path: HashMap<&str, usize> = HashMap::new();
    let mut libraries: Vec<Library> = Vec::new();

    for map in maps.iter().filter(|m| is_library_path(&m.path)) {
        match by_path.get(map.path.as_str()) {
            Some(&idx) => {
                let lib = &mut libraries[idx];
                lib.total_size = lib.total_size.saturating_add(map.size);
            }
            None => {
                by_path.insert(map.path.as_str(), libraries.len());
                libraries.push(Library {
                    name: base_name(&map.path).to_string(),
                    path: map.path.clone(),
                    base_address: map.start,
                    total_size: map.size,
                    size_human: String::new(),
                    is_executable: !exe_path.is_empty() && map.path == exe_path,
                });
            }
        }
    }

    for lib in &mut libraries {
        lib.size_human = format_bytes(lib.total_size);
    }
    libraries.sort_by(|a, b| {
        b.is_executable
            .cmp(&a.is_executable)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.path.cmp(&b.path))
    });
    libraries
}

/// Executable address ranges of one process, for resolving program counters.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    ranges: Vec<(u64, u64, String)>,
}

impl LibraryIndex {
    pub fn from_maps(maps: &[MemoryMap]) -> Self {
        let mut ranges: Vec<(u64, u64, String)> = maps
            .iter()
            .filter(|m| m.permissions.contains('x') && is_library_path(&m.path))
            .map(|m| (m.start, m.end, base_name(&m.path).to_string()))
            .collect();
        ranges.sort_by_key(|r| r.0);
        LibraryIndex { ranges }
    }

    pub fn lookup(&self, pc: u64) -> Option<&str> {
        let idx = self.ranges.partition_point(|r| r.0 <= pc);
        let (start, end, name) = self.ranges.get(idx.checked_sub(1)?)?;
        (pc >= *start && pc < *end).then_some(name.as_str())
    }
}
