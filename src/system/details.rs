//! On-demand drill-down records for a single process.

use serde::Serialize;

use super::process::ProcessState;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ThreadInfo {
    pub tid: u32,
    pub name: String,
    pub state: ProcessState,
    pub priority: i64,
    /// CPU the thread last ran on.
    pub processor: i32,
    pub user_ticks: u64,
    pub kernel_ticks: u64,
    /// Library holding the thread's last known program counter, if any.
    pub current_library: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FileKind {
    Socket,
    Pipe,
    Anon,
    File,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Unknown,
}

impl FileKind {
    pub fn label(self) -> &'static str {
        match self {
            FileKind::Socket => "socket",
            FileKind::Pipe => "pipe",
            FileKind::Anon => "anon",
            FileKind::File => "file",
            FileKind::Directory => "dir",
            FileKind::CharDevice => "char",
            FileKind::BlockDevice => "block",
            FileKind::Fifo => "fifo",
            FileKind::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileHandle {
    pub fd: u32,
    pub kind: FileKind,
    pub target: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Protocol {
    Tcp,
    Tcp6,
    Udp,
    Udp6,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [Protocol::Tcp, Protocol::Tcp6, Protocol::Udp, Protocol::Udp6];

    /// File name under `/proc/net`.
    pub fn table_name(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Tcp6 => "tcp6",
            Protocol::Udp => "udp",
            Protocol::Udp6 => "udp6",
        }
    }

    /// Transport name as used by the services database.
    pub fn transport(self) -> &'static str {
        match self {
            Protocol::Tcp | Protocol::Tcp6 => "tcp",
            Protocol::Udp | Protocol::Udp6 => "udp",
        }
    }

    pub fn is_tcp(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Tcp6)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NetworkConnection {
    pub protocol: Protocol,
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
    /// TCP state name; empty for UDP.
    pub state: String,
    pub inode: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryMap {
    pub start: u64,
    pub end: u64,
    pub size: u64,
    pub size_human: String,
    pub permissions: String,
    pub offset: u64,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Library {
    pub name: String,
    pub path: String,
    pub base_address: u64,
    pub total_size: u64,
    pub size_human: String,
    pub is_executable: bool,
}
