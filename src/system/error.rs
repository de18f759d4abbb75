use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcError {
    /// The process, thread or descriptor went away between listing and reading.
    #[error("{} no longer exists", path.display())]
    Vanished { path: PathBuf },

    #[error("permission denied reading {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    #[error("process monitoring is not supported on this platform")]
    Unsupported,
}

impl ProcError {
    /// Classify an I/O error raised while reading `path`.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => ProcError::Vanished {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => ProcError::PermissionDenied {
                path: path.to_path_buf(),
            },
            // ESRCH: the task died while the file was open.
            _ if source.raw_os_error() == Some(3) => ProcError::Vanished {
                path: path.to_path_buf(),
            },
            _ => ProcError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        ProcError::Malformed {
            what,
            detail: detail.into(),
        }
    }

    pub fn is_vanished(&self) -> bool {
        matches!(self, ProcError::Vanished { .. })
    }
}
