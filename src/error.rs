use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::session::State;

/// Session-level errors
///
/// Short reads, timing-signal timeouts, missing boundaries and other degradations are not
/// errors; they are recorded in the session diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    #[error("device not found: {}", path.display())]
    DeviceNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("stream read failed: {0}")]
    Read(#[source] io::Error),

    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        state: State,
        operation: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classifies a failure to open a device node
    pub fn open(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            io::ErrorKind::NotFound => Error::DeviceNotFound { path, source },
            io::ErrorKind::PermissionDenied => Error::PermissionDenied { path, source },
            _ => Error::Open { path, source },
        }
    }

    /// Whether the error ends the session before capture could start
    pub fn is_fatal_session(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotFound { .. }
                | Error::PermissionDenied { .. }
                | Error::Open { .. }
                | Error::InvalidConfig(_)
        )
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        1
    }
}
