use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{io, mem};

use crate::fd;
use crate::pselect;
use crate::source::{ByteSource, Readiness};

/// Owned descriptor of a character device node
///
/// The descriptor is closed when the handle is dropped.
#[derive(Debug)]
pub struct Handle {
    /// File descriptor
    fd: RawFd,
    /// Device node path, if the handle was opened by path
    path: Option<PathBuf>,
}

impl Handle {
    /// Opens a device node in read only mode
    ///
    /// # Arguments
    ///
    /// * `path` - Node path, e.g. a DMA card-to-host channel or an event node
    ///
    /// # Example
    ///
    /// ```
    /// use dmacap::Handle;
    /// let stream = Handle::open("/dev/xdma0_c2h_0");
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::with_flags(path, libc::O_RDONLY)
    }

    /// Opens a device node with explicit open flags
    ///
    /// # Arguments
    ///
    /// * `path` - Node path
    /// * `flags` - Open flags, e.g. `libc::O_RDWR` for a register window
    pub fn with_flags<P: AsRef<Path>>(path: P, flags: i32) -> io::Result<Self> {
        let path = path.as_ref();
        let fd = fd::open(path, flags)?;

        Ok(Handle {
            fd,
            path: Some(PathBuf::from(path)),
        })
    }

    /// Returns the raw fd of the device
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Returns the device node path, if known
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes the descriptor, reporting errors that dropping would swallow
    pub fn close(self) -> io::Result<()> {
        let fd = self.fd;
        mem::forget(self);
        fd::close(fd)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // ignore errors
        let _ = fd::close(self.fd);
    }
}

impl AsRawFd for Handle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for Handle {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Handle { fd, path: None }
    }
}

impl IntoRawFd for Handle {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.fd;
        mem::forget(self);
        fd
    }
}

impl ByteSource for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        fd::read(self.fd, buf)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<Readiness> {
        match pselect::wait_readable(self.fd, timeout) {
            Ok(true) => Ok(Readiness::Ready),
            Ok(false) => Ok(Readiness::TimedOut),
            // descriptors beyond FD_SETSIZE cannot be waited on, fall back to blocking reads
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(Readiness::Unsupported),
            Err(e) => Err(e),
        }
    }

    fn is_nonblocking(&self) -> io::Result<bool> {
        Ok(fd::status_flags(self.fd)? & libc::O_NONBLOCK != 0)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        let flags = fd::status_flags(self.fd)?;
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        fd::set_status_flags(self.fd, flags)
    }
}
