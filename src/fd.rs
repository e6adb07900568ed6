use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::{io, path::Path};

/// A convenience wrapper around open(2).
///
/// Returns the file descriptor on success.
/// In case of errors, the last OS error will be reported, aka errno on Linux.
///
/// # Arguments
///
/// * `path` - Path to the device node
/// * `flags` - Open flags
///
/// # Example
///
/// ```
/// use dmacap::fd;
///
/// let fd = fd::open("/dev/xdma0_c2h_0", libc::O_RDONLY);
/// ```
pub fn open<P: AsRef<Path>>(path: P, flags: i32) -> io::Result<RawFd> {
    let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let fd = unsafe { libc::open(c_path.as_ptr(), flags | libc::O_CLOEXEC) };
    if fd == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// A convenience wrapper around close(2).
///
/// In case of errors, the last OS error will be reported, aka errno on Linux.
///
/// # Arguments
///
/// * `fd` - File descriptor of a previously opened device
pub fn close(fd: RawFd) -> io::Result<()> {
    let ret = unsafe { libc::close(fd) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A convenience wrapper around read(2).
///
/// Returns the number of bytes read, zero meaning end-of-data.
/// A non-blocking descriptor with nothing buffered reports [`io::ErrorKind::WouldBlock`].
///
/// # Arguments
///
/// * `fd` - File descriptor
/// * `buf` - Destination, at most `buf.len()` bytes are requested
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// A convenience wrapper around pread(2).
///
/// # Arguments
///
/// * `fd` - File descriptor
/// * `buf` - Destination buffer
/// * `offset` - Byte offset inside the file or register window
pub fn pread(fd: RawFd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let ret = unsafe {
        libc::pread(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// A convenience wrapper around pwrite(2).
///
/// # Arguments
///
/// * `fd` - File descriptor
/// * `buf` - Source buffer
/// * `offset` - Byte offset inside the file or register window
pub fn pwrite(fd: RawFd, buf: &[u8], offset: u64) -> io::Result<usize> {
    let ret = unsafe {
        libc::pwrite(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            offset as libc::off_t,
        )
    };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Returns the file status flags (`F_GETFL`).
pub fn status_flags(fd: RawFd) -> io::Result<i32> {
    let ret = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Replaces the file status flags (`F_SETFL`).
pub fn set_status_flags(fd: RawFd, flags: i32) -> io::Result<()> {
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
