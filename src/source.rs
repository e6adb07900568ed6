use std::io;
use std::time::Duration;

/// Outcome of waiting for a source to become readable
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Data (or end-of-data) can be read without blocking
    Ready,
    /// The wait elapsed without the source becoming readable
    TimedOut,
    /// The source has no readability primitive, reads block instead
    Unsupported,
}

/// Byte-oriented, unframed descriptor
///
/// This is the contract shared by the raw DMA stream and the optional timing-signal (event)
/// descriptor. There are no seek semantics. A read returning zero bytes signals end-of-data.
pub trait ByteSource {
    /// Read at most `buf.len()` bytes
    ///
    /// Returns [`io::ErrorKind::WouldBlock`] in non-blocking mode when nothing is buffered.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Wait until the source is readable, for at most `timeout`
    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<Readiness> {
        Ok(Readiness::Unsupported)
    }

    /// Whether the source is currently in non-blocking mode
    fn is_nonblocking(&self) -> io::Result<bool>;

    /// Switch the source into or out of non-blocking mode
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<Readiness> {
        (**self).wait_readable(timeout)
    }

    fn is_nonblocking(&self) -> io::Result<bool> {
        (**self).is_nonblocking()
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        (**self).set_nonblocking(nonblocking)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<Readiness> {
        (**self).wait_readable(timeout)
    }

    fn is_nonblocking(&self) -> io::Result<bool> {
        (**self).is_nonblocking()
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        (**self).set_nonblocking(nonblocking)
    }
}
