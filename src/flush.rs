use std::io;

use crate::source::ByteSource;

/// Bytes requested per read while draining
pub const FLUSH_CHUNK: usize = 64 * 1024;

/// Puts a source into non-blocking mode and restores the original mode when dropped
struct NonBlocking<'a, S: ByteSource + ?Sized> {
    src: &'a mut S,
    was_nonblocking: bool,
    restored: bool,
}

impl<'a, S: ByteSource + ?Sized> NonBlocking<'a, S> {
    fn enter(src: &'a mut S) -> io::Result<Self> {
        let was_nonblocking = src.is_nonblocking()?;
        src.set_nonblocking(true)?;

        Ok(NonBlocking {
            src,
            was_nonblocking,
            restored: false,
        })
    }

    fn restore(mut self) -> io::Result<()> {
        self.restored = true;
        self.src.set_nonblocking(self.was_nonblocking)
    }
}

impl<S: ByteSource + ?Sized> Drop for NonBlocking<'_, S> {
    fn drop(&mut self) {
        if !self.restored {
            // ignore errors, the drain error is the one that gets reported
            let _ = self.src.set_nonblocking(self.was_nonblocking);
        }
    }
}

/// Discards everything the source has already buffered
///
/// DMA ring buffers keep bytes from before capture was enabled or from a previous,
/// unsynchronized session. Draining them first keeps the next read from starting mid-frame.
///
/// The source is switched to non-blocking mode and read in [`FLUSH_CHUNK`] requests until it
/// would block or reports end-of-data. The original blocking mode is restored on every path.
///
/// Returns the number of discarded bytes.
///
/// # Example
///
/// ```no_run
/// use dmacap::{flush, Handle};
///
/// let mut stream = Handle::open("/dev/xdma0_c2h_0").unwrap();
/// let stale = flush::flush(&mut stream).unwrap();
/// println!("flushed {} bytes of stale data", stale);
/// ```
pub fn flush<S: ByteSource + ?Sized>(src: &mut S) -> io::Result<usize> {
    let mut guard = NonBlocking::enter(src)?;
    let mut buf = vec![0u8; FLUSH_CHUNK];
    let mut discarded = 0;

    loop {
        match guard.src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => discarded += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    guard.restore()?;
    Ok(discarded)
}
