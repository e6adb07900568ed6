use std::time::{Duration, Instant};
use std::{io, thread};

use crate::buffer::RawBlock;
use crate::source::{ByteSource, Readiness};

/// Deadline applied to one frame read unless configured otherwise
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between attempts on a non-blocking source that cannot wait for readability
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// Streaming read parameters
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    /// Give up accumulating once this much time has passed, `None` waits forever
    pub timeout: Option<Duration>,
    /// Upper bound for a single read request, `None` requests everything at once
    pub max_chunk: Option<usize>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            timeout: Some(DEFAULT_READ_TIMEOUT),
            max_chunk: None,
        }
    }
}

/// Accumulates up to `size` bytes from `src`
///
/// Reads are issued in requests of at most `max_chunk` bytes until `size` bytes are collected,
/// the source reports end-of-data or the deadline elapses. Whatever was collected is returned,
/// never more than `size` bytes and never padded. Deciding whether a short block is usable is
/// up to the caller.
///
/// A failing read is reported as an error and is distinct from a short block: a short block
/// can be dropped and resynchronized, a read error means the stream can no longer be trusted.
///
/// # Arguments
///
/// * `src` - Byte source, e.g. a DMA stream [`crate::Handle`]
/// * `size` - Number of bytes to collect
/// * `opts` - Deadline and chunking
///
/// # Example
///
/// ```no_run
/// use dmacap::reader::{read_exact, ReadOptions};
/// use dmacap::Handle;
///
/// let mut stream = Handle::open("/dev/xdma0_c2h_0").unwrap();
/// let block = read_exact(&mut stream, 1920 * 1080 * 4, &ReadOptions::default()).unwrap();
/// println!("{} bytes in {} read() calls", block.len(), block.read_calls());
/// ```
pub fn read_exact<S: ByteSource + ?Sized>(
    src: &mut S,
    size: usize,
    opts: &ReadOptions,
) -> io::Result<RawBlock> {
    if size == 0 {
        return Ok(RawBlock::default());
    }

    let chunk = opts.max_chunk.filter(|&c| c > 0).unwrap_or(size).min(size);
    // a deadline past the clock's range means waiting forever
    let deadline = opts
        .timeout
        .and_then(|timeout| Instant::now().checked_add(timeout));

    let mut data = Vec::with_capacity(size);
    let mut read_calls = 0;
    let mut timed_out = false;
    let mut eof = false;
    let mut pollable = true;

    while data.len() < size {
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                timed_out = true;
                break;
            }

            if pollable {
                match src.wait_readable(deadline - now)? {
                    Readiness::Ready => {}
                    Readiness::TimedOut => continue,
                    Readiness::Unsupported => pollable = false,
                }
            }
        }

        let start = data.len();
        let want = chunk.min(size - start);
        data.resize(start + want, 0);

        let res = src.read(&mut data[start..]);
        read_calls += 1;
        match res {
            Ok(0) => {
                data.truncate(start);
                eof = true;
                break;
            }
            Ok(n) => data.truncate(start + n.min(want)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => data.truncate(start),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                data.truncate(start);
                if deadline.is_none() {
                    // nothing buffered and no deadline to wait against
                    break;
                }
                if !pollable {
                    thread::sleep(WOULD_BLOCK_BACKOFF);
                }
            }
            Err(e) => return Err(e),
        }
    }

    tracing::trace!(
        requested = size,
        received = data.len(),
        read_calls,
        timed_out,
        eof,
        "stream read finished"
    );

    Ok(RawBlock::new(data, read_calls, timed_out, eof))
}
