//! Scripted sources and an in-memory register file for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::register::RegisterAccess;
use crate::source::{ByteSource, Readiness};

#[derive(Debug, Clone)]
pub enum Step {
    /// Bytes delivered by the next reads, possibly split across several calls
    Data(Vec<u8>),
    /// A non-blocking read with nothing buffered
    WouldBlock,
    /// A readiness wait that elapses without data
    NotReady,
    /// A read interrupted by a signal
    Interrupted,
    /// End-of-data
    Eof,
    /// A hard read failure
    Error(io::ErrorKind),
}

/// Shared view on a [`ScriptedSource`] that survives the source being moved or dropped
#[derive(Debug, Clone, Default)]
pub struct Tracker {
    pub closed: Rc<Cell<bool>>,
    pub nonblocking: Rc<Cell<bool>>,
    pub reads: Rc<Cell<usize>>,
    pub mode_changes: Rc<Cell<usize>>,
}

#[derive(Debug)]
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    pending: Vec<u8>,
    pollable: bool,
    tracker: Tracker,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        ScriptedSource {
            steps: steps.into(),
            pending: Vec::new(),
            pollable: true,
            tracker: Tracker::default(),
        }
    }

    /// Source whose bytes are the concatenation of `chunks`, followed by end-of-data
    pub fn from_chunks<I: IntoIterator<Item = Vec<u8>>>(chunks: I) -> Self {
        Self::new(chunks.into_iter().map(Step::Data).collect())
    }

    /// Source without a readability primitive
    pub fn without_poll(mut self) -> Self {
        self.pollable = false;
        self
    }

    pub fn start_nonblocking(self) -> Self {
        self.tracker.nonblocking.set(true);
        self
    }

    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.tracker.closed.set(true);
    }
}

impl ByteSource for ScriptedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.tracker.reads.set(self.tracker.reads.get() + 1);
        if !self.pending.is_empty() {
            return Ok(self.take_pending(buf));
        }

        loop {
            match self.steps.pop_front() {
                None | Some(Step::Eof) => return Ok(0),
                Some(Step::Data(data)) => {
                    self.pending = data;
                    return Ok(self.take_pending(buf));
                }
                Some(Step::WouldBlock) => {
                    return Err(io::Error::from(io::ErrorKind::WouldBlock));
                }
                Some(Step::NotReady) => {
                    // a blocking read simply waits the gap out
                    if self.tracker.nonblocking.get() {
                        return Err(io::Error::from(io::ErrorKind::WouldBlock));
                    }
                }
                Some(Step::Interrupted) => {
                    return Err(io::Error::from(io::ErrorKind::Interrupted));
                }
                Some(Step::Error(kind)) => return Err(io::Error::from(kind)),
            }
        }
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<Readiness> {
        if !self.pollable {
            return Ok(Readiness::Unsupported);
        }
        if !self.pending.is_empty() {
            return Ok(Readiness::Ready);
        }
        match self.steps.front() {
            Some(Step::NotReady) | Some(Step::WouldBlock) => {
                self.steps.pop_front();
                Ok(Readiness::TimedOut)
            }
            _ => Ok(Readiness::Ready),
        }
    }

    fn is_nonblocking(&self) -> io::Result<bool> {
        Ok(self.tracker.nonblocking.get())
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.tracker.mode_changes.set(self.tracker.mode_changes.get() + 1);
        self.tracker.nonblocking.set(nonblocking);
        Ok(())
    }
}

/// Little-endian event counter notifications, as an event node delivers them
pub fn event_steps(counts: &[Option<u32>]) -> Vec<Step> {
    counts
        .iter()
        .map(|count| match count {
            Some(count) => Step::Data(count.to_le_bytes().to_vec()),
            None => Step::NotReady,
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct MemRegisters {
    pub values: Rc<RefCell<HashMap<u32, u32>>>,
    pub writes: Rc<RefCell<Vec<(u32, u32)>>>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl MemRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, offset: u32, value: u32) -> Self {
        self.values.borrow_mut().insert(offset, value);
        self
    }

    pub fn failing() -> Self {
        MemRegisters {
            fail_reads: true,
            fail_writes: true,
            ..Self::default()
        }
    }
}

impl RegisterAccess for MemRegisters {
    fn read_register(&mut self, offset: u32) -> io::Result<u32> {
        if self.fail_reads {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        Ok(self.values.borrow().get(&offset).copied().unwrap_or(0))
    }

    fn write_register(&mut self, offset: u32, value: u32) -> io::Result<()> {
        self.writes.borrow_mut().push((offset, value));
        if self.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.values.borrow_mut().insert(offset, value);
        Ok(())
    }
}
