use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fmt, io, thread};

use crate::handle::Handle;
use crate::source::{ByteSource, Readiness};

/// Bounded wait for one timing-signal notification
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed delay used in polling mode
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(20);

/// Size of one event notification, a little-endian event counter
const EVENT_SIZE: usize = 4;

/// How the start of a frame read is timed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Wait for a hardware interrupt (VSYNC) notification on an event descriptor
    Interrupt,
    /// Sleep a fixed delay
    Polling,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Interrupt => write!(f, "interrupt"),
            SyncMode::Polling => write!(f, "polling"),
        }
    }
}

/// Result of waiting for a timing signal
///
/// `present == false` encodes a timeout (or polling mode), not an error.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub present: bool,
    pub raw_value: u32,
}

impl SyncEvent {
    /// No notification arrived (or none was waited for)
    pub fn missing() -> Self {
        SyncEvent::default()
    }

    /// A notification carrying the event counter `raw_value`
    pub fn received(raw_value: u32) -> Self {
        SyncEvent {
            present: true,
            raw_value,
        }
    }
}

/// Configuration degradation from interrupt-driven to polling synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downgrade {
    pub requested: SyncMode,
    pub effective: SyncMode,
    pub reason: String,
}

impl fmt::Display for Downgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sync unavailable ({}), using {} sync",
            self.requested, self.reason, self.effective
        )
    }
}

/// Decides when each frame read begins
pub struct SyncController<E> {
    mode: SyncMode,
    event: Option<E>,
    delay: Duration,
    timeout: Duration,
}

impl<E: ByteSource> SyncController<E> {
    /// Returns a controller that sleeps `delay` before every frame
    pub fn polling(delay: Duration) -> Self {
        SyncController {
            mode: SyncMode::Polling,
            event: None,
            delay,
            timeout: DEFAULT_EVENT_TIMEOUT,
        }
    }

    /// Returns a controller that waits on `event` for at most `timeout` before every frame
    pub fn interrupt(event: E, timeout: Duration) -> Self {
        SyncController {
            mode: SyncMode::Interrupt,
            event: Some(event),
            delay: DEFAULT_POLL_DELAY,
            timeout,
        }
    }

    /// Builds the controller for the requested mode, falling back to polling
    ///
    /// Interrupt mode without an event source is not an error: the controller switches to
    /// polling and the degradation is returned for the caller to report.
    ///
    /// # Arguments
    ///
    /// * `requested` - Desired mode
    /// * `event` - Event source, if one could be opened
    /// * `delay` - Polling delay
    /// * `timeout` - Interrupt wait bound
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use dmacap::sync::{SyncController, SyncMode};
    /// use dmacap::Handle;
    ///
    /// let (controller, downgrade) = SyncController::<Handle>::negotiate(
    ///     SyncMode::Interrupt,
    ///     None,
    ///     Duration::from_millis(20),
    ///     Duration::from_secs(2),
    /// );
    /// assert_eq!(controller.mode(), SyncMode::Polling);
    /// assert!(downgrade.is_some());
    /// ```
    pub fn negotiate(
        requested: SyncMode,
        event: Option<E>,
        delay: Duration,
        timeout: Duration,
    ) -> (Self, Option<Downgrade>) {
        match (requested, event) {
            (SyncMode::Interrupt, Some(event)) => {
                let mut controller = Self::interrupt(event, timeout);
                controller.delay = delay;
                (controller, None)
            }
            (SyncMode::Interrupt, None) => {
                let mut controller = Self::polling(delay);
                controller.timeout = timeout;
                let downgrade = Downgrade {
                    requested: SyncMode::Interrupt,
                    effective: SyncMode::Polling,
                    reason: "no event device could be opened".to_string(),
                };
                (controller, Some(downgrade))
            }
            (SyncMode::Polling, _) => {
                let mut controller = Self::polling(delay);
                controller.timeout = timeout;
                (controller, None)
            }
        }
    }

    /// Mode in effect
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Waits for the go signal of the next frame
    ///
    /// In interrupt mode a missing notification after the bounded wait yields
    /// `present == false`. In polling mode this always sleeps and yields `present == false`.
    pub fn await_frame_start(&mut self) -> io::Result<SyncEvent> {
        match (self.mode, self.event.as_mut()) {
            (SyncMode::Interrupt, Some(event)) => wait_for_event(event, self.timeout),
            _ => {
                thread::sleep(self.delay);
                Ok(SyncEvent::missing())
            }
        }
    }

    /// Releases the event source, the controller falls back to polling
    pub fn take_event(&mut self) -> Option<E> {
        self.mode = SyncMode::Polling;
        self.event.take()
    }
}

fn wait_for_event<E: ByteSource + ?Sized>(event: &mut E, timeout: Duration) -> io::Result<SyncEvent> {
    if event.wait_readable(timeout)? == Readiness::TimedOut {
        return Ok(SyncEvent::missing());
    }

    let mut buf = [0u8; EVENT_SIZE];
    let mut filled = 0;
    while filled < EVENT_SIZE {
        match event.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            // a signal ends the wait like a timeout does
            Err(e) if e.kind() == io::ErrorKind::Interrupted => break,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }

    if filled == EVENT_SIZE {
        Ok(SyncEvent::received(u32::from_le_bytes(buf)))
    } else {
        Ok(SyncEvent::missing())
    }
}

/// Opens the first event node that can be opened
///
/// `preferred` is tried first, then `candidates` in order; duplicates are skipped. The error of
/// the last failed attempt is returned when nothing opens.
pub fn open_event_node(
    preferred: Option<&Path>,
    candidates: &[PathBuf],
) -> io::Result<(Handle, PathBuf)> {
    let mut tried: Vec<&Path> = Vec::new();
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no event device configured");

    for path in preferred.into_iter().chain(candidates.iter().map(PathBuf::as_path)) {
        if tried.contains(&path) {
            continue;
        }
        tried.push(path);

        match Handle::open(path) {
            Ok(handle) => return Ok((handle, path.to_path_buf())),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "event device unavailable");
                last_err = e;
            }
        }
    }

    Err(last_err)
}
