use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fmt, thread};

use tracing::{debug, error, info, warn};

use crate::buffer::{Flags, FrameBuffer, Metadata};
use crate::config::{CaptureConfig, Framing, Policy};
use crate::error::{Error, Result};
use crate::fiducial::{self, Confidence};
use crate::flush;
use crate::handle::Handle;
use crate::reader;
use crate::register::{self, DeviceStatus, RegisterAccess, UserRegisters};
use crate::source::ByteSource;
use crate::sync::{self, Downgrade, SyncController, SyncEvent, SyncMode};
use crate::Timestamp;

/// Wait between a soft reset and enabling capture
const RESET_RECOVERY: Duration = Duration::from_millis(100);

/// Lifecycle of a capture session
///
/// A session value only exists once its descriptors are open; a failed open never yields one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Descriptors open, capture not enabled yet
    Opened,
    /// Control register written, stale data flushed
    Enabled,
    /// Frames are being acquired
    Capturing,
    /// Capture disabled and descriptors closed
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Opened => write!(f, "opened"),
            State::Enabled => write!(f, "enabled"),
            State::Capturing => write!(f, "capturing"),
            State::Closed => write!(f, "closed"),
        }
    }
}

/// Cooperative cancellation
///
/// Checked between frames; a read in progress always completes first.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a session stopped capturing before the requested frame count
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// A timed read returned neither a full frame nor nothing; the stream offset is unknown
    Desync {
        frame: u64,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Desync {
                frame,
                expected,
                actual,
            } => write!(
                f,
                "short read on frame {} ({} of {} bytes), stream desynchronized",
                frame, actual, expected
            ),
        }
    }
}

/// Why a single frame was dropped without ending the session
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The read produced no bytes
    Empty,
    /// No timing signal arrived (strict policy)
    SyncTimeout,
    /// No frame boundary in the block (strict policy)
    BoundaryNotFound,
    /// Not a single complete row after the frame start
    NoCompleteRow,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Empty => write!(f, "no data"),
            SkipReason::SyncTimeout => write!(f, "timing signal timeout"),
            SkipReason::BoundaryNotFound => write!(f, "frame boundary not found"),
            SkipReason::NoCompleteRow => write!(f, "no complete row"),
        }
    }
}

/// Result of one capture request
#[derive(Debug)]
pub enum FrameOutcome {
    Captured(FrameBuffer),
    Skipped(SkipReason),
    Aborted(AbortReason),
}

/// Running acquisition counters of a session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    /// Interrupt sync was requested but polling is in effect
    pub downgrade: Option<Downgrade>,
    /// Bytes drained before the first frame
    pub stale_bytes: usize,
    pub warmup_frames: u32,
    pub captured: u64,
    pub skipped: u64,
    pub short_read_aborts: u64,
    pub read_timeouts: u64,
    pub sync_timeouts: u64,
    /// Frame starts recovered away from the read position
    pub resyncs: u64,
    pub boundary_misses: u64,
    pub register_failures: u64,
}

/// Final report of [`Session::run`]
#[derive(Debug, Clone)]
pub struct Summary {
    pub requested: u64,
    pub diagnostics: Diagnostics,
    pub abort: Option<AbortReason>,
    /// Capture ended early on request
    pub stopped: bool,
    pub elapsed: Duration,
}

impl Summary {
    pub fn captured(&self) -> u64 {
        self.diagnostics.captured
    }

    /// Completed without a desynchronization abort
    pub fn is_success(&self) -> bool {
        self.abort.is_none()
    }

    /// Average delivered frames per second
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.captured() as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let diag = &self.diagnostics;
        writeln!(f, "frames captured : {}/{}", diag.captured, self.requested)?;
        writeln!(f, "skipped         : {}", diag.skipped)?;
        writeln!(f, "short reads     : {}", diag.short_read_aborts)?;
        writeln!(f, "read timeouts   : {}", diag.read_timeouts)?;
        writeln!(f, "sync timeouts   : {}", diag.sync_timeouts)?;
        writeln!(f, "resyncs         : {}", diag.resyncs)?;
        writeln!(f, "boundary misses : {}", diag.boundary_misses)?;
        if let Some(downgrade) = &diag.downgrade {
            writeln!(f, "sync            : {}", downgrade)?;
        }
        if let Some(abort) = &self.abort {
            writeln!(f, "aborted         : {}", abort)?;
        }
        writeln!(f, "elapsed         : {:.2} s", self.elapsed.as_secs_f64())?;
        writeln!(f, "average fps     : {:.2}", self.fps())?;
        Ok(())
    }
}

/// Session on real device nodes
pub type DeviceSession = Session<Handle, Handle, UserRegisters>;

/// One capture session against one stream source
///
/// The session exclusively owns the stream descriptor, the optional event descriptor and the
/// register access. Capture is disabled and the descriptors are closed by [`Session::close`],
/// or when the session is dropped, whatever happened to individual frames.
pub struct Session<S: ByteSource, E: ByteSource, R: RegisterAccess> {
    config: CaptureConfig,
    stream: Option<S>,
    sync: SyncController<E>,
    registers: R,
    state: State,
    sequence: u64,
    diagnostics: Diagnostics,
    abort: Option<AbortReason>,
    stop: StopHandle,
}

impl Session<Handle, Handle, UserRegisters> {
    /// Opens the device nodes named in `config`
    ///
    /// The stream and register nodes must open; nothing is written to the device otherwise.
    /// An event node is only opened for interrupt sync, and failing to open one downgrades the
    /// session to polling.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dmacap::{CaptureConfig, Session};
    ///
    /// let mut session = Session::open(CaptureConfig::default()).unwrap();
    /// session.start().unwrap();
    /// let summary = session
    ///     .run(4, |frame| {
    ///         println!("frame {}: {} bytes", frame.meta().sequence, frame.len());
    ///         std::ops::ControlFlow::Continue(())
    ///     })
    ///     .unwrap();
    /// session.close();
    /// print!("{}", summary);
    /// ```
    pub fn open(config: CaptureConfig) -> Result<Self> {
        config.validate()?;

        let stream =
            Handle::open(&config.stream_path).map_err(|e| Error::open(&config.stream_path, e))?;
        info!(path = %config.stream_path.display(), "opened stream device");

        let registers = UserRegisters::open(&config.register_path)
            .map_err(|e| Error::open(&config.register_path, e))?;

        let event = match config.sync {
            SyncMode::Interrupt => {
                match sync::open_event_node(config.event_path.as_deref(), &config.event_candidates)
                {
                    Ok((handle, path)) => {
                        info!(path = %path.display(), "opened event device for frame sync");
                        Some(handle)
                    }
                    Err(e) => {
                        warn!(error = %e, "could not open any event device");
                        None
                    }
                }
            }
            SyncMode::Polling => None,
        };

        Self::from_parts(config, stream, event, registers)
    }
}

impl<S: ByteSource, E: ByteSource, R: RegisterAccess> Session<S, E, R> {
    /// Builds a session from already opened parts
    ///
    /// # Arguments
    ///
    /// * `config` - Session configuration, validated here
    /// * `stream` - Raw byte stream
    /// * `event` - Timing-signal source, `None` when unavailable
    /// * `registers` - Control register access
    pub fn from_parts(config: CaptureConfig, stream: S, event: Option<E>, registers: R) -> Result<Self> {
        config.validate()?;

        let (sync, downgrade) = SyncController::negotiate(
            config.sync,
            event,
            config.poll_delay,
            config.event_timeout,
        );
        if let Some(downgrade) = &downgrade {
            warn!("{}", downgrade);
        }
        info!(mode = %sync.mode(), "frame sync configured");

        Ok(Session {
            config,
            stream: Some(stream),
            sync,
            registers,
            state: State::Opened,
            sequence: 0,
            diagnostics: Diagnostics {
                downgrade,
                ..Diagnostics::default()
            },
            abort: None,
            stop: StopHandle::default(),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Synchronization mode in effect
    pub fn sync_mode(&self) -> SyncMode {
        self.sync.mode()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Handle to request a stop between frames, usable from other threads
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Snapshot of the identification and state registers
    pub fn device_status(&mut self) -> DeviceStatus {
        DeviceStatus::query(&mut self.registers)
    }

    /// Enables capture and drains stale data
    ///
    /// A control register write that fails is logged and capture proceeds regardless, since
    /// the transport may not be able to confirm writes.
    pub fn start(&mut self) -> Result<()> {
        if self.state != State::Opened {
            return Err(Error::InvalidState {
                state: self.state,
                operation: "start",
            });
        }

        debug!("device status before enable:\n{}", self.device_status());

        if self.config.soft_reset {
            info!("performing soft reset");
            if let Err(e) = register::soft_reset(&mut self.registers) {
                warn!(error = %e, "soft reset failed");
                self.diagnostics.register_failures += 1;
            }
            thread::sleep(RESET_RECOVERY);
        }

        info!(test_pattern = self.config.test_pattern, "enabling video capture");
        if let Err(e) = register::enable(&mut self.registers, self.config.test_pattern) {
            warn!(error = %e, "could not enable capture via register, trying anyway");
            self.diagnostics.register_failures += 1;
        }
        self.state = State::Enabled;

        thread::sleep(self.config.settle);

        if self.config.flush_stale {
            let stale = flush::flush(self.stream_mut()?).map_err(Error::Read)?;
            if stale > 0 {
                info!("flushed {} bytes of stale data", stale);
            }
            self.diagnostics.stale_bytes += stale;
        }

        Ok(())
    }

    /// Acquires one frame
    ///
    /// The first call after [`Session::start`] discards the configured warm-up frames. Once the
    /// session aborted on a desynchronized stream, every further call reports the abort without
    /// touching the stream.
    pub fn capture_frame(&mut self) -> Result<FrameOutcome> {
        match self.state {
            State::Enabled => {
                self.state = State::Capturing;
                self.warm_up()?;
            }
            State::Capturing => {}
            state => {
                return Err(Error::InvalidState {
                    state,
                    operation: "capture",
                })
            }
        }

        if let Some(abort) = &self.abort {
            return Ok(FrameOutcome::Aborted(abort.clone()));
        }

        let outcome = self.acquire()?;
        match &outcome {
            FrameOutcome::Captured(_) => self.diagnostics.captured += 1,
            FrameOutcome::Skipped(reason) => {
                warn!(
                    "failed to capture frame {}: {}",
                    self.attempt_number(),
                    reason
                );
                self.diagnostics.skipped += 1;
            }
            FrameOutcome::Aborted(abort) => {
                error!("{}, aborting", abort);
                self.diagnostics.short_read_aborts += 1;
                self.abort = Some(abort.clone());
            }
        }

        Ok(outcome)
    }

    /// Acquires up to `count` frames, handing each one to `sink`
    ///
    /// Capture ends early when the stream desynchronizes, a stop is requested or `sink`
    /// breaks. Skipped frames count against `count`.
    pub fn run<F>(&mut self, count: u64, mut sink: F) -> Result<Summary>
    where
        F: FnMut(FrameBuffer) -> ControlFlow<()>,
    {
        info!("capturing {} frame(s)", count);
        let started = Instant::now();
        let mut stopped = false;

        for _ in 0..count {
            if self.stop.is_stopped() {
                info!("stop requested");
                stopped = true;
                break;
            }

            match self.capture_frame()? {
                FrameOutcome::Captured(frame) => {
                    if sink(frame).is_break() {
                        stopped = true;
                        break;
                    }
                }
                FrameOutcome::Skipped(_) => {}
                FrameOutcome::Aborted(_) => break,
            }
        }

        Ok(Summary {
            requested: count,
            diagnostics: self.diagnostics.clone(),
            abort: self.abort.clone(),
            stopped,
            elapsed: started.elapsed(),
        })
    }

    /// Disables capture and closes the descriptors
    ///
    /// Runs on every exit path; calling it again is a no-op.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }

        if let Err(e) = register::disable(&mut self.registers) {
            warn!(error = %e, "could not disable capture via register");
            self.diagnostics.register_failures += 1;
        }

        drop(self.stream.take());
        drop(self.sync.take_event());
        self.state = State::Closed;
        debug!("session closed");
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        let state = self.state;
        self.stream.as_mut().ok_or(Error::InvalidState {
            state,
            operation: "read",
        })
    }

    fn attempt_number(&self) -> u64 {
        self.diagnostics.captured + self.diagnostics.skipped + 1
    }

    fn warm_up(&mut self) -> Result<()> {
        let frames = self.config.warmup_frames;
        if frames == 0 {
            return Ok(());
        }

        debug!("discarding {} frame(s) for warm-up", frames);
        let size = self.config.read_size();
        let opts = self.config.read_options();
        for n in 1..=frames {
            self.await_sync();
            let block = reader::read_exact(self.stream_mut()?, size, &opts).map_err(Error::Read)?;
            debug!(
                "warm-up {}/{}: {} bytes, read() calls: {}",
                n,
                frames,
                block.len(),
                block.read_calls()
            );
            self.diagnostics.warmup_frames += 1;
        }

        Ok(())
    }

    fn await_sync(&mut self) -> SyncEvent {
        match self.sync.await_frame_start() {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "waiting for the timing signal failed");
                SyncEvent::missing()
            }
        }
    }

    fn acquire(&mut self) -> Result<FrameOutcome> {
        let geometry = self.config.geometry;
        let strict = self.config.policy == Policy::Strict;
        let mut flags = Flags::empty();

        let event = self.await_sync();
        if self.sync.mode() == SyncMode::Polling {
            flags |= Flags::UNSYNCHRONIZED;
        } else if event.present {
            debug!(events = event.raw_value, "timing signal received");
        } else {
            self.diagnostics.sync_timeouts += 1;
            flags |= Flags::SYNC_TIMEOUT;
            if strict {
                let stale = flush::flush(self.stream_mut()?).map_err(Error::Read)?;
                debug!("timing signal timeout, flushed {} bytes", stale);
                self.diagnostics.resyncs += 1;
                return Ok(FrameOutcome::Skipped(SkipReason::SyncTimeout));
            }
            warn!("timing signal timeout, capturing anyway");
        }

        let size = self.config.read_size();
        let opts = self.config.read_options();
        let block = reader::read_exact(self.stream_mut()?, size, &opts).map_err(Error::Read)?;
        debug!(
            bytes = block.len(),
            read_calls = block.read_calls(),
            "stream read complete"
        );

        if block.timed_out() {
            self.diagnostics.read_timeouts += 1;
            flags |= Flags::READ_TIMEOUT;
        }
        if block.is_empty() {
            return Ok(FrameOutcome::Skipped(SkipReason::Empty));
        }

        let read_calls = block.read_calls();
        let mut unaligned = None;
        let (data, rows, alignment) = match self.config.framing {
            Framing::Timed => {
                if block.len() != geometry.frame_size() {
                    return Ok(FrameOutcome::Aborted(AbortReason::Desync {
                        frame: self.attempt_number(),
                        expected: geometry.frame_size(),
                        actual: block.len(),
                    }));
                }
                (block.into_vec(), geometry.height(), None)
            }
            Framing::Fiducial { .. } => {
                let alignment = fiducial::find_frame_start(block.data(), &geometry);
                let offset = if alignment.found {
                    match alignment.confidence {
                        Confidence::Exact => flags |= Flags::ALIGNED,
                        Confidence::Assumed => flags |= Flags::ASSUMED_START,
                    }
                    if alignment.byte_offset != 0 {
                        self.diagnostics.resyncs += 1;
                    }
                    debug!(
                        offset = alignment.byte_offset,
                        row = alignment.byte_offset / geometry.row_stride(),
                        confidence = %alignment.confidence,
                        "found frame start"
                    );
                    alignment.byte_offset
                } else {
                    self.diagnostics.boundary_misses += 1;
                    if strict {
                        return Ok(FrameOutcome::Skipped(SkipReason::BoundaryNotFound));
                    }
                    warn!("could not find frame boundary, using offset 0");
                    flags |= Flags::ASSUMED_START;
                    0
                };

                if self.config.keep_unaligned {
                    let (raw, _) = fiducial::extract_frame(block.data(), 0, &geometry);
                    unaligned = Some(raw.to_vec());
                }

                let (bytes, rows) = fiducial::extract_frame(block.data(), offset, &geometry);
                if rows == 0 {
                    return Ok(FrameOutcome::Skipped(SkipReason::NoCompleteRow));
                }
                (bytes.to_vec(), rows, Some(alignment))
            }
        };

        if rows < geometry.height() {
            warn!("incomplete frame: {} of {} rows", rows, geometry.height());
            flags |= Flags::SHORT;
        }

        self.sequence += 1;
        let meta = Metadata {
            sequence: self.sequence,
            timestamp: Timestamp::now(),
            read_calls,
            sync: event,
            alignment,
            flags,
        };

        let mut frame = FrameBuffer::new(data, geometry.width(), rows, geometry.layout(), meta);
        if let Some(raw) = unaligned {
            frame = frame.with_unaligned(raw);
        }

        Ok(FrameOutcome::Captured(frame))
    }
}

impl<S: ByteSource, E: ByteSource, R: RegisterAccess> Drop for Session<S, E, R> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiducial::render_calibration_frame;
    use crate::geometry::{FrameGeometry, PixelLayout};
    use crate::mock::{event_steps, MemRegisters, ScriptedSource, Step};
    use crate::register::Register;
    use std::io;

    fn config(geometry: FrameGeometry) -> CaptureConfig {
        CaptureConfig {
            geometry,
            poll_delay: Duration::ZERO,
            settle: Duration::ZERO,
            ..CaptureConfig::default()
        }
    }

    fn small() -> FrameGeometry {
        FrameGeometry::new(16, 8, PixelLayout::Bgrx8888).unwrap()
    }

    fn frame(geometry: &FrameGeometry, fill: u8) -> Vec<u8> {
        vec![fill; geometry.frame_size()]
    }

    /// Stream script: nothing stale, then the given chunks
    fn stream(chunks: Vec<Vec<u8>>) -> ScriptedSource {
        let mut steps = vec![Step::WouldBlock];
        steps.extend(chunks.into_iter().map(Step::Data));
        ScriptedSource::new(steps)
    }

    fn collect<S: ByteSource, E: ByteSource, R: RegisterAccess>(
        session: &mut Session<S, E, R>,
        count: u64,
    ) -> (Summary, Vec<FrameBuffer>) {
        let mut frames = Vec::new();
        let summary = session
            .run(count, |frame| {
                frames.push(frame);
                ControlFlow::Continue(())
            })
            .unwrap();
        (summary, frames)
    }

    #[test]
    fn full_hd_frames_without_event_device() {
        let geometry = FrameGeometry::default();
        let frames: Vec<Vec<u8>> = (1..=3).map(|i| frame(&geometry, i)).collect();
        let regs = MemRegisters::new();
        let writes = regs.writes.clone();
        let config = CaptureConfig {
            sync: SyncMode::Interrupt,
            ..config(geometry)
        };

        let mut session =
            Session::<_, ScriptedSource, _>::from_parts(config, stream(frames), None, regs)
                .unwrap();
        assert_eq!(session.sync_mode(), SyncMode::Polling);

        session.start().unwrap();
        let (summary, captured) = collect(&mut session, 3);
        session.close();

        assert!(summary.is_success());
        assert_eq!(summary.captured(), 3);
        assert_eq!(summary.diagnostics.sync_timeouts, 0);
        assert!(summary.diagnostics.downgrade.is_some());
        for (i, frame) in captured.iter().enumerate() {
            assert_eq!(frame.len(), geometry.frame_size());
            assert_eq!(frame.actual_height(), 1080);
            assert_eq!(frame.meta().sequence, i as u64 + 1);
            assert!(frame.meta().flags.contains(Flags::UNSYNCHRONIZED));
            assert!(frame.data().iter().all(|&b| b == i as u8 + 1));
        }
        assert_eq!(*writes.borrow(), vec![(0x04, 0x01), (0x04, 0x00)]);
    }

    #[test]
    fn short_read_aborts_and_still_cleans_up() {
        let geometry = FrameGeometry::default();
        let half = geometry.frame_size() / 2;
        // end-of-data right after the half frame
        let src = stream(vec![frame(&geometry, 1), vec![2; half]]);
        let stream_tracker = src.tracker();

        let regs = MemRegisters::new();
        let writes = regs.writes.clone();
        let mut session =
            Session::<_, ScriptedSource, _>::from_parts(config(geometry), src, None, regs)
                .unwrap();
        session.start().unwrap();
        let (summary, captured) = collect(&mut session, 3);

        assert_eq!(captured.len(), 1);
        assert_eq!(summary.captured(), 1);
        assert_eq!(summary.diagnostics.short_read_aborts, 1);
        assert_eq!(
            summary.abort,
            Some(AbortReason::Desync {
                frame: 2,
                expected: geometry.frame_size(),
                actual: half,
            })
        );
        assert!(!summary.is_success());

        // further requests do not touch the stream
        let reads = stream_tracker.reads.get();
        assert!(matches!(
            session.capture_frame().unwrap(),
            FrameOutcome::Aborted(_)
        ));
        assert_eq!(stream_tracker.reads.get(), reads);

        drop(session);
        assert!(stream_tracker.closed.get());
        assert_eq!(writes.borrow().last(), Some(&(Register::Control as u32, 0)));
    }

    #[test]
    fn empty_reads_are_skipped() {
        let geometry = small();
        let src = ScriptedSource::new(vec![
            Step::WouldBlock,
            Step::Eof,
            Step::Data(frame(&geometry, 7)),
        ]);

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config(geometry),
            src,
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();
        let (summary, captured) = collect(&mut session, 2);

        assert!(summary.is_success());
        assert_eq!(summary.diagnostics.skipped, 1);
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].meta().sequence, 1);
    }

    #[test]
    fn interrupt_sync_reports_events_and_timeouts() {
        let geometry = small();
        let event = ScriptedSource::new(event_steps(&[Some(41), None]));
        let src = stream(vec![frame(&geometry, 1), frame(&geometry, 2)]);
        let config = CaptureConfig {
            sync: SyncMode::Interrupt,
            ..config(geometry)
        };

        let mut session =
            Session::from_parts(config, src, Some(event), MemRegisters::new()).unwrap();
        assert_eq!(session.sync_mode(), SyncMode::Interrupt);
        session.start().unwrap();
        let (summary, captured) = collect(&mut session, 2);

        assert_eq!(summary.captured(), 2);
        assert_eq!(summary.diagnostics.sync_timeouts, 1);
        assert_eq!(captured[0].meta().sync, SyncEvent::received(41));
        assert!(captured[1].meta().flags.contains(Flags::SYNC_TIMEOUT));
        assert!(!captured[1].meta().sync.present);
    }

    #[test]
    fn strict_policy_skips_unsynchronized_frames() {
        let geometry = small();
        let event = ScriptedSource::new(event_steps(&[None, Some(2)]));
        // one gap for the start-up flush, one for the resync flush
        let src = ScriptedSource::new(vec![
            Step::WouldBlock,
            Step::WouldBlock,
            Step::Data(frame(&geometry, 1)),
        ]);
        let config = CaptureConfig {
            sync: SyncMode::Interrupt,
            policy: Policy::Strict,
            ..config(geometry)
        };

        let mut session =
            Session::from_parts(config, src, Some(event), MemRegisters::new()).unwrap();
        session.start().unwrap();

        assert!(matches!(
            session.capture_frame().unwrap(),
            FrameOutcome::Skipped(SkipReason::SyncTimeout)
        ));
        assert!(matches!(
            session.capture_frame().unwrap(),
            FrameOutcome::Captured(_)
        ));
        assert_eq!(session.diagnostics().resyncs, 1);
    }

    #[test]
    fn stale_data_is_flushed_on_start() {
        let geometry = small();
        let src = ScriptedSource::new(vec![
            Step::Data(vec![9; 100]),
            Step::WouldBlock,
            Step::Data(frame(&geometry, 1)),
        ]);

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config(geometry),
            src,
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), State::Enabled);
        assert_eq!(session.diagnostics().stale_bytes, 100);

        match session.capture_frame().unwrap() {
            FrameOutcome::Captured(frame) => assert!(frame.data().iter().all(|&b| b == 1)),
            outcome => panic!("unexpected {:?}", outcome),
        }
        assert_eq!(session.state(), State::Capturing);
    }

    #[test]
    fn warm_up_frames_are_discarded() {
        let geometry = small();
        let src = stream(vec![
            frame(&geometry, 1),
            frame(&geometry, 2),
            frame(&geometry, 3),
        ]);
        let config = CaptureConfig {
            warmup_frames: 2,
            ..config(geometry)
        };

        let mut session =
            Session::<_, ScriptedSource, _>::from_parts(config, src, None, MemRegisters::new())
                .unwrap();
        session.start().unwrap();
        let (summary, captured) = collect(&mut session, 1);

        assert_eq!(summary.diagnostics.warmup_frames, 2);
        assert_eq!(captured.len(), 1);
        assert!(captured[0].data().iter().all(|&b| b == 3));
    }

    #[test]
    fn fiducial_framing_realigns() {
        let geometry = FrameGeometry::new(20, 16, PixelLayout::Bgrx8888).unwrap();
        let pattern = render_calibration_frame(&geometry);
        let rows_in = 5;
        let mut raw = pattern[rows_in * geometry.row_stride()..].to_vec();
        raw.extend_from_slice(&pattern);
        raw.extend_from_slice(&pattern);
        let config = CaptureConfig {
            framing: Framing::Fiducial { span: 2 },
            ..config(geometry)
        };

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config,
            stream(vec![raw]),
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();

        match session.capture_frame().unwrap() {
            FrameOutcome::Captured(frame) => {
                assert_eq!(frame.data(), &pattern[..]);
                assert_eq!(frame.actual_height(), 16);
                let alignment = frame.meta().alignment.unwrap();
                assert_eq!(alignment.confidence, Confidence::Exact);
                assert_eq!(alignment.byte_offset, 11 * geometry.row_stride());
                assert!(frame.meta().flags.contains(Flags::ALIGNED));
                assert!(frame.unaligned().is_none());
            }
            outcome => panic!("unexpected {:?}", outcome),
        }
        assert_eq!(session.diagnostics().resyncs, 1);
    }

    #[test]
    fn fiducial_framing_keeps_the_unaligned_rows() {
        let geometry = FrameGeometry::new(20, 16, PixelLayout::Bgrx8888).unwrap();
        let pattern = render_calibration_frame(&geometry);
        let mut raw = pattern[3 * geometry.row_stride()..].to_vec();
        raw.extend_from_slice(&pattern);
        let config = CaptureConfig {
            framing: Framing::Fiducial { span: 2 },
            keep_unaligned: true,
            ..config(geometry)
        };

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config,
            stream(vec![raw.clone()]),
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();

        match session.capture_frame().unwrap() {
            FrameOutcome::Captured(frame) => {
                assert_eq!(frame.data(), &pattern[..]);
                assert_eq!(frame.unaligned(), Some(&raw[..geometry.frame_size()]));
            }
            outcome => panic!("unexpected {:?}", outcome),
        }
    }

    #[test]
    fn fiducial_framing_falls_back_to_offset_zero() {
        let geometry = small();
        let config = CaptureConfig {
            framing: Framing::Fiducial { span: 1 },
            ..config(geometry)
        };

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config,
            stream(vec![frame(&geometry, 100)]),
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();

        match session.capture_frame().unwrap() {
            FrameOutcome::Captured(frame) => {
                assert!(!frame.meta().alignment.unwrap().found);
                assert!(frame.meta().flags.contains(Flags::ASSUMED_START));
                assert_eq!(frame.actual_height(), geometry.height());
            }
            outcome => panic!("unexpected {:?}", outcome),
        }
        assert_eq!(session.diagnostics().boundary_misses, 1);
    }

    #[test]
    fn fiducial_framing_reports_short_frames() {
        let geometry = small();
        let pattern = render_calibration_frame(&geometry);
        let partial = pattern[..3 * geometry.row_stride() + 5].to_vec();
        let config = CaptureConfig {
            framing: Framing::Fiducial { span: 2 },
            ..config(geometry)
        };

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config,
            stream(vec![partial]),
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();

        match session.capture_frame().unwrap() {
            FrameOutcome::Captured(frame) => {
                assert_eq!(frame.actual_height(), 3);
                assert_eq!(frame.len(), 3 * geometry.row_stride());
                assert!(frame.meta().flags.contains(Flags::SHORT));
                assert!(frame.is_valid());
            }
            outcome => panic!("unexpected {:?}", outcome),
        }
    }

    #[test]
    fn strict_policy_skips_frames_without_boundary() {
        let geometry = small();
        let config = CaptureConfig {
            framing: Framing::Fiducial { span: 1 },
            policy: Policy::Strict,
            ..config(geometry)
        };

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config,
            stream(vec![frame(&geometry, 100)]),
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();

        assert!(matches!(
            session.capture_frame().unwrap(),
            FrameOutcome::Skipped(SkipReason::BoundaryNotFound)
        ));
    }

    #[test]
    fn register_failures_are_not_fatal() {
        let geometry = small();
        let regs = MemRegisters::failing();
        let writes = regs.writes.clone();

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config(geometry),
            stream(vec![frame(&geometry, 1)]),
            None,
            regs,
        )
        .unwrap();
        session.start().unwrap();
        let (summary, _) = collect(&mut session, 1);
        session.close();

        assert_eq!(summary.captured(), 1);
        assert_eq!(session.diagnostics().register_failures, 2);
        // the disable write is still attempted
        assert_eq!(writes.borrow().len(), 2);
    }

    #[test]
    fn read_errors_end_the_session() {
        let geometry = small();
        let src = ScriptedSource::new(vec![Step::WouldBlock, Step::Error(io::ErrorKind::Other)]);
        let tracker = src.tracker();

        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config(geometry),
            src,
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();
        assert!(matches!(session.capture_frame(), Err(Error::Read(_))));

        drop(session);
        assert!(tracker.closed.get());
    }

    #[test]
    fn stop_handle_ends_capture_between_frames() {
        let geometry = small();
        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config(geometry),
            stream(vec![frame(&geometry, 1), frame(&geometry, 2)]),
            None,
            MemRegisters::new(),
        )
        .unwrap();
        session.start().unwrap();

        let stop = session.stop_handle();
        let summary = session
            .run(2, |_| {
                stop.stop();
                ControlFlow::Continue(())
            })
            .unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.captured(), 1);
        assert!(summary.is_success());
    }

    #[test]
    fn operations_require_the_right_state() {
        let geometry = small();
        let mut session = Session::<_, ScriptedSource, _>::from_parts(
            config(geometry),
            stream(vec![]),
            None,
            MemRegisters::new(),
        )
        .unwrap();

        assert!(matches!(
            session.capture_frame(),
            Err(Error::InvalidState {
                state: State::Opened,
                ..
            })
        ));

        session.close();
        assert_eq!(session.state(), State::Closed);
        assert!(matches!(session.start(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = CaptureConfig {
            max_chunk: Some(0),
            ..config(small())
        };
        let result = Session::<_, ScriptedSource, _>::from_parts(
            config,
            stream(vec![]),
            None,
            MemRegisters::new(),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
