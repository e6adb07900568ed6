use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::geometry::FrameGeometry;
use crate::reader::{ReadOptions, DEFAULT_READ_TIMEOUT};
use crate::sync::{SyncMode, DEFAULT_EVENT_TIMEOUT, DEFAULT_POLL_DELAY};

/// Card-to-host DMA stream
pub const DEFAULT_STREAM_PATH: &str = "/dev/xdma0_c2h_0";
/// User register window
pub const DEFAULT_REGISTER_PATH: &str = "/dev/xdma0_user";
/// Event nodes tried in order: VSYNC falling edge, then VSYNC rising edge
pub const DEFAULT_EVENT_PATHS: [&str; 2] = ["/dev/xdma0_events_1", "/dev/xdma0_events_0"];

/// How frame boundaries are recovered from the stream
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Framing {
    /// Trust the synchronization point: every read of `frame_size` bytes is one frame
    #[default]
    Timed,
    /// Read `span` frames worth of bytes and locate the frame start from the colour bar pattern
    Fiducial { span: usize },
}

/// What to do when a frame cannot be located with certainty
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Capture anyway on a timing-signal timeout, assume offset 0 when no boundary is found
    #[default]
    Lenient,
    /// Skip the frame instead of guessing
    Strict,
}

/// Everything a capture session needs to know up front
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub geometry: FrameGeometry,
    /// Raw DMA stream device
    pub stream_path: PathBuf,
    /// Control register device
    pub register_path: PathBuf,
    /// Event device to try before `event_candidates`
    pub event_path: Option<PathBuf>,
    pub event_candidates: Vec<PathBuf>,
    /// Requested synchronization, interrupt mode falls back to polling
    pub sync: SyncMode,
    pub poll_delay: Duration,
    pub event_timeout: Duration,
    /// Deadline for one frame read, `None` waits forever
    pub read_timeout: Option<Duration>,
    /// Upper bound per read request, `None` requests a whole frame at once
    pub max_chunk: Option<usize>,
    /// Frames discarded after enabling, before the first delivered frame
    pub warmup_frames: u32,
    /// Enable the colour bar generator
    pub test_pattern: bool,
    /// Soft reset the core before enabling
    pub soft_reset: bool,
    /// Wait after enabling before the stream is flushed and read
    pub settle: Duration,
    /// Drain stale bytes once capture is enabled
    pub flush_stale: bool,
    pub framing: Framing,
    /// Keep the unaligned start of each content-framed read alongside the frame
    pub keep_unaligned: bool,
    pub policy: Policy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            geometry: FrameGeometry::default(),
            stream_path: PathBuf::from(DEFAULT_STREAM_PATH),
            register_path: PathBuf::from(DEFAULT_REGISTER_PATH),
            event_path: None,
            event_candidates: DEFAULT_EVENT_PATHS.iter().map(PathBuf::from).collect(),
            sync: SyncMode::Polling,
            poll_delay: DEFAULT_POLL_DELAY,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            max_chunk: None,
            warmup_frames: 0,
            test_pattern: false,
            soft_reset: false,
            settle: Duration::from_millis(100),
            flush_stale: true,
            framing: Framing::Timed,
            keep_unaligned: false,
            policy: Policy::Lenient,
        }
    }
}

impl CaptureConfig {
    /// Rejects configurations a session cannot run with
    ///
    /// # Example
    ///
    /// ```
    /// use dmacap::CaptureConfig;
    ///
    /// let mut config = CaptureConfig::default();
    /// assert!(config.validate().is_ok());
    ///
    /// config.max_chunk = Some(0);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;

        if self.max_chunk == Some(0) {
            return Err(Error::InvalidConfig("read chunk size must be non-zero".into()));
        }
        if self.event_timeout.is_zero() {
            return Err(Error::InvalidConfig("event timeout must be non-zero".into()));
        }
        if let Framing::Fiducial { span } = self.framing {
            if span == 0 {
                return Err(Error::InvalidConfig(
                    "fiducial framing needs a span of at least one frame".into(),
                ));
            }
            if self.geometry.frame_size().checked_mul(span).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "a span of {} frames overflows",
                    span
                )));
            }
        }

        Ok(())
    }

    /// Bytes requested from the stream per delivered frame
    pub fn read_size(&self) -> usize {
        match self.framing {
            Framing::Timed => self.geometry.frame_size(),
            Framing::Fiducial { span } => self.geometry.frame_size() * span,
        }
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            timeout: self.read_timeout,
            max_chunk: self.max_chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_capture_card() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.read_size(), 1920 * 1080 * 4);
        assert_eq!(config.event_candidates[0], PathBuf::from("/dev/xdma0_events_1"));
        assert_eq!(config.read_options().timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn fiducial_reads_span_frames() {
        let config = CaptureConfig {
            framing: Framing::Fiducial { span: 3 },
            ..CaptureConfig::default()
        };
        assert_eq!(config.read_size(), 3 * 1920 * 1080 * 4);

        let config = CaptureConfig {
            framing: Framing::Fiducial { span: 0 },
            ..CaptureConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_event_timeout_is_rejected() {
        let config = CaptureConfig {
            event_timeout: Duration::ZERO,
            ..CaptureConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
