//! Frame acquisition from unframed DMA video capture streams.
//!
//! A capture card pushes raw pixel rows into a character device with no frame boundaries.
//! A [`Session`] enables the card through its control registers, synchronizes to frame starts
//! using either a timing-signal event node or a fixed delay, and cuts the byte stream into
//! [`FrameBuffer`]s. Where timing alone cannot be trusted, the [`fiducial`] module recovers the
//! frame start from a known test pattern.

pub mod fd;

mod pselect;

mod handle;
pub use handle::Handle;

mod source;
pub use source::{ByteSource, Readiness};

mod geometry;
pub use geometry::{Channels, FrameGeometry, PixelLayout};

mod timestamp;
pub use timestamp::Timestamp;

mod buffer;
pub use buffer::{Flags, FrameBuffer, Metadata, RawBlock};

pub mod reader;

pub mod flush;

pub mod sync;
pub use sync::{SyncEvent, SyncMode};

pub mod fiducial;
pub use fiducial::{AlignmentResult, Confidence};

pub mod register;

mod config;
pub use config::{CaptureConfig, Framing, Policy};
pub use config::{DEFAULT_EVENT_PATHS, DEFAULT_REGISTER_PATH, DEFAULT_STREAM_PATH};

mod error;
pub use error::{Error, Result};

mod session;
pub use session::{AbortReason, Diagnostics, FrameOutcome, SkipReason, StopHandle, Summary};
pub use session::{DeviceSession, Session, State};

#[cfg(test)]
mod mock;

pub mod prelude {
    pub use crate::register::{RegisterAccess, UserRegisters};
    pub use crate::{ByteSource, CaptureConfig, FrameBuffer, FrameGeometry, PixelLayout};
    pub use crate::{Error, Framing, Policy, Result, Session, SyncMode};
}
