use bitflags::bitflags;
use std::fmt;

use crate::fiducial::AlignmentResult;
use crate::geometry::PixelLayout;
use crate::sync::SyncEvent;
use crate::Timestamp;

/// Bytes accumulated by the streaming reader
///
/// A block may span anything from zero to several frames. It is never padded: its length is
/// exactly what the source delivered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawBlock {
    data: Vec<u8>,
    read_calls: usize,
    timed_out: bool,
    eof: bool,
}

impl RawBlock {
    pub(crate) fn new(data: Vec<u8>, read_calls: usize, timed_out: bool, eof: bool) -> Self {
        RawBlock {
            data,
            read_calls,
            timed_out,
            eof,
        }
    }

    /// Slice of accumulated data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of read operations that produced this block
    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    /// Whether accumulation stopped because the deadline elapsed
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Whether the source reported end-of-data
    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

bitflags! {
    /// Per-frame acquisition diagnostics
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        /// Fewer rows than the geometry asks for, see `FrameBuffer::actual_height`
        const SHORT             = 0x0001;
        /// Read started without a timing signal (polling mode)
        const UNSYNCHRONIZED    = 0x0002;
        /// The timing signal did not arrive in time, captured anyway
        const SYNC_TIMEOUT      = 0x0004;
        /// Frame start located by the fiducial detector
        const ALIGNED           = 0x0008;
        /// Frame start assumed at offset 0
        const ASSUMED_START     = 0x0010;
        /// Accumulation stopped at the read deadline
        const READ_TIMEOUT      = 0x0020;
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Frame metadata, mostly used not to convolute the main buffer struct
#[derive(Debug, Copy, Clone)]
pub struct Metadata {
    /// Sequence number, counting the frames handed out by a session
    pub sequence: u64,
    /// Time the frame read completed
    pub timestamp: Timestamp,
    /// Read operations needed to collect the frame
    pub read_calls: usize,
    /// Timing signal that preceded the read
    pub sync: SyncEvent,
    /// Fiducial alignment, content-based framing only
    pub alignment: Option<AlignmentResult>,
    /// Acquisition flags
    pub flags: Flags,
}

/// Validated frame
///
/// Holds exactly `actual_height * row_stride` bytes. Missing rows are never zero-padded; a
/// buffer with `actual_height == 0` is invalid and must not be handed to an encoder.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    data: Vec<u8>,
    width: u32,
    actual_height: u32,
    layout: PixelLayout,
    meta: Metadata,
    unaligned: Option<Vec<u8>>,
}

impl FrameBuffer {
    pub(crate) fn new(
        data: Vec<u8>,
        width: u32,
        actual_height: u32,
        layout: PixelLayout,
        meta: Metadata,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * actual_height as usize * layout.bytes_per_pixel()
        );
        FrameBuffer {
            data,
            width,
            actual_height,
            layout,
            meta,
            unaligned: None,
        }
    }

    /// Attaches the whole rows found at the start of the read, before realignment
    pub(crate) fn with_unaligned(mut self, rows: Vec<u8>) -> Self {
        self.unaligned = Some(rows);
        self
    }

    /// Slice of frame bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Bytes per row
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    /// Number of complete rows the source delivered
    pub fn actual_height(&self) -> u32 {
        self.actual_height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    /// Up to one frame of rows from the start of the raw read, kept only on request in
    /// content-based framing
    pub fn unaligned(&self) -> Option<&[u8]> {
        self.unaligned.as_deref()
    }

    /// Whether the frame may be handed to an encoder
    pub fn is_valid(&self) -> bool {
        self.actual_height > 0
    }

    /// Output artifact: `(bytes, width, actual_height, pixel_layout)`
    pub fn into_parts(self) -> (Vec<u8>, u32, u32, PixelLayout) {
        (self.data, self.width, self.actual_height, self.layout)
    }
}
