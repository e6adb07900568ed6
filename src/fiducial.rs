//! Content-based frame boundary detection.
//!
//! The source can insert a calibration pattern of uniform colour bands, top to bottom:
//! white, yellow, cyan, green, magenta, red, blue, black. Every calibration frame therefore
//! starts with a white row and ends with a black row, which marks frame boundaries inside an
//! unframed byte stream without any timing signal.

use std::fmt;

use crate::geometry::FrameGeometry;

/// A channel strictly above this value counts towards "white"
pub const WHITE_THRESHOLD: u8 = 250;
/// A channel strictly below this value counts towards "black"
pub const BLACK_THRESHOLD: u8 = 10;

/// Colour bands of the calibration pattern, in frame order
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColorBar {
    White,
    Yellow,
    Cyan,
    Green,
    Magenta,
    Red,
    Blue,
    Black,
}

impl ColorBar {
    pub const SEQUENCE: [ColorBar; 8] = [
        ColorBar::White,
        ColorBar::Yellow,
        ColorBar::Cyan,
        ColorBar::Green,
        ColorBar::Magenta,
        ColorBar::Red,
        ColorBar::Blue,
        ColorBar::Black,
    ];

    /// (red, green, blue) value of the band
    pub fn rgb(&self) -> (u8, u8, u8) {
        match self {
            ColorBar::White => (255, 255, 255),
            ColorBar::Yellow => (255, 255, 0),
            ColorBar::Cyan => (0, 255, 255),
            ColorBar::Green => (0, 255, 0),
            ColorBar::Magenta => (255, 0, 255),
            ColorBar::Red => (255, 0, 0),
            ColorBar::Blue => (0, 0, 255),
            ColorBar::Black => (0, 0, 0),
        }
    }

    /// Band covering `row` of a frame that is `height` rows tall
    pub fn for_row(row: u32, height: u32) -> ColorBar {
        let band = (row as u64 * Self::SEQUENCE.len() as u64 / height.max(1) as u64) as usize;
        Self::SEQUENCE[band.min(Self::SEQUENCE.len() - 1)]
    }
}

/// How much a detected frame start can be trusted
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Confidence {
    /// White row directly preceded by a black row
    Exact,
    /// Offset 0 taken as the frame start without a previous row to check against
    Assumed,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Exact => write!(f, "exact"),
            Confidence::Assumed => write!(f, "assumed"),
        }
    }
}

/// Outcome of a boundary search
///
/// When nothing matched, `found` is false and `byte_offset` is the fallback offset 0 with
/// [`Confidence::Assumed`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AlignmentResult {
    pub found: bool,
    pub byte_offset: usize,
    pub confidence: Confidence,
}

impl AlignmentResult {
    fn exact(byte_offset: usize) -> Self {
        AlignmentResult {
            found: true,
            byte_offset,
            confidence: Confidence::Exact,
        }
    }

    fn assumed() -> Self {
        AlignmentResult {
            found: true,
            byte_offset: 0,
            confidence: Confidence::Assumed,
        }
    }

    fn not_found() -> Self {
        AlignmentResult {
            found: false,
            byte_offset: 0,
            confidence: Confidence::Assumed,
        }
    }
}

fn is_white((r, g, b): (u8, u8, u8)) -> bool {
    r > WHITE_THRESHOLD && g > WHITE_THRESHOLD && b > WHITE_THRESHOLD
}

fn is_black((r, g, b): (u8, u8, u8)) -> bool {
    r < BLACK_THRESHOLD && g < BLACK_THRESHOLD && b < BLACK_THRESHOLD
}

/// Locates the first frame start in `raw`
///
/// Rows are scanned top to bottom and the first match wins. A row starts a frame when its first
/// pixel is white and the pixel at 90% of the width of the row above is black. A white first row
/// is accepted as-is with [`Confidence::Assumed`] since there is no row above to check.
///
/// # Arguments
///
/// * `raw` - Bytes starting at an arbitrary row boundary, usually spanning several frames
/// * `geometry` - Frame dimensions and pixel layout
///
/// # Example
///
/// ```
/// use dmacap::fiducial::{find_frame_start, render_calibration_frame, Confidence};
/// use dmacap::{FrameGeometry, PixelLayout};
///
/// let geometry = FrameGeometry::new(64, 32, PixelLayout::Bgrx8888).unwrap();
/// let frame = render_calibration_frame(&geometry);
///
/// // start capturing 20 rows into a frame
/// let skip = 20 * geometry.row_stride();
/// let mut raw = frame[skip..].to_vec();
/// raw.extend_from_slice(&frame);
///
/// let alignment = find_frame_start(&raw, &geometry);
/// assert!(alignment.found);
/// assert_eq!(alignment.confidence, Confidence::Exact);
/// assert_eq!(alignment.byte_offset, frame.len() - skip);
/// ```
pub fn find_frame_start(raw: &[u8], geometry: &FrameGeometry) -> AlignmentResult {
    let layout = geometry.layout();
    let bpp = geometry.bytes_per_pixel();
    let stride = geometry.row_stride();
    let black_column = (geometry.width() as usize * 9 / 10) * bpp;

    for row in 0..geometry.rows_in(raw.len()) {
        let offset = row * stride;
        if !is_white(layout.rgb(&raw[offset..offset + bpp])) {
            continue;
        }

        if row == 0 {
            return AlignmentResult::assumed();
        }

        let sample = offset - stride + black_column;
        if is_black(layout.rgb(&raw[sample..sample + bpp])) {
            return AlignmentResult::exact(offset);
        }
    }

    AlignmentResult::not_found()
}

/// Slices one frame out of `raw` starting at `offset`
///
/// Returns the frame bytes and the number of complete rows they hold. When `raw` runs out the
/// slice is shorter than a frame; it is never padded.
pub fn extract_frame<'a>(raw: &'a [u8], offset: usize, geometry: &FrameGeometry) -> (&'a [u8], u32) {
    if offset >= raw.len() {
        return (&[], 0);
    }

    let stride = geometry.row_stride();
    let rows = geometry.rows_in(raw.len() - offset).min(geometry.height() as usize);
    (&raw[offset..offset + rows * stride], rows as u32)
}

/// Renders one calibration frame
///
/// Frames of at least eight rows contain every band; the first row is always white.
pub fn render_calibration_frame(geometry: &FrameGeometry) -> Vec<u8> {
    let layout = geometry.layout();
    let channels = layout.channels();
    let bpp = geometry.bytes_per_pixel();
    let mut frame = vec![0u8; geometry.frame_size()];

    for (row, line) in frame.chunks_exact_mut(geometry.row_stride()).enumerate() {
        let (r, g, b) = ColorBar::for_row(row as u32, geometry.height()).rgb();
        for pixel in line.chunks_exact_mut(bpp) {
            pixel[channels.red] = r;
            pixel[channels.green] = g;
            pixel[channels.blue] = b;
        }
    }

    frame
}
