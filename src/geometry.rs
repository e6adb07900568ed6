use std::{fmt, str};

use crate::error::{Error, Result};

/// Pixel layout of the raw stream
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// 32 bit, blue-green-red plus one padding byte (DRM `XR24`)
    Bgrx8888,
    /// 32 bit, red-green-blue plus one padding byte (DRM `XB24`)
    Rgbx8888,
}

/// Byte index of each colour channel inside one pixel
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Channels {
    pub red: usize,
    pub green: usize,
    pub blue: usize,
}

impl PixelLayout {
    /// Number of bytes one pixel occupies in the stream
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Bgrx8888 | PixelLayout::Rgbx8888 => 4,
        }
    }

    /// Byte index of each colour channel inside one pixel
    pub fn channels(&self) -> Channels {
        match self {
            PixelLayout::Bgrx8888 => Channels {
                red: 2,
                green: 1,
                blue: 0,
            },
            PixelLayout::Rgbx8888 => Channels {
                red: 0,
                green: 1,
                blue: 2,
            },
        }
    }

    /// Four character code of the layout
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelLayout::Bgrx8888 => *b"XR24",
            PixelLayout::Rgbx8888 => *b"XB24",
        }
    }

    /// Returns the (red, green, blue) triple of the pixel starting at `pixel[0]`
    pub fn rgb(&self, pixel: &[u8]) -> (u8, u8, u8) {
        let c = self.channels();
        (pixel[c.red], pixel[c.green], pixel[c.blue])
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fourcc = self.fourcc();
        let fourcc = str::from_utf8(&fourcc).unwrap_or("????");
        match self {
            PixelLayout::Bgrx8888 => write!(f, "BGRX ({})", fourcc),
            PixelLayout::Rgbx8888 => write!(f, "RGBX ({})", fourcc),
        }
    }
}

/// Immutable frame dimensions
///
/// `row_stride = width * bytes_per_pixel` and `frame_size = row_stride * height`, where
/// `frame_size` is always non-zero for a geometry built through [`FrameGeometry::new`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FrameGeometry {
    width: u32,
    height: u32,
    layout: PixelLayout,
}

impl FrameGeometry {
    /// Returns a validated frame geometry
    ///
    /// # Arguments
    ///
    /// * `width` - Pixels per row
    /// * `height` - Rows per frame
    /// * `layout` - Pixel layout
    ///
    /// # Example
    ///
    /// ```
    /// use dmacap::{FrameGeometry, PixelLayout};
    ///
    /// let geometry = FrameGeometry::new(1920, 1080, PixelLayout::Bgrx8888).unwrap();
    /// assert_eq!(geometry.row_stride(), 7680);
    /// assert_eq!(geometry.frame_size(), 8_294_400);
    /// ```
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        let geometry = FrameGeometry {
            width,
            height,
            layout,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let bpp = self.layout.bytes_per_pixel();
        let c = self.layout.channels();
        if c.red >= bpp || c.green >= bpp || c.blue >= bpp {
            return Err(Error::InvalidConfig(format!(
                "pixel layout {} has channels outside its {} byte pixel",
                self.layout, bpp
            )));
        }

        let frame_size = (self.width as usize)
            .checked_mul(bpp)
            .and_then(|stride| stride.checked_mul(self.height as usize));
        match frame_size {
            Some(size) if size > 0 => Ok(()),
            Some(_) => Err(Error::InvalidConfig(format!(
                "frame size of {}x{} is zero",
                self.width, self.height
            ))),
            None => Err(Error::InvalidConfig(format!(
                "frame size of {}x{} overflows",
                self.width, self.height
            ))),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.layout.bytes_per_pixel()
    }

    /// Bytes per row
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    /// Bytes per frame
    pub fn frame_size(&self) -> usize {
        self.row_stride() * self.height as usize
    }

    /// Number of complete rows contained in `len` bytes
    pub fn rows_in(&self, len: usize) -> usize {
        len / self.row_stride()
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        FrameGeometry {
            width: 1920,
            height: 1080,
            layout: PixelLayout::Bgrx8888,
        }
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "width          : {}", self.width)?;
        writeln!(f, "height         : {}", self.height)?;
        writeln!(f, "layout         : {}", self.layout)?;
        writeln!(f, "stride         : {}", self.row_stride())?;
        writeln!(f, "frame size     : {}", self.frame_size())?;
        Ok(())
    }
}
