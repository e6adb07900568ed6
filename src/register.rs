use bitflags::bitflags;
use std::path::Path;
use std::time::Duration;
use std::{fmt, io, thread};

use crate::fd;
use crate::handle::Handle;

/// Register offsets of the capture core, relative to the user register window
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Register {
    Version         = 0x0000,
    Control         = 0x0004,
    Status          = 0x0008,
    FrameCount      = 0x0308,
    ErrorCount      = 0x030C,
}

impl From<Register> for u32 {
    fn from(reg: Register) -> Self {
        reg as u32
    }
}

bitflags! {
    /// Control register bits
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Control: u32 {
        /// Global capture enable
        const ENABLE        = 0x0001;
        /// Soft reset, cleared by the hardware
        const SOFT_RESET    = 0x0002;
        /// Replace the video input with the colour bar generator
        const TEST_MODE     = 0x0004;
        const LOOPBACK      = 0x0008;
    }
}

bitflags! {
    /// Status register bits
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        const IDLE          = 0x0001;
        /// Memory controller calibration done
        const MIG_CALIB     = 0x0002;
        const FIFO_OVERFLOW = 0x0004;
        const LINK_UP       = 0x0008;
        const VIDEO_ACTIVE  = 0x0010;
        const DMA_BUSY      = 0x0020;
    }
}

impl From<u32> for Control {
    fn from(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }
}

impl From<u32> for Status {
    fn from(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Core version as encoded in the version register
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl From<u32> for Version {
    fn from(raw: u32) -> Self {
        Version {
            major: (raw >> 24) as u8,
            minor: (raw >> 16) as u8,
            patch: raw as u16,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Access to the 32 bit little-endian control registers of a capture device
pub trait RegisterAccess {
    /// Read the register at byte `offset`
    fn read_register(&mut self, offset: u32) -> io::Result<u32>;

    /// Write `value` to the register at byte `offset`
    ///
    /// Some transports cannot confirm a write; an `Ok` only means it was issued.
    fn write_register(&mut self, offset: u32, value: u32) -> io::Result<()>;
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for &mut R {
    fn read_register(&mut self, offset: u32) -> io::Result<u32> {
        (**self).read_register(offset)
    }

    fn write_register(&mut self, offset: u32, value: u32) -> io::Result<()> {
        (**self).write_register(offset, value)
    }
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for Box<R> {
    fn read_register(&mut self, offset: u32) -> io::Result<u32> {
        (**self).read_register(offset)
    }

    fn write_register(&mut self, offset: u32, value: u32) -> io::Result<()> {
        (**self).write_register(offset, value)
    }
}

/// Registers reached through positioned reads and writes on the user register device node
pub struct UserRegisters {
    handle: Handle,
}

impl UserRegisters {
    /// Opens the register window read-write
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dmacap::register::{Register, RegisterAccess, UserRegisters, Version};
    ///
    /// let mut regs = UserRegisters::open("/dev/xdma0_user").unwrap();
    /// let version = regs.read_register(Register::Version.into()).unwrap();
    /// println!("core version {}", Version::from(version));
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(UserRegisters {
            handle: Handle::with_flags(path, libc::O_RDWR)?,
        })
    }
}

impl RegisterAccess for UserRegisters {
    fn read_register(&mut self, offset: u32) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        let n = fd::pread(self.handle.fd(), &mut buf, offset as u64)?;
        if n != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short register read at {:#06x}", offset),
            ));
        }
        Ok(u32::from_le_bytes(buf))
    }

    fn write_register(&mut self, offset: u32, value: u32) -> io::Result<()> {
        let n = fd::pwrite(self.handle.fd(), &value.to_le_bytes(), offset as u64)?;
        if n != 4 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short register write at {:#06x}", offset),
            ));
        }
        Ok(())
    }
}

/// Enables capture, optionally with the colour bar generator
pub fn enable<R: RegisterAccess + ?Sized>(regs: &mut R, test_pattern: bool) -> io::Result<()> {
    let mut ctrl = Control::ENABLE;
    if test_pattern {
        ctrl |= Control::TEST_MODE;
    }
    regs.write_register(Register::Control.into(), ctrl.bits())
}

/// Clears the control register
pub fn disable<R: RegisterAccess + ?Sized>(regs: &mut R) -> io::Result<()> {
    regs.write_register(Register::Control.into(), Control::empty().bits())
}

/// Pulses the soft reset bit on top of the current control value
///
/// An unreadable control register is treated as zero.
pub fn soft_reset<R: RegisterAccess + ?Sized>(regs: &mut R) -> io::Result<()> {
    let ctrl = Control::from(regs.read_register(Register::Control.into()).unwrap_or(0));
    regs.write_register(Register::Control.into(), (ctrl | Control::SOFT_RESET).bits())?;
    thread::sleep(Duration::from_millis(10));
    Ok(())
}

/// Snapshot of the identification and state registers
///
/// Registers that could not be read are `None`.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub version: Option<Version>,
    pub control: Option<Control>,
    pub status: Option<Status>,
    pub frame_count: Option<u32>,
    pub error_count: Option<u32>,
}

impl DeviceStatus {
    pub fn query<R: RegisterAccess + ?Sized>(regs: &mut R) -> Self {
        DeviceStatus {
            version: regs.read_register(Register::Version.into()).ok().map(Version::from),
            control: regs.read_register(Register::Control.into()).ok().map(Control::from),
            status: regs.read_register(Register::Status.into()).ok().map(Status::from),
            frame_count: regs.read_register(Register::FrameCount.into()).ok(),
            error_count: regs.read_register(Register::ErrorCount.into()).ok(),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => writeln!(f, "version        : {}", version)?,
            None => writeln!(f, "version        : unknown")?,
        }
        match self.control {
            Some(ctrl) => writeln!(
                f,
                "control        : {:#010x} (enable={}, test_mode={})",
                ctrl.bits(),
                ctrl.contains(Control::ENABLE) as u8,
                ctrl.contains(Control::TEST_MODE) as u8
            )?,
            None => writeln!(f, "control        : unknown")?,
        }
        match self.status {
            Some(status) => writeln!(
                f,
                "status         : {:#010x} (idle={}, link_up={})",
                status.bits(),
                status.contains(Status::IDLE) as u8,
                status.contains(Status::LINK_UP) as u8
            )?,
            None => writeln!(f, "status         : unknown")?,
        }
        if let Some(frames) = self.frame_count {
            writeln!(f, "frames         : {}", frames)?;
        }
        if let Some(errors) = self.error_count {
            writeln!(f, "errors         : {}", errors)?;
        }
        Ok(())
    }
}
