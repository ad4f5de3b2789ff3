// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bitflags::bitflags;
use std::fs::File;
use std::mem::size_of;
use std::os::unix::prelude::{FromRawFd, RawFd};

use super::common::{iorw, record_from_slice, ValidationResult};

// common to ABI v1 and v2.
pub use super::common::{
    get_chip_info, has_event, read_event, unwatch_line_info, ChipInfo, Error,
    LineEdgeEventKind, LineInfoChangeKind, Name, Offset, Offsets, Padding, Result,
    UnderReadError, ValidationError, NUM_LINES_MAX,
};

#[repr(u8)]
enum Ioctl {
    GetLineInfo = 2,
    GetLineHandle = 3,
    GetLineEvent = 4,
    GetLineValues = 8,
    SetLineValues = 9,
    SetConfig = 0xA,
    WatchLineInfo = 0xB,
}

/// The kernel's view of a line.
///
/// Edge detection and debounce are not reported by this ABI.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineInfo {
    pub offset: Offset,

    pub flags: LineInfoFlags,

    pub name: Name,

    /// Empty if the line is not held.
    pub consumer: Name,
}

bitflags! {
    /// Line configuration flags, as reported in line info.
    ///
    /// A line without OUTPUT is an input.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct LineInfoFlags: u32 {
        const USED = 1;

        const OUTPUT = 2;

        const ACTIVE_LOW = 4;

        const OPEN_DRAIN = 8;

        const OPEN_SOURCE = 16;

        const BIAS_PULL_UP = 32;

        const BIAS_PULL_DOWN = 64;

        const BIAS_DISABLED = 128;
    }
}

/// Get the info for a line.
pub fn get_line_info(cfd: RawFd, offset: Offset) -> Result<LineInfo> {
    line_info_ioctl(cfd, offset, iorw!(Ioctl::GetLineInfo, LineInfo))
}

/// Get the info for a line and start reporting changes to it on the chip fd.
pub fn watch_line_info(cfd: RawFd, offset: Offset) -> Result<LineInfo> {
    line_info_ioctl(cfd, offset, iorw!(Ioctl::WatchLineInfo, LineInfo))
}

fn line_info_ioctl(
    cfd: RawFd,
    offset: Offset,
    code: nix::sys::ioctl::ioctl_num_type,
) -> Result<LineInfo> {
    let mut li = LineInfo {
        offset,
        ..Default::default()
    };
    // SAFETY: LineInfo holds only integers, bitflags and byte arrays.
    match unsafe { libc::ioctl(cfd, code, &mut li) } {
        0 => Ok(li),
        _ => Err(Error::from_errno()),
    }
}

/// A change to the info of a watched line, as read from the chip fd.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LineInfoChangeEvent {
    /// The info after the change.
    pub info: LineInfo,

    pub timestamp_ns: u64,

    pub kind: LineInfoChangeKind,

    #[doc(hidden)]
    pub padding: Padding<5>,
}

impl LineInfoChangeEvent {
    /// Decode and validate an event read from the chip fd.
    pub fn from_slice(d: &[u64]) -> Result<&LineInfoChangeEvent> {
        let ice: &LineInfoChangeEvent = record_from_slice(d, "LineInfoChangeEvent")?;
        ice.validate().map(|_| ice).map_err(Error::from)
    }

    fn validate(&self) -> ValidationResult {
        self.kind
            .validate()
            .map_err(|e| ValidationError::new("kind", e))
    }

    /// The size of the event in u64 words.
    pub const fn u64_size() -> usize {
        size_of::<LineInfoChangeEvent>() / 8
    }
}

/// A request for a set of lines sharing one configuration.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HandleRequest {
    pub offsets: Offsets,

    /// Applied to every requested line.
    pub flags: HandleRequestFlags,

    /// Initial values for outputs, in offset order.
    pub values: LineValues,

    pub consumer: Name,

    /// The number of entries of `offsets` and `values` in use.
    pub num_lines: u32,

    // filled by the kernel
    #[doc(hidden)]
    pub fd: i32,
}

bitflags! {
    /// Flags for requesting or reconfiguring a line handle.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct HandleRequestFlags: u32 {
        const INPUT = 1;

        const OUTPUT = 2;

        const ACTIVE_LOW = 4;

        const OPEN_DRAIN = 8;

        const OPEN_SOURCE = 16;

        const BIAS_PULL_UP = 32;

        const BIAS_PULL_DOWN = 64;

        const BIAS_DISABLED = 128;
    }
}

/// Request a line handle from the chip.
///
/// The lines are held until the returned file is closed.
pub fn get_line_handle(cfd: RawFd, mut hr: HandleRequest) -> Result<File> {
    // SAFETY: on success the kernel returns a new fd that nothing else owns.
    unsafe {
        match libc::ioctl(cfd, iorw!(Ioctl::GetLineHandle, HandleRequest), &mut hr) {
            0 => Ok(File::from_raw_fd(hr.fd)),
            _ => Err(Error::from_errno()),
        }
    }
}

/// A replacement configuration for a line handle.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HandleConfig {
    pub flags: HandleRequestFlags,

    /// Values for outputs, in offset order.
    pub values: LineValues,

    #[doc(hidden)]
    pub padding: Padding<4>,
}

/// Replace the configuration of a line handle.
///
/// The kernel provides no equivalent for event requests.
pub fn set_line_config(lfd: RawFd, hc: HandleConfig) -> Result<()> {
    // SAFETY: hc outlives the call and is only read by the kernel.
    match unsafe { libc::ioctl(lfd, iorw!(Ioctl::SetConfig, HandleConfig), &hc) } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// Line values, one byte per line in offset order.
///
/// Zero is inactive, anything else active.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LineValues([u8; NUM_LINES_MAX]);

impl LineValues {
    /// Values for the leading lines, with the remainder inactive.
    pub fn from_slice(s: &[u8]) -> Self {
        let mut lv = LineValues::default();
        for (dst, src) in lv.0.iter_mut().zip(s) {
            *dst = *src;
        }
        lv
    }

    #[inline]
    pub fn get(&self, idx: usize) -> u8 {
        self.0[idx]
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: u8) {
        self.0[idx] = value;
    }
}

impl Default for LineValues {
    fn default() -> Self {
        LineValues([0; NUM_LINES_MAX])
    }
}

/// Read the values of all the lines held by a handle or event request fd.
pub fn get_line_values(lfd: RawFd, lv: &mut LineValues) -> Result<()> {
    // SAFETY: any byte pattern returned is a valid LineValues.
    match unsafe { libc::ioctl(lfd, iorw!(Ioctl::GetLineValues, LineValues), lv.0.as_mut_ptr()) } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// Set the values of all the lines held by a handle request fd.
pub fn set_line_values(lfd: RawFd, lv: &LineValues) -> Result<()> {
    // SAFETY: lv is only read by the kernel.
    match unsafe { libc::ioctl(lfd, iorw!(Ioctl::SetLineValues, LineValues), lv.0.as_ptr()) } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// A request for edge events from a single line.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EventRequest {
    pub offset: Offset,

    pub handleflags: HandleRequestFlags,

    pub eventflags: EventRequestFlags,

    pub consumer: Name,

    // filled by the kernel
    #[doc(hidden)]
    pub fd: i32,
}

bitflags! {
    /// The edges an event request reports.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct EventRequestFlags: u32 {
        const RISING_EDGE = 1;

        const FALLING_EDGE = 2;

        const BOTH_EDGES = Self::RISING_EDGE.bits() | Self::FALLING_EDGE.bits();
    }
}

/// Request a line with edge detection.
///
/// Events are read from the returned file, which also holds the line.
pub fn get_line_event(cfd: RawFd, mut er: EventRequest) -> Result<File> {
    // SAFETY: on success the kernel returns a new fd that nothing else owns.
    unsafe {
        match libc::ioctl(cfd, iorw!(Ioctl::GetLineEvent, EventRequest), &mut er) {
            0 => Ok(File::from_raw_fd(er.fd)),
            _ => Err(Error::from_errno()),
        }
    }
}

/// An edge event, as read from an event request fd.
///
/// The line is identified by the fd the event was read from.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LineEdgeEvent {
    /// From **CLOCK_MONOTONIC** on kernels since 5.7, **CLOCK_REALTIME** before.
    pub timestamp_ns: u64,

    pub kind: LineEdgeEventKind,
}

impl LineEdgeEvent {
    /// Decode and validate an event read from an event request fd.
    pub fn from_slice(d: &[u64]) -> Result<&LineEdgeEvent> {
        let le: &LineEdgeEvent = record_from_slice(d, "LineEdgeEvent")?;
        le.validate().map(|_| le).map_err(Error::from)
    }

    fn validate(&self) -> ValidationResult {
        self.kind
            .validate()
            .map_err(|e| ValidationError::new("kind", e))
    }

    /// The size of the event in u64 words.
    pub const fn u64_size() -> usize {
        size_of::<LineEdgeEvent>() / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(size_of::<LineInfo>(), 72usize);
        assert_eq!(size_of::<LineInfoChangeEvent>(), 104usize);
        assert_eq!(size_of::<HandleRequest>(), 364usize);
        assert_eq!(size_of::<HandleConfig>(), 84usize);
        assert_eq!(size_of::<EventRequest>(), 48usize);
        assert_eq!(size_of::<LineEdgeEvent>(), 16usize);
        assert_eq!(size_of::<LineValues>(), 64usize);
    }

    #[test]
    fn both_edges() {
        assert_eq!(
            EventRequestFlags::BOTH_EDGES,
            EventRequestFlags::RISING_EDGE | EventRequestFlags::FALLING_EDGE
        );
    }

    mod line_edge_event {
        use super::*;

        #[test]
        fn from_slice() {
            let mut buf = [0u64; LineEdgeEvent::u64_size()];
            buf[0] = 42;
            buf[1] = if cfg!(target_endian = "little") {
                2
            } else {
                2 << 32
            };
            let le = LineEdgeEvent::from_slice(&buf).unwrap();
            assert_eq!(le.timestamp_ns, 42);
            assert_eq!(le.kind, LineEdgeEventKind::FallingEdge);

            buf[1] = 0;
            assert_eq!(
                LineEdgeEvent::from_slice(&buf).unwrap_err(),
                Error::Validation(ValidationError::new("kind", "invalid value: 0"))
            );

            assert_eq!(
                LineEdgeEvent::from_slice(&buf[..1]).unwrap_err(),
                Error::UnderRead(UnderReadError::new("LineEdgeEvent", 16, 8))
            );
        }
    }

    mod line_info_change_event {
        use super::*;

        #[test]
        fn from_slice() {
            let mut buf = [0u64; LineInfoChangeEvent::u64_size()];
            // kind follows the 72 byte info and 8 byte timestamp
            let kind_word = (72 + 8) / 8;
            buf[kind_word] = if cfg!(target_endian = "little") {
                3
            } else {
                3 << 32
            };
            let ice = LineInfoChangeEvent::from_slice(&buf).unwrap();
            assert_eq!(ice.kind, LineInfoChangeKind::Reconfigured);

            buf[kind_word] = if cfg!(target_endian = "little") {
                4
            } else {
                4 << 32
            };
            assert_eq!(
                LineInfoChangeEvent::from_slice(&buf).unwrap_err(),
                Error::Validation(ValidationError::new("kind", "invalid value: 4"))
            );
        }
    }

    mod line_values {
        use super::LineValues;

        #[test]
        fn get_set() {
            let mut a = LineValues::from_slice(&[1, 0, 1]);
            assert_eq!(a.get(0), 1);
            assert_eq!(a.get(1), 0);
            a.set(1, 1);
            assert_eq!(a.get(1), 1);
            assert_eq!(a.get(63), 0);
        }
    }
}
