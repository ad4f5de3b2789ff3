// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bitflags::bitflags;
use std::fmt;
use std::fs::File;
use std::mem::size_of;
use std::os::unix::prelude::{FromRawFd, RawFd};
use std::time::Duration;

use super::common::{iorw, record_from_slice, ValidationResult};

// common to ABI v1 and v2.
pub use super::common::{
    get_chip_info, has_event, read_event, unwatch_line_info, ChipInfo, Error,
    LineEdgeEventKind, LineInfoChangeKind, Name, Offset, Offsets, Padding, Result,
    UnderReadError, ValidationError, NUM_LINES_MAX,
};

#[repr(u8)]
enum Ioctl {
    GetLineInfo = 5,
    WatchLineInfo = 6,
    GetLine = 7,
    SetLineConfig = 0xD,
    GetLineValues = 0xE,
    SetLineValues = 0xF,
}

bitflags! {
    /// Line configuration flags, as reported in line info and as requested
    /// in a [`LineConfig`] or flags attribute.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct LineFlags: u64 {
        /// Held by some consumer. Only reported, never requested.
        const USED = 1;

        const ACTIVE_LOW = 2;

        const INPUT = 4;

        const OUTPUT = 8;

        /// Report inactive to active transitions.
        const EDGE_RISING = 16;

        /// Report active to inactive transitions.
        const EDGE_FALLING = 32;

        const OPEN_DRAIN = 64;

        const OPEN_SOURCE = 128;

        const BIAS_PULL_UP = 256;

        const BIAS_PULL_DOWN = 512;

        const BIAS_DISABLED = 1024;

        /// Timestamp edge events with **CLOCK_REALTIME**.
        const EVENT_CLOCK_REALTIME = 2048;

        /// Timestamp edge events with the hardware timestamp engine.
        const EVENT_CLOCK_HTE = 4096;
    }
}

/// A bitmap of line values, indexed by position in the request offsets.
///
/// Only the lines with a bit set in `mask` are read or written.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LineValues {
    /// 1 for active, 0 for inactive.
    pub bits: u64,

    pub mask: u64,
}

impl LineValues {
    /// Values with the mask selecting the first `num_lines` lines of a request.
    pub fn with_mask_len(num_lines: usize) -> Self {
        LineValues {
            bits: 0,
            mask: mask_of_len(num_lines),
        }
    }

    /// The value of the line at `idx`, or None if it is outside the mask.
    #[inline]
    pub fn get(&self, idx: usize) -> Option<bool> {
        debug_assert!(idx < NUM_LINES_MAX);
        let bit = 0x01 << idx;
        if self.mask & bit == 0 {
            return None;
        }
        Some(self.bits & bit != 0)
    }

    /// Set the value of the line at `idx`, adding it to the mask.
    #[inline]
    pub fn set(&mut self, idx: usize, active: bool) {
        debug_assert!(idx < NUM_LINES_MAX);
        let bit = 0x01 << idx;
        self.mask |= bit;
        if active {
            self.bits |= bit;
        } else {
            self.bits &= !bit;
        }
    }
}

/// A mask with the low `len` bits set.
#[inline]
pub fn mask_of_len(len: usize) -> u64 {
    if len >= NUM_LINES_MAX {
        u64::MAX
    } else {
        (1u64 << len) - 1
    }
}

/// Read the values of the masked lines from a request fd.
#[inline]
pub fn get_line_values(lfd: RawFd, lv: &mut LineValues) -> Result<()> {
    // SAFETY: any bit pattern returned is a valid LineValues.
    match unsafe { libc::ioctl(lfd, iorw!(Ioctl::GetLineValues, LineValues), lv as *mut _) } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// Set the values of the masked lines on a request fd.
///
/// The kernel rejects the call if any masked line is not an output.
#[inline]
pub fn set_line_values(lfd: RawFd, lv: &LineValues) -> Result<()> {
    // SAFETY: lv is only read by the kernel.
    match unsafe { libc::ioctl(lfd, iorw!(Ioctl::SetLineValues, LineValues), lv as *const _) } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// The tag selecting the active member of a [`LineAttributeValueUnion`].
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LineAttributeKind {
    #[default]
    Unused = 0,

    Flags = 1,

    Values = 2,

    Debounce = 3,
}

impl TryFrom<u32> for LineAttributeKind {
    type Error = String;

    fn try_from(v: u32) -> std::result::Result<Self, Self::Error> {
        use LineAttributeKind::*;
        Ok(match v {
            0 => Unused,
            1 => Flags,
            2 => Values,
            3 => Debounce,
            x => return Err(format!("invalid value: {x}")),
        })
    }
}

impl LineAttributeKind {
    fn validate(&self) -> std::result::Result<(), String> {
        LineAttributeKind::try_from(*self as u32).map(|_| ())
    }
}

/// A tagged line attribute.
///
/// Use [`to_value`] to access the value safely.
///
/// [`to_value`]: LineAttribute::to_value
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct LineAttribute {
    pub kind: LineAttributeKind,

    #[doc(hidden)]
    pub padding: Padding<1>,

    pub value: LineAttributeValueUnion,
}

impl LineAttribute {
    pub fn set_debounce_period_us(&mut self, debounce_period_us: u32) {
        self.kind = LineAttributeKind::Debounce;
        self.value.debounce_period_us = debounce_period_us;
    }

    pub fn set_flags(&mut self, flags: LineFlags) {
        self.kind = LineAttributeKind::Flags;
        self.value.flags = flags;
    }

    pub fn set_values(&mut self, values: u64) {
        self.kind = LineAttributeKind::Values;
        self.value.values = values;
    }

    /// The value selected by the kind, or None if the attribute is unused.
    pub fn to_value(&self) -> Option<LineAttributeValue> {
        // SAFETY: only the member selected by kind is read.
        unsafe {
            Some(match self.kind {
                LineAttributeKind::Unused => return None,
                LineAttributeKind::Flags => LineAttributeValue::Flags(self.value.flags),
                LineAttributeKind::Values => LineAttributeValue::Values(self.value.values),
                LineAttributeKind::Debounce => LineAttributeValue::DebouncePeriod(
                    Duration::from_micros(self.value.debounce_period_us as u64),
                ),
            })
        }
    }
}

impl fmt::Debug for LineAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_value() {
            None => write!(f, "unused"),
            Some(LineAttributeValue::Flags(flags)) => write!(f, "flags: {flags:?}"),
            Some(LineAttributeValue::Values(values)) => write!(f, "values: {values:016x}"),
            Some(LineAttributeValue::DebouncePeriod(period)) => {
                write!(f, "debounce_period: {period:?}")
            }
        }
    }
}

impl PartialEq for LineAttribute {
    fn eq(&self, other: &Self) -> bool {
        self.to_value() == other.to_value()
    }
}
impl Eq for LineAttribute {}

#[repr(C)]
#[derive(Clone, Copy)]
pub union LineAttributeValueUnion {
    pub flags: LineFlags,

    /// Output values, as for [`LineValues::bits`].
    pub values: u64,

    pub debounce_period_us: u32,
}

impl Default for LineAttributeValueUnion {
    fn default() -> Self {
        LineAttributeValueUnion { values: 0 }
    }
}

/// The safe form of a [`LineAttribute`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineAttributeValue {
    DebouncePeriod(Duration),

    Flags(LineFlags),

    Values(u64),
}

/// An attribute and the lines, by index into the request offsets, it applies to.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LineConfigAttribute {
    pub attr: LineAttribute,

    pub mask: u64,
}

/// The number of attribute slots in a [`LineConfig`] or [`LineInfo`].
pub const NUM_ATTRS_MAX: usize = 10;

/// The attribute slots of a [`LineConfig`].
///
/// Where several attributes of the same kind cover a line the kernel
/// uses the one in the lowest slot.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineConfigAttributes(pub [LineConfigAttribute; NUM_ATTRS_MAX]);

/// The configuration of the lines in a request.
///
/// `flags` apply to every line not covered by a flags attribute.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineConfig {
    pub flags: LineFlags,

    pub num_attrs: u32,

    #[doc(hidden)]
    pub padding: Padding<5>,

    pub attrs: LineConfigAttributes,
}

impl LineConfig {
    /// The attributes in use.
    pub fn active_attrs(&self) -> &[LineConfigAttribute] {
        &self.attrs.0[..self.num_attrs as usize]
    }

    /// Append an attribute.
    ///
    /// Panics if all [`NUM_ATTRS_MAX`] slots are already in use.
    pub fn push_attr(&mut self, attr: LineAttribute, mask: u64) {
        let lca = &mut self.attrs.0[self.num_attrs as usize];
        lca.attr = attr;
        lca.mask = mask;
        self.num_attrs += 1;
    }

    pub fn add_debounce(&mut self, period_us: u32, mask: u64) {
        let mut attr = LineAttribute::default();
        attr.set_debounce_period_us(period_us);
        self.push_attr(attr, mask);
    }

    pub fn add_flags(&mut self, flags: LineFlags, mask: u64) {
        let mut attr = LineAttribute::default();
        attr.set_flags(flags);
        self.push_attr(attr, mask);
    }

    pub fn add_values(&mut self, values: &LineValues) {
        let mut attr = LineAttribute::default();
        attr.set_values(values.bits);
        self.push_attr(attr, values.mask);
    }
}

/// Replace the configuration of the lines held by a request fd.
#[inline]
pub fn set_line_config(lfd: RawFd, lc: LineConfig) -> Result<()> {
    // SAFETY: lc outlives the call and is only read by the kernel.
    match unsafe { libc::ioctl(lfd, iorw!(Ioctl::SetLineConfig, LineConfig), &lc) } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// A request for exclusive access to a set of lines.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct LineRequest {
    pub offsets: Offsets,

    pub consumer: Name,

    pub config: LineConfig,

    /// The number of entries of `offsets` in use.
    pub num_lines: u32,

    /// A hint for the size of the kernel edge event buffer.
    ///
    /// Zero selects the kernel default of 16 events per line.
    pub event_buffer_size: u32,

    #[doc(hidden)]
    pub padding: Padding<5>,

    // filled by the kernel
    #[doc(hidden)]
    pub fd: i32,
}

/// Request a set of lines from the chip.
///
/// The lines are held until the returned file is closed.
#[inline]
pub fn get_line(cfd: RawFd, mut lr: LineRequest) -> Result<File> {
    // SAFETY: on success the kernel returns a new fd that nothing else owns.
    unsafe {
        match libc::ioctl(cfd, iorw!(Ioctl::GetLine, LineRequest), &mut lr) {
            0 => Ok(File::from_raw_fd(lr.fd)),
            _ => Err(Error::from_errno()),
        }
    }
}

/// The attribute slots of a [`LineInfo`].
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LineAttributes(pub [LineAttribute; NUM_ATTRS_MAX]);

/// The kernel's view of a line.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineInfo {
    pub name: Name,

    /// Empty if the line is not held.
    pub consumer: Name,

    pub offset: Offset,

    pub num_attrs: u32,

    pub flags: LineFlags,

    pub attrs: LineAttributes,

    #[doc(hidden)]
    pub padding: Padding<4>,
}

impl LineInfo {
    /// The attributes in use.
    pub fn active_attrs(&self) -> &[LineAttribute] {
        &self.attrs.0[..self.num_attrs as usize]
    }

    fn validate(&self) -> ValidationResult {
        if self.num_attrs > NUM_ATTRS_MAX as u32 {
            return Err(ValidationError::new(
                "num_attrs",
                format!("out of range: {}", self.num_attrs),
            ));
        }
        for (idx, attr) in self.attrs.0.iter().enumerate() {
            if let Err(e) = attr.kind.validate() {
                return Err(ValidationError::new(format!("attrs[{idx}].kind"), e));
            }
        }
        Ok(())
    }
}

/// Get the info for a line.
#[inline]
pub fn get_line_info(cfd: RawFd, offset: Offset) -> Result<LineInfo> {
    line_info_ioctl(cfd, offset, iorw!(Ioctl::GetLineInfo, LineInfo))
}

/// Get the info for a line and start reporting changes to it on the chip fd.
///
/// Fails with EBUSY if the line is already watched on this fd.
#[inline]
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
    // SAFETY: the enum fields are validated before li is returned.
    match unsafe { libc::ioctl(cfd, code, &mut li) } {
        0 => li.validate().map(|_| li).map_err(Error::from),
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
            .map_err(|e| ValidationError::new("kind", e))?;
        self.info.validate()
    }

    /// The size of the event in u64 words.
    pub const fn u64_size() -> usize {
        size_of::<LineInfoChangeEvent>() / 8
    }
}

/// An edge event, as read from a request fd.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LineEdgeEvent {
    /// From **CLOCK_MONOTONIC** unless the line selects another event clock.
    pub timestamp_ns: u64,

    pub kind: LineEdgeEventKind,

    pub offset: Offset,

    /// Position of the event among all events from the request.
    pub seqno: u32,

    /// Position of the event among the events from this line.
    pub line_seqno: u32,

    #[doc(hidden)]
    pub padding: Padding<6>,
}

impl LineEdgeEvent {
    /// Decode and validate an event read from a request fd.
    #[inline]
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
