// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use libc::{pollfd, ppoll, sigset_t, timespec, POLLIN};
use std::ffi::OsStr;
use std::fmt;
use std::mem::{size_of, MaybeUninit};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::ptr;
use std::str::FromStr;
use std::str::Utf8Error;

/// Check, without blocking, if the fd has an event available to read.
pub fn has_event(fd: RawFd) -> Result<bool> {
    let mut pfd = pollfd {
        fd,
        events: POLLIN,
        revents: 0,
    };
    let timeout = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: pfd and timeout outlive the call and the sigmask is null.
    match unsafe {
        ppoll(
            ptr::addr_of_mut!(pfd),
            1,
            ptr::addr_of!(timeout),
            ptr::null::<sigset_t>(),
        )
    } {
        -1 => Err(Error::from_errno()),
        0 => Ok(false),
        _ => Ok(true),
    }
}

/// Read an event record from the fd into the buffer.
///
/// Blocks until at least one record is available.
///
/// The number of whole u64 words read is returned.
pub fn read_event(fd: RawFd, buf: &mut [u64]) -> Result<usize> {
    // SAFETY: buf is a valid and writable region of the given size.
    let n = unsafe {
        libc::read(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            std::mem::size_of_val(buf),
        )
    };
    if n < 0 {
        return Err(Error::from_errno());
    }
    Ok(n as usize / 8)
}

// Reinterpret a buffer of u64 words as a kernel event record.
pub(crate) fn record_from_slice<'a, T>(d: &'a [u64], name: &'static str) -> Result<&'a T> {
    debug_assert!(size_of::<T>() % 8 == 0);
    let len = d.len() * 8;
    if len < size_of::<T>() {
        return Err(Error::from(UnderReadError::new(name, size_of::<T>(), len)));
    }
    // SAFETY: the buffer is large enough and u64 aligned, and the caller
    // validates the enum fields before exposing the record.
    Ok(unsafe { &*(d.as_ptr() as *const T) })
}

pub(crate) const IOCTL_MAGIC: u8 = 0xb4;

// Generate the request code for a read/write ioctl on the GPIO chip.
macro_rules! iorw {
    ($nr:expr, $ty:ty) => {
        nix::request_code_readwrite!(
            $crate::common::IOCTL_MAGIC,
            $nr,
            ::std::mem::size_of::<$ty>()
        )
    };
}
pub(crate) use iorw;

#[repr(u8)]
enum Ioctl {
    GetChipInfo = 1,
    UnwatchLineInfo = 0xC,
}

/// The kernel's view of a chip.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChipInfo {
    /// The device name, such as "gpiochip0".
    pub name: Name,

    /// The driver provided label. May be empty.
    pub label: Name,

    pub num_lines: u32,
}

/// Get the info for a chip.
pub fn get_chip_info(cfd: RawFd) -> Result<ChipInfo> {
    let mut chip = MaybeUninit::<ChipInfo>::uninit();
    // SAFETY: returned struct contains raw byte arrays and ints that are safe to decode.
    match unsafe {
        libc::ioctl(
            cfd,
            nix::request_code_read!(IOCTL_MAGIC, Ioctl::GetChipInfo, size_of::<ChipInfo>()),
            chip.as_mut_ptr(),
        )
    } {
        0 => Ok(unsafe { chip.assume_init() }),
        _ => Err(Error::from_errno()),
    }
}

/// Stop reporting info changes for a line on the chip fd.
///
/// Fails with EBUSY if the line is not watched.
pub fn unwatch_line_info(cfd: RawFd, offset: Offset) -> Result<()> {
    // SAFETY: offset is only read by the kernel.
    match unsafe { libc::ioctl(cfd, iorw!(Ioctl::UnwatchLineInfo, u32), &offset) } {
        0 => Ok(()),
        _ => Err(Error::from_errno()),
    }
}

/// The result returned by [`gpioline_uapi`] functions.
///
/// [`gpioline_uapi`]: crate
pub type Result<T> = std::result::Result<T, Error>;

/// The result of checking a record read from the kernel.
pub type ValidationResult = std::result::Result<(), ValidationError>;

/// Errors returned by [`gpioline_uapi`] functions.
///
/// [`gpioline_uapi`]: crate
#[derive(Clone, Debug, Eq, thiserror::Error, PartialEq)]
pub enum Error {
    /// A system call failed.
    #[error(transparent)]
    Os(Errno),

    /// Fewer bytes were read than the record requires.
    #[error(transparent)]
    UnderRead(#[from] UnderReadError),

    /// A record read from the kernel contained an unknown enum value.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl Error {
    /// Create an error from the current errno value.
    #[inline]
    pub fn from_errno() -> Error {
        Error::Os(Errno::last())
    }

    /// The errno behind the error, if it originated from a system call.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Os(e) => Some(*e),
            _ => None,
        }
    }
}

/// A system error number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Errno(pub i32);

impl Errno {
    /// The errno set by the most recent failed system call on this thread.
    pub fn last() -> Errno {
        Errno(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

impl std::error::Error for Errno {}

/// A failure to read sufficient bytes to construct an object.
//
// This should never happen - but is checked to be safe.
#[derive(Clone, Debug, Eq, thiserror::Error, PartialEq)]
#[error("Reading {obj} returned {found} bytes, expected {expected}.")]
pub struct UnderReadError {
    /// The struct that under read.
    pub obj: &'static str,

    /// The number of bytes expected.
    pub expected: usize,

    /// The number of bytes read.
    pub found: usize,
}

impl UnderReadError {
    /// Create an UnderReadError.
    pub(crate) fn new(obj: &'static str, expected: usize, found: usize) -> UnderReadError {
        UnderReadError {
            obj,
            expected,
            found,
        }
    }
}

/// A field of a record read from the kernel held an unexpected value.
//
// Only expected from a kernel newer than this crate.
#[derive(Clone, Debug, Eq, thiserror::Error, PartialEq)]
#[error("Kernel returned invalid {field}: {msg}")]
pub struct ValidationError {
    /// The struct field that failed to validate.
    pub field: String,

    /// The details of the validation failure.
    pub msg: String,
}

impl ValidationError {
    /// Create a ValidationError.
    pub fn new<S: Into<String>, T: Into<String>>(field: S, msg: T) -> ValidationError {
        ValidationError {
            field: field.into(),
            msg: msg.into(),
        }
    }
}

/// The size of a [`Name`], including any NUL padding.
pub const NAME_MAX: usize = 32;

/// A fixed size, NUL padded name, as used for chip, line and consumer names.
#[repr(C)]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Name([u8; NAME_MAX]);

impl Name {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }

    /// The length of the name, excluding padding.
    #[inline]
    pub fn strlen(&self) -> usize {
        self.0.iter().position(|&x| x == 0).unwrap_or(self.0.len())
    }

    /// The name without its padding.
    pub fn as_os_str(&self) -> &OsStr {
        OsStr::from_bytes(&self.0[..self.strlen()])
    }

    /// A name from raw bytes, truncated to [`NAME_MAX`].
    ///
    /// Truncation may split a multi-byte UTF-8 character.
    pub fn from_bytes(s: &[u8]) -> Name {
        let mut d: Name = Default::default();
        for (src, dst) in s.iter().zip(d.0.iter_mut()) {
            *dst = *src;
        }
        d
    }
}

impl FromStr for Name {
    type Err = Utf8Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Name::from_bytes(s.as_bytes()))
    }
}

/// A line's position on its chip, below [`ChipInfo::num_lines`].
pub type Offset = u32;

/// The most lines a single request may contain.
pub const NUM_LINES_MAX: usize = 64;

/// The offsets of the lines in a request, in request order.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Offsets([Offset; NUM_LINES_MAX]);

impl Offsets {
    /// Offsets for the leading lines of a request.
    pub fn from_slice(s: &[u32]) -> Self {
        let mut n: Offsets = Default::default();
        for (src, dst) in s.iter().zip(n.0.iter_mut()) {
            *dst = *src;
        }
        n
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Offset {
        self.0[idx]
    }
}

impl Default for Offsets {
    fn default() -> Self {
        Offsets([0; NUM_LINES_MAX])
    }
}

/// Reserved by the kernel, and zeroed when writing.
///
/// SIZE is in u32 words.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[doc(hidden)]
pub struct Padding<const SIZE: usize>([u32; SIZE]);

impl<const SIZE: usize> Default for Padding<SIZE> {
    fn default() -> Self {
        Padding([0; SIZE])
    }
}

/// The trigger identifier for a line info change event.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineInfoChangeKind {
    Requested = 1,
    Released = 2,
    Reconfigured = 3,
}

impl TryFrom<u32> for LineInfoChangeKind {
    type Error = String;

    fn try_from(v: u32) -> std::result::Result<Self, Self::Error> {
        use LineInfoChangeKind::*;
        Ok(match v {
            1 => Requested,
            2 => Released,
            3 => Reconfigured,
            x => return Err(format!("invalid value: {x}")),
        })
    }
}

impl LineInfoChangeKind {
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        LineInfoChangeKind::try_from(*self as u32).map(|_| ())
    }
}

/// The trigger identifier for a line edge event.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LineEdgeEventKind {
    RisingEdge = 1,
    FallingEdge = 2,
}

impl TryFrom<u32> for LineEdgeEventKind {
    type Error = String;

    fn try_from(v: u32) -> std::result::Result<Self, Self::Error> {
        use LineEdgeEventKind::*;
        Ok(match v {
            1 => RisingEdge,
            2 => FallingEdge,
            x => return Err(format!("invalid value: {x}")),
        })
    }
}

impl LineEdgeEventKind {
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        LineEdgeEventKind::try_from(*self as u32).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod chip_info {
        use super::*;

        #[test]
        fn size() {
            assert_eq!(
                size_of::<ChipInfo>(),
                68usize,
                concat!("Size of: ", stringify!(ChipInfo))
            );
        }
    }

    mod line_info_change_kind {
        use super::LineInfoChangeKind;

        #[test]
        fn try_from() {
            assert!(LineInfoChangeKind::Requested.validate().is_ok());
            assert_eq!(
                LineInfoChangeKind::try_from(3),
                Ok(LineInfoChangeKind::Reconfigured)
            );
            assert_eq!(
                LineInfoChangeKind::try_from(0).unwrap_err(),
                "invalid value: 0"
            );
            assert_eq!(
                LineInfoChangeKind::try_from(4).unwrap_err(),
                "invalid value: 4"
            );
        }
    }

    mod line_edge_event_kind {
        use super::LineEdgeEventKind;

        #[test]
        fn try_from() {
            assert!(LineEdgeEventKind::FallingEdge.validate().is_ok());
            assert_eq!(
                LineEdgeEventKind::try_from(2),
                Ok(LineEdgeEventKind::FallingEdge)
            );
            assert_eq!(
                LineEdgeEventKind::try_from(0).unwrap_err(),
                "invalid value: 0"
            );
            assert_eq!(
                LineEdgeEventKind::try_from(3).unwrap_err(),
                "invalid value: 3"
            );
        }
    }

    mod name {
        use super::*;

        #[test]
        fn from_str() {
            let mut x = [0u8; NAME_MAX];
            x[..6].copy_from_slice(b"banana");
            let mut a = Name::from_str("banana").unwrap();
            assert_eq!(a.0, x);

            a = Name::from_str("apple").unwrap();
            x[..6].copy_from_slice(b"apple\0");
            assert_eq!(a.0, x);
        }

        #[test]
        fn is_empty() {
            let mut a = Name::default();
            assert!(a.is_empty());
            a = Name::from_str("banana").unwrap();
            assert!(!a.is_empty());
        }

        #[test]
        fn strlen() {
            let mut a = Name::default();
            assert_eq!(a.strlen(), 0);
            a = Name::from_str("banana").unwrap();
            assert_eq!(a.strlen(), 6);
            a = Name::from_str("an overly long truncated name -><- cut here").unwrap();
            assert_eq!(a.strlen(), 32);
        }

        #[test]
        fn as_os_str() {
            let mut a = Name::default();
            assert_eq!(a.as_os_str(), "");
            a = Name::from_str("banana").unwrap();
            assert_eq!(a.as_os_str(), "banana");
            a = Name::from_str("an overly long truncated name -><- cut here").unwrap();
            assert_eq!(a.as_os_str(), "an overly long truncated name ->");
        }

        #[test]
        fn size() {
            assert_eq!(
                size_of::<Name>(),
                NAME_MAX,
                concat!("Size of: ", stringify!(Name))
            );
        }
    }

    mod offsets {
        use super::*;

        #[test]
        fn from_slice() {
            let a = Offsets::from_slice(&[1, 2, 3, 0, 5, 6]);
            assert_eq!(&a.0[..7], &[1, 2, 3, 0, 5, 6, 0]);
            let a = Offsets::from_slice(&[0, 3, 2, 3, 4]);
            assert_eq!(&a.0[..6], &[0, 3, 2, 3, 4, 0]);
        }

        #[test]
        fn get() {
            let a = Offsets::from_slice(&[7, 42]);
            assert_eq!(a.get(1), 42);
            assert_eq!(a.get(2), 0);
        }

        #[test]
        fn size() {
            assert_eq!(
                size_of::<Offsets>(),
                256usize,
                concat!("Size of: ", stringify!(Offsets))
            );
        }
    }

    #[test]
    fn padding_size() {
        assert_eq!(size_of::<Padding<5>>(), 20usize);
    }

    #[test]
    fn errno_display() {
        let e = Error::Os(Errno(libc::EBUSY));
        assert_eq!(e.errno(), Some(Errno(libc::EBUSY)));
        assert!(e.to_string().contains("busy"));
        let e = Error::from(UnderReadError::new("LineEdgeEvent", 48, 16));
        assert_eq!(e.errno(), None);
        assert_eq!(
            e.to_string(),
            "Reading LineEdgeEvent returned 16 bytes, expected 48."
        );
    }
}
