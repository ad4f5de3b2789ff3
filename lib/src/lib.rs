// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A library for requesting, configuring and watching GPIO lines on Linux
//! platforms using the GPIO character device.
//!
//! Both generations of the kernel uAPI are supported, with the chip
//! negotiating the best one available.
//!
//! Chips are opened with [`Chip::new`], and lines requested from them
//! using a list of [`ConfigOption`]s built with the functions in the
//! [`options`] module:
//!
//! ```no_run
//! use gpioline::{options, Chip, Value};
//!
//! # fn example() -> gpioline::Result<()> {
//! let chip = Chip::new("gpiochip0", &[options::with_consumer("blinky")])?;
//! let led = chip.request_line(22, &[options::as_output(vec![Value::Active])])?;
//! led.set_value(Value::Inactive)?;
//! led.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Edge events are delivered to a handler, running on a dedicated watcher
//! thread, that is provided with [`options::with_event_handler`].

use std::fmt;
use std::path::PathBuf;

/// Chip discovery and access.
pub mod chip;
pub use chip::Chip;

/// Line configuration, info and event types.
pub mod line;
pub use line::{LineConfig, LineEvent, Offset, Value};

/// Options that compose the configuration of chips and line requests.
pub mod options;
pub use options::ConfigOption;

/// Types and functions for requested lines.
pub mod request;
pub use request::{Line, Lines};

mod watcher;

/// A generation of the GPIO character device uAPI.
///
/// v1 appeared in Linux 5.5 and v2 in Linux 5.10. Both are always available
/// to the library, and the one used is negotiated per chip.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AbiVersion {
    /// GPIO uAPI v1
    V1,

    /// GPIO uAPI v2
    #[default]
    V2,
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiVersion::V1 => write!(f, "uAPI ABI v1"),
            AbiVersion::V2 => write!(f, "uAPI ABI v2"),
        }
    }
}

/// Errors returned by [`gpioline`] functions.
///
/// [`gpioline`]: crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An option or argument cannot be applied in the given context.
    #[error("{0}")]
    InvalidArgument(String),

    /// The requested feature cannot be expressed by the uAPI version in use.
    #[error("{0} {1}.")]
    AbiLimitation(AbiVersion, String),

    /// The chip or line request has been closed.
    #[error("already closed")]
    Closed,

    /// The offset is out of range for the chip, or duplicated within a request.
    #[error("invalid offset {0}")]
    InvalidOffset(Offset),

    /// An attempt to set values on a line that is not an output.
    #[error("permission denied")]
    PermissionDenied,

    /// The configuration requires more uAPI attributes than the kernel provides.
    #[error("configuration too complex: requires {required} attributes, max {max}")]
    ConfigOverflow {
        /// The number of attributes required to encode the configuration.
        required: usize,

        /// The maximum number of attributes the uAPI supports.
        max: usize,
    },

    /// A filesystem or thread error outside the uAPI ioctls.
    #[error(transparent)]
    Os(#[from] std::io::Error),

    /// The path does not refer to a GPIO chip.
    #[error("\"{0}\" {1}.")]
    GpioChip(PathBuf, chip::ErrorKind),

    /// A uAPI ioctl or read failed.
    #[error("uAPI {0} returned: {1}")]
    Uapi(UapiCall, #[source] gpioline_uapi::Error),

    /// The ABI version is not supported by the kernel.
    #[error("{0} is not supported by the kernel.")]
    UnsupportedAbi(AbiVersion),

    /// There are no GPIO chips on the system.
    #[error("No GPIO chips are available")]
    NoGpioChips,
}

impl Error {
    /// The raw OS error code underlying the error, if any.
    ///
    /// e.g. `libc::EBUSY` when a requested line is already in use.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Error::Uapi(_, e) => e.errno().map(|errno| errno.0),
            Error::Os(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

/// The uAPI call that failed, reported in [`Error::Uapi`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UapiCall {
    GetChipInfo,
    /// v2 line request.
    GetLine,
    /// v1 edge event request.
    GetLineEvent,
    /// v1 line request.
    GetLineHandle,
    GetLineInfo,
    GetLineValues,
    /// A read of an edge or info change event.
    ReadEvent,
    SetLineConfig,
    SetLineValues,
    UnwatchLineInfo,
    WatchLineInfo,
}

impl fmt::Display for UapiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UapiCall::GetChipInfo => "get_chip_info",
            UapiCall::GetLine => "get_line",
            UapiCall::GetLineEvent => "get_line_event",
            UapiCall::GetLineHandle => "get_line_handle",
            UapiCall::GetLineInfo => "get_line_info",
            UapiCall::GetLineValues => "get_line_values",
            UapiCall::ReadEvent => "read_event",
            UapiCall::SetLineConfig => "set_line_config",
            UapiCall::SetLineValues => "set_line_values",
            UapiCall::UnwatchLineInfo => "unwatch_line_info",
            UapiCall::WatchLineInfo => "watch_line_info",
        })
    }
}

/// The result returned by [`gpioline`] functions.
///
/// [`gpioline`]: crate
pub type Result<T> = std::result::Result<T, Error>;

/// The most recent uAPI ABI the kernel supports.
///
/// The first available chip is queried.
pub fn detect_abi_version() -> Result<AbiVersion> {
    for p in chip::chips()? {
        if let Ok(c) = Chip::from_path(&p) {
            return c.detect_abi_version();
        }
    }
    Err(Error::NoGpioChips)
}

/// Check if the platform supports the given uAPI ABI.
///
/// The first available chip is queried.
pub fn supports_abi_version(abiv: AbiVersion) -> Result<()> {
    for p in chip::chips()? {
        if let Ok(c) = Chip::from_path(&p) {
            return c.supports_abi_version(abiv);
        }
    }
    Err(Error::NoGpioChips)
}

// Recover the guarded state even if a panicking thread poisoned the lock.
pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_version_display() {
        assert_eq!(AbiVersion::V1.to_string(), "uAPI ABI v1");
        assert_eq!(AbiVersion::V2.to_string(), "uAPI ABI v2");
        assert_eq!(AbiVersion::default(), AbiVersion::V2);
    }

    #[test]
    fn error_display() {
        assert_eq!(
            Error::AbiLimitation(AbiVersion::V1, "does not support debounce".into()).to_string(),
            "uAPI ABI v1 does not support debounce."
        );
        assert_eq!(
            Error::ConfigOverflow {
                required: 11,
                max: 10
            }
            .to_string(),
            "configuration too complex: requires 11 attributes, max 10"
        );
        assert_eq!(Error::Closed.to_string(), "already closed");
        assert_eq!(Error::InvalidOffset(7).to_string(), "invalid offset 7");
    }

    #[test]
    fn error_errno() {
        let e = Error::Uapi(
            UapiCall::GetLine,
            gpioline_uapi::Error::Os(gpioline_uapi::Errno(libc::EBUSY)),
        );
        assert_eq!(e.errno(), Some(libc::EBUSY));
        assert_eq!(
            e.to_string(),
            format!("uAPI get_line returned: {}", gpioline_uapi::Errno(libc::EBUSY))
        );
        assert_eq!(Error::Closed.errno(), None);
    }
}
