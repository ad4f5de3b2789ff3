// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A thin but safe Rust layer around both generations of the Linux GPIO uAPI.
//!
//! The structures here are bit-exact with the kernel definitions in
//! `include/uapi/linux/gpio.h` and the functions map one-to-one onto the ioctls.

pub(crate) mod common;

pub use common::{
    has_event, read_event, Errno, Error, Name, Offset, Result, UnderReadError,
    ValidationError, NAME_MAX, NUM_LINES_MAX,
};

/// GPIO ABI v1, released in Linux v4.8.
///
/// This ABI version is deprecated, but is all that older kernels provide.
pub mod v1;

/// GPIO ABI v2, the current version of the ABI, released in Linux v5.10.
pub mod v2;
