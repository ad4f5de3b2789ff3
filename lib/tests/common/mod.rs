// SPDX-FileCopyrightText: 2023 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![allow(dead_code)]

use gpioline::{options, AbiVersion, Chip};
use std::path::Path;
use std::time::Duration;

// how long to wait for an event to arrive, or to confirm none does
pub const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(25);

// time for a simulated level change to reach the line request
const SETTLE_TIME: Duration = Duration::from_millis(10);

pub fn wait_propagation_delay() {
    std::thread::sleep(SETTLE_TIME);
}

// The current CLOCK_MONOTONIC time, the default source of edge event timestamps.
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is valid for writes for the duration of the call.
    assert_eq!(unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) }, 0);
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

pub fn new_chip(path: &Path, abiv: AbiVersion) -> Chip {
    Chip::new(path, &[options::with_abi_version(abiv)]).unwrap()
}

// Instantiate tests, written as fns taking an AbiVersion, for a particular ABI.
#[macro_export]
macro_rules! common_tests {
    ($abiv:expr, $($name:ident),*) => {
        $(
            #[test]
            fn $name() {
                super::$name($abiv)
            }
        )*
    }
}
