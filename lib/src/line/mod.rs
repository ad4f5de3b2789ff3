// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

mod config;
pub use self::config::LineConfig;

mod event;
pub use self::event::{EdgeKind, InfoChangeEvent, InfoChangeKind, LineEvent};

mod info;
pub use self::info::Info;
pub(crate) use self::info::name_to_string;

mod value;
pub use self::value::Value;

#[cfg(feature = "serde")]
use serde_derive::{Deserialize, Serialize};

/// An identifier for a line on a particular chip, in the range 0..`num_lines`.
pub type Offset = u32;

/// The direction of a line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    Input,
    Output,
}

/// The passive termination applied to a line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Bias {
    PullUp,
    PullDown,

    /// Neither pull-up nor pull-down, so the line floats unless driven.
    Disabled,
}

/// How an output line is driven.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Drive {
    /// Driven both high and low.
    #[default]
    PushPull,

    /// Driven low, and high impedance when high.
    OpenDrain,

    /// Driven high, and high impedance when low.
    OpenSource,
}

/// The transitions of an input line that generate edge events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EdgeDetection {
    /// Inactive to active.
    RisingEdge,

    /// Active to inactive.
    FallingEdge,

    BothEdges,
}

/// The clock used to timestamp [`LineEvent`]s.
///
/// The v1 uAPI always uses the monotonic clock.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventClock {
    #[default]
    Monotonic,
    Realtime,
}
