// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::{Bias, Direction, Drive, EdgeDetection, EventClock, Offset};
use gpioline_uapi::{v1, v2, Name};
#[cfg(feature = "serde")]
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

/// The state of a line as reported by the kernel.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct Info {
    pub offset: Offset,

    /// The name assigned by the chip driver or device tree, if any.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "String::is_empty"))]
    pub name: String,

    /// The label of the current holder of the line, if any.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "String::is_empty"))]
    pub consumer: String,

    /// Held by a request, or otherwise claimed by the kernel.
    pub used: bool,

    pub active_low: bool,

    /// Unknown when the v2 uAPI reports neither input nor output.
    pub direction: Option<Direction>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub bias: Option<Bias>,

    /// Only set for outputs.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub drive: Option<Drive>,

    /// Not reported by the v1 uAPI.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub edge_detection: Option<EdgeDetection>,

    /// Only set when edge detection is enabled.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub event_clock: Option<EventClock>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub debounce_period: Option<Duration>,
}

pub(crate) fn name_to_string(n: &Name) -> String {
    n.as_os_str().to_string_lossy().into_owned()
}

// The value paired with the first flag that is set, if any.
fn first_set<T: Copy>(table: &[(bool, T)]) -> Option<T> {
    table.iter().find_map(|&(set, v)| set.then_some(v))
}

impl From<&v1::LineInfo> for Info {
    fn from(li: &v1::LineInfo) -> Self {
        use v1::LineInfoFlags as F;
        let f = li.flags;
        let output = f.contains(F::OUTPUT);
        Info {
            offset: li.offset,
            name: name_to_string(&li.name),
            consumer: name_to_string(&li.consumer),
            used: f.contains(F::USED),
            active_low: f.contains(F::ACTIVE_LOW),
            // v1 has no input flag, so anything not an output is an input
            direction: Some(if output {
                Direction::Output
            } else {
                Direction::Input
            }),
            bias: first_set(&[
                (f.contains(F::BIAS_PULL_UP), Bias::PullUp),
                (f.contains(F::BIAS_PULL_DOWN), Bias::PullDown),
                (f.contains(F::BIAS_DISABLED), Bias::Disabled),
            ]),
            drive: output.then(|| {
                first_set(&[
                    (f.contains(F::OPEN_DRAIN), Drive::OpenDrain),
                    (f.contains(F::OPEN_SOURCE), Drive::OpenSource),
                ])
                .unwrap_or_default()
            }),
            ..Default::default()
        }
    }
}

impl From<&v2::LineInfo> for Info {
    fn from(li: &v2::LineInfo) -> Self {
        use v2::LineFlags as F;
        let f = li.flags;
        let direction = first_set(&[
            (f.contains(F::OUTPUT), Direction::Output),
            (f.contains(F::INPUT), Direction::Input),
        ]);
        let edge_detection = match (f.contains(F::EDGE_RISING), f.contains(F::EDGE_FALLING)) {
            (true, true) => Some(EdgeDetection::BothEdges),
            (true, false) => Some(EdgeDetection::RisingEdge),
            (false, true) => Some(EdgeDetection::FallingEdge),
            (false, false) => None,
        };
        let debounce_period = li.active_attrs().iter().find_map(|attr| match attr.to_value() {
            Some(v2::LineAttributeValue::DebouncePeriod(dp)) if !dp.is_zero() => Some(dp),
            _ => None,
        });
        Info {
            offset: li.offset,
            name: name_to_string(&li.name),
            consumer: name_to_string(&li.consumer),
            used: f.contains(F::USED),
            active_low: f.contains(F::ACTIVE_LOW),
            direction,
            bias: first_set(&[
                (f.contains(F::BIAS_PULL_UP), Bias::PullUp),
                (f.contains(F::BIAS_PULL_DOWN), Bias::PullDown),
                (f.contains(F::BIAS_DISABLED), Bias::Disabled),
            ]),
            drive: (direction == Some(Direction::Output)).then(|| {
                first_set(&[
                    (f.contains(F::OPEN_DRAIN), Drive::OpenDrain),
                    (f.contains(F::OPEN_SOURCE), Drive::OpenSource),
                ])
                .unwrap_or_default()
            }),
            edge_detection,
            event_clock: edge_detection.map(|_| {
                if f.contains(F::EVENT_CLOCK_REALTIME) {
                    EventClock::Realtime
                } else {
                    EventClock::Monotonic
                }
            }),
            debounce_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_v1_line_info() {
        let info = Info::from(&v1::LineInfo::default());
        assert_eq!(info.offset, 0);
        assert!(info.name.is_empty());
        assert!(!info.used);
        assert_eq!(info.direction, Some(Direction::Input));
        assert!(info.drive.is_none());

        let v1info = v1::LineInfo {
            offset: 32,
            flags: v1::LineInfoFlags::USED
                | v1::LineInfoFlags::ACTIVE_LOW
                | v1::LineInfoFlags::OUTPUT
                | v1::LineInfoFlags::OPEN_DRAIN
                | v1::LineInfoFlags::BIAS_PULL_DOWN,
            name: "banana".parse().unwrap(),
            consumer: "jam".parse().unwrap(),
        };
        let info = Info::from(&v1info);
        assert_eq!(info.offset, 32);
        assert_eq!(info.name, "banana");
        assert_eq!(info.consumer, "jam");
        assert!(info.used);
        assert!(info.active_low);
        assert_eq!(info.direction, Some(Direction::Output));
        assert_eq!(info.bias, Some(Bias::PullDown));
        assert_eq!(info.drive, Some(Drive::OpenDrain));
        assert!(info.edge_detection.is_none());
        assert!(info.debounce_period.is_none());
    }

    #[test]
    fn from_v2_line_info() {
        let info = Info::from(&v2::LineInfo::default());
        assert_eq!(info.direction, None);
        assert!(info.event_clock.is_none());

        let mut v2info = v2::LineInfo {
            offset: 7,
            flags: v2::LineFlags::USED
                | v2::LineFlags::INPUT
                | v2::LineFlags::EDGE_RISING
                | v2::LineFlags::EVENT_CLOCK_REALTIME
                | v2::LineFlags::BIAS_PULL_UP,
            name: "pear".parse().unwrap(),
            consumer: "tart".parse().unwrap(),
            num_attrs: 1,
            ..Default::default()
        };
        v2info.attrs.0[0].set_debounce_period_us(1500);
        let info = Info::from(&v2info);
        assert_eq!(info.offset, 7);
        assert_eq!(info.name, "pear");
        assert_eq!(info.consumer, "tart");
        assert!(info.used);
        assert_eq!(info.direction, Some(Direction::Input));
        assert_eq!(info.bias, Some(Bias::PullUp));
        assert!(info.drive.is_none());
        assert_eq!(info.edge_detection, Some(EdgeDetection::RisingEdge));
        assert_eq!(info.event_clock, Some(EventClock::Realtime));
        assert_eq!(info.debounce_period, Some(Duration::from_micros(1500)));
    }

    #[test]
    fn v2_drive_and_edges() {
        let v2info = v2::LineInfo {
            flags: v2::LineFlags::OUTPUT | v2::LineFlags::OPEN_SOURCE,
            ..Default::default()
        };
        let info = Info::from(&v2info);
        assert_eq!(info.direction, Some(Direction::Output));
        assert_eq!(info.drive, Some(Drive::OpenSource));
        assert!(info.edge_detection.is_none());

        let v2info = v2::LineInfo {
            flags: v2::LineFlags::INPUT
                | v2::LineFlags::EDGE_RISING
                | v2::LineFlags::EDGE_FALLING
                | v2::LineFlags::BIAS_DISABLED,
            ..Default::default()
        };
        let info = Info::from(&v2info);
        assert_eq!(info.edge_detection, Some(EdgeDetection::BothEdges));
        assert_eq!(info.event_clock, Some(EventClock::Monotonic));
        assert_eq!(info.bias, Some(Bias::Disabled));
        assert!(info.debounce_period.is_none());
    }
}
