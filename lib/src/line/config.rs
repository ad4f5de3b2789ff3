// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::{Bias, Direction, Drive, EdgeDetection, EventClock};
use crate::{Error, Result};
use gpioline_uapi::{v1, v2};
#[cfg(feature = "serde")]
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

/// The configuration settings for a single line.
///
/// The categories are independent, other than the implicit direction changes made by
/// the mutators, which follow what the hardware requires.  e.g. edge detection is only
/// meaningful for inputs, so enabling it forces the line to input.
///
// Note it does not contain the offset to allow it to be applied to multiple lines,
// nor the output value which is tracked per offset by the request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineConfig {
    /// The direction setting for the line.
    ///
    /// None leaves the direction as is.
    pub direction: Option<Direction>,

    /// The active low setting for the line.
    pub active_low: bool,

    /// The drive setting for the line.
    ///
    /// Only relevant for output lines.
    pub drive: Drive,

    /// The bias setting for the line.
    ///
    /// None leaves the bias as is.
    pub bias: Option<Bias>,

    /// The edge detection setting for the line.
    ///
    /// Only relevant for input lines.
    pub edge_detection: Option<EdgeDetection>,

    /// The debounce period, if debouncing is enabled.
    ///
    /// Only relevant for input lines.
    pub debounce_period: Option<Duration>,

    /// The source clock for edge event timestamps.
    pub event_clock: EventClock,
}

impl LineConfig {
    pub(crate) fn to_input(&mut self) {
        self.direction = Some(Direction::Input);
        self.drive = Drive::PushPull;
    }

    pub(crate) fn to_output(&mut self) {
        self.direction = Some(Direction::Output);
        self.edge_detection = None;
        self.debounce_period = None;
    }

    pub(crate) fn set_drive(&mut self, drive: Drive) {
        self.to_output();
        self.drive = drive;
    }

    pub(crate) fn set_bias(&mut self, bias: Option<Bias>) {
        self.bias = bias;
        if bias.is_some() && self.direction.is_none() {
            self.direction = Some(Direction::Input);
        }
    }

    pub(crate) fn set_edge_detection(&mut self, edge: Option<EdgeDetection>) {
        if edge.is_some() {
            self.to_input();
        }
        self.edge_detection = edge;
    }

    pub(crate) fn set_debounce_period(&mut self, period: Duration) {
        if period.is_zero() {
            self.debounce_period = None;
        } else {
            self.to_input();
            self.debounce_period = Some(period);
        }
    }

    /// Check if the line is configured as an output.
    pub fn is_output(&self) -> bool {
        self.direction == Some(Direction::Output)
    }

    // The debounce period in microseconds, rounded up, as used by the v2 uAPI.
    pub(crate) fn debounce_period_us(&self) -> Result<Option<u32>> {
        let Some(dp) = self.debounce_period else {
            return Ok(None);
        };
        let us = dp.saturating_add(Duration::from_nanos(999)).as_micros();
        match u32::try_from(us) {
            Ok(us) => Ok(Some(us)),
            Err(_) => Err(Error::InvalidArgument(format!(
                "debounce period {dp:?} exceeds the uAPI maximum of {}us",
                u32::MAX
            ))),
        }
    }
}

impl From<&LineConfig> for v2::LineFlags {
    fn from(cfg: &LineConfig) -> v2::LineFlags {
        let mut flags = v2::LineFlags::default();
        if cfg.active_low {
            flags |= v2::LineFlags::ACTIVE_LOW;
        }
        match cfg.bias {
            None => {}
            Some(Bias::PullUp) => flags |= v2::LineFlags::BIAS_PULL_UP,
            Some(Bias::PullDown) => flags |= v2::LineFlags::BIAS_PULL_DOWN,
            Some(Bias::Disabled) => flags |= v2::LineFlags::BIAS_DISABLED,
        };
        match cfg.direction {
            None => {}
            Some(Direction::Output) => {
                flags |= v2::LineFlags::OUTPUT;
                match cfg.drive {
                    Drive::PushPull => {}
                    Drive::OpenDrain => flags |= v2::LineFlags::OPEN_DRAIN,
                    Drive::OpenSource => flags |= v2::LineFlags::OPEN_SOURCE,
                };
            }
            Some(Direction::Input) => {
                flags |= v2::LineFlags::INPUT;
                match cfg.edge_detection {
                    None => {}
                    Some(EdgeDetection::RisingEdge) => flags |= v2::LineFlags::EDGE_RISING,
                    Some(EdgeDetection::FallingEdge) => flags |= v2::LineFlags::EDGE_FALLING,
                    Some(EdgeDetection::BothEdges) => {
                        flags |= v2::LineFlags::EDGE_RISING | v2::LineFlags::EDGE_FALLING
                    }
                };
                if cfg.edge_detection.is_some() && cfg.event_clock == EventClock::Realtime {
                    flags |= v2::LineFlags::EVENT_CLOCK_REALTIME;
                }
            }
        };
        flags
    }
}

impl From<&LineConfig> for v1::EventRequestFlags {
    fn from(cfg: &LineConfig) -> v1::EventRequestFlags {
        match cfg.edge_detection {
            Some(EdgeDetection::RisingEdge) => v1::EventRequestFlags::RISING_EDGE,
            Some(EdgeDetection::FallingEdge) => v1::EventRequestFlags::FALLING_EDGE,
            Some(EdgeDetection::BothEdges) => v1::EventRequestFlags::BOTH_EDGES,
            None => v1::EventRequestFlags::default(),
        }
    }
}

impl From<&LineConfig> for v1::HandleRequestFlags {
    fn from(cfg: &LineConfig) -> v1::HandleRequestFlags {
        let mut flags = v1::HandleRequestFlags::default();
        match cfg.direction {
            None => {}
            Some(Direction::Input) => flags |= v1::HandleRequestFlags::INPUT,
            Some(Direction::Output) => {
                flags |= v1::HandleRequestFlags::OUTPUT;
                match cfg.drive {
                    Drive::PushPull => {}
                    Drive::OpenDrain => flags |= v1::HandleRequestFlags::OPEN_DRAIN,
                    Drive::OpenSource => flags |= v1::HandleRequestFlags::OPEN_SOURCE,
                };
            }
        };
        if cfg.active_low {
            flags |= v1::HandleRequestFlags::ACTIVE_LOW;
        }
        match cfg.bias {
            None => {}
            Some(Bias::PullUp) => flags |= v1::HandleRequestFlags::BIAS_PULL_UP,
            Some(Bias::PullDown) => flags |= v1::HandleRequestFlags::BIAS_PULL_DOWN,
            Some(Bias::Disabled) => flags |= v1::HandleRequestFlags::BIAS_DISABLED,
        };
        flags
    }
}
