// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::{Info, Offset};
use gpioline_uapi::v2::{LineEdgeEventKind, LineInfoChangeKind};
use gpioline_uapi::{v1, v2};
#[cfg(feature = "serde")]
use serde_derive::{Deserialize, Serialize};

/// An edge detected on a requested line.
///
/// The sequence numbers are only provided by the v2 uAPI, and are zero under v1.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineEvent {
    /// The kernel timestamp of the edge, in nanoseconds, from the clock
    /// selected by the line's [`EventClock`](super::EventClock).
    pub timestamp_ns: u64,

    pub kind: EdgeKind,

    pub offset: Offset,

    /// The position of the event among all events from the request.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "is_zero"))]
    pub seqno: u32,

    /// The position of the event among events from this line.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "lineSeqno", skip_serializing_if = "is_zero")
    )]
    pub line_seqno: u32,
}

impl LineEvent {
    // v1 events come from a per-line fd so the offset is known only to the reader.
    pub(crate) fn from_v1(le: &v1::LineEdgeEvent, offset: Offset) -> LineEvent {
        LineEvent {
            timestamp_ns: le.timestamp_ns,
            kind: le.kind.into(),
            offset,
            seqno: 0,
            line_seqno: 0,
        }
    }
}

impl From<&v2::LineEdgeEvent> for LineEvent {
    fn from(le: &v2::LineEdgeEvent) -> Self {
        LineEvent {
            timestamp_ns: le.timestamp_ns,
            kind: le.kind.into(),
            offset: le.offset,
            seqno: le.seqno,
            line_seqno: le.line_seqno,
        }
    }
}

#[cfg(feature = "serde")]
fn is_zero(u: &u32) -> bool {
    *u == 0
}

/// The cause of a [`LineEvent`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EdgeKind {
    Rising = 1,
    Falling = 2,
}

impl From<LineEdgeEventKind> for EdgeKind {
    fn from(kind: LineEdgeEventKind) -> Self {
        match kind {
            LineEdgeEventKind::RisingEdge => EdgeKind::Rising,
            LineEdgeEventKind::FallingEdge => EdgeKind::Falling,
        }
    }
}

/// A change to the [`Info`] of a watched line.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InfoChangeEvent {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub info: Info,

    /// CLOCK_MONOTONIC, in nanoseconds.
    pub timestamp_ns: u64,

    pub kind: InfoChangeKind,
}

impl From<&v1::LineInfoChangeEvent> for InfoChangeEvent {
    fn from(ice: &v1::LineInfoChangeEvent) -> Self {
        InfoChangeEvent {
            info: Info::from(&ice.info),
            timestamp_ns: ice.timestamp_ns,
            kind: ice.kind.into(),
        }
    }
}

impl From<&v2::LineInfoChangeEvent> for InfoChangeEvent {
    fn from(ice: &v2::LineInfoChangeEvent) -> Self {
        InfoChangeEvent {
            info: Info::from(&ice.info),
            timestamp_ns: ice.timestamp_ns,
            kind: ice.kind.into(),
        }
    }
}

/// The cause of an [`InfoChangeEvent`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InfoChangeKind {
    Requested = 1,
    Released = 2,
    Reconfigured = 3,
}

impl From<LineInfoChangeKind> for InfoChangeKind {
    fn from(kind: LineInfoChangeKind) -> Self {
        match kind {
            LineInfoChangeKind::Requested => InfoChangeKind::Requested,
            LineInfoChangeKind::Released => InfoChangeKind::Released,
            LineInfoChangeKind::Reconfigured => InfoChangeKind::Reconfigured,
        }
    }
}
