// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

// Conversions from line configuration to the uAPI request structures.
//
// All checks are performed here, before any ioctl is issued, so a
// configuration that cannot be expressed never reaches the kernel.

use crate::line::{EventClock, LineConfig};
use crate::options::LineConfigOptions;
use crate::{AbiVersion, Error, Result};
use gpioline_uapi::{v1, v2, Name, NUM_LINES_MAX};

fn check_num_lines(lco: &LineConfigOptions) -> Result<()> {
    if lco.offsets.is_empty() {
        return Err(Error::InvalidArgument("No lines specified.".into()));
    }
    if lco.offsets.len() > NUM_LINES_MAX {
        return Err(Error::InvalidArgument(format!(
            "Too many lines requested: {} > {}.",
            lco.offsets.len(),
            NUM_LINES_MAX
        )));
    }
    Ok(())
}

// v1

/// The configuration shared by all lines, if v1 can express it.
fn v1_config(lco: &LineConfigOptions) -> Result<&LineConfig> {
    if !lco.is_uniform() {
        return Err(Error::AbiLimitation(
            AbiVersion::V1,
            "requires all lines to share the same configuration".into(),
        ));
    }
    let cfg = &lco.default;
    if cfg.debounce_period.is_some() {
        return Err(Error::AbiLimitation(
            AbiVersion::V1,
            "does not support debounce".into(),
        ));
    }
    if cfg.event_clock != EventClock::Monotonic {
        return Err(Error::AbiLimitation(
            AbiVersion::V1,
            "does not support selecting the event clock source".into(),
        ));
    }
    Ok(cfg)
}

// v1 handles have no edge flags, edges need an event request per line.
fn v1_handle_flags(cfg: &LineConfig) -> Result<v1::HandleRequestFlags> {
    if cfg.edge_detection.is_some() {
        return Err(Error::AbiLimitation(
            AbiVersion::V1,
            "does not support edge detection on line handles".into(),
        ));
    }
    Ok(cfg.into())
}

fn v1_values(lco: &LineConfigOptions) -> v1::LineValues {
    let mut values = v1::LineValues::default();
    for (idx, offset) in lco.offsets.iter().enumerate() {
        values.set(idx, lco.value(*offset).into());
    }
    values
}

/// The request for a v1 line handle, covering all lines.
pub(crate) fn v1_handle_request(
    lco: &LineConfigOptions,
    consumer: &str,
) -> Result<v1::HandleRequest> {
    check_num_lines(lco)?;
    let cfg = v1_config(lco)?;
    let flags = v1_handle_flags(cfg)?;
    let values = if cfg.is_output() {
        v1_values(lco)
    } else {
        v1::LineValues::default()
    };
    Ok(v1::HandleRequest {
        offsets: v1::Offsets::from_slice(&lco.offsets),
        flags,
        values,
        consumer: Name::from_bytes(consumer.as_bytes()),
        num_lines: lco.offsets.len() as u32,
        ..Default::default()
    })
}

/// The requests for v1 event lines, one per line.
pub(crate) fn v1_event_requests(
    lco: &LineConfigOptions,
    consumer: &str,
) -> Result<Vec<v1::EventRequest>> {
    check_num_lines(lco)?;
    let cfg = v1_config(lco)?;
    let handleflags = v1::HandleRequestFlags::from(cfg);
    let eventflags = v1::EventRequestFlags::from(cfg);
    let consumer = Name::from_bytes(consumer.as_bytes());
    Ok(lco
        .offsets
        .iter()
        .map(|offset| v1::EventRequest {
            offset: *offset,
            handleflags,
            eventflags,
            consumer: consumer.clone(),
            ..Default::default()
        })
        .collect())
}

/// The config to update an existing v1 line handle.
pub(crate) fn v1_handle_config(lco: &LineConfigOptions) -> Result<v1::HandleConfig> {
    let cfg = v1_config(lco)?;
    let flags = v1_handle_flags(cfg)?;
    let values = if cfg.is_output() {
        v1_values(lco)
    } else {
        v1::LineValues::default()
    };
    Ok(v1::HandleConfig {
        flags,
        values,
        ..Default::default()
    })
}

// v2

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Attr {
    Flags(v2::LineFlags),
    Debounce(u32),
}

impl Attr {
    fn same_kind(&self, other: &Attr) -> bool {
        matches!(
            (self, other),
            (Attr::Flags(_), Attr::Flags(_)) | (Attr::Debounce(_), Attr::Debounce(_))
        )
    }
}

#[derive(Debug)]
struct Entry {
    attr: Attr,
    mask: u64,
}

// Move the line to the entry with the attr, adding the entry if necessary.
fn merge(entries: &mut Vec<Entry>, attr: Attr, bit: u64) {
    unset(entries, &attr, bit);
    match entries.iter_mut().find(|e| e.attr == attr) {
        Some(e) => e.mask |= bit,
        None => entries.push(Entry { attr, mask: bit }),
    }
}

// Remove the line from all entries of the same kind as attr.
fn unset(entries: &mut [Entry], attr: &Attr, bit: u64) {
    for e in entries.iter_mut().filter(|e| e.attr.same_kind(attr)) {
        e.mask &= !bit;
    }
}

/// The v2 encoding of the configuration of all lines.
///
/// Lines with the default configuration use the config flags, and all
/// other flags, debounce periods and output values are packed into
/// attributes, each with a mask of the line indices it applies to.
/// Each line appears in at most one attribute of each kind, with later
/// lines moving between attributes bit by bit, so attributes whose lines
/// have all moved away are dropped.
pub(crate) fn v2_line_config(lco: &LineConfigOptions) -> Result<v2::LineConfig> {
    let all = v2::mask_of_len(lco.offsets.len());
    let flags = v2::LineFlags::from(&lco.default);
    // the first entry becomes the config flags and is never emitted as an attribute
    let mut entries = vec![Entry {
        attr: Attr::Flags(flags),
        mask: all,
    }];
    if let Some(period_us) = lco.default.debounce_period_us()? {
        entries.push(Entry {
            attr: Attr::Debounce(period_us),
            mask: all,
        });
    }
    let mut values = v2::LineValues::default();
    for (idx, offset) in lco.offsets.iter().enumerate() {
        let cfg = lco.config(*offset);
        if cfg.is_output() {
            values.set(idx, lco.value(*offset).into());
        }
    }
    if let Some(overrides) = lco.overrides.as_ref() {
        for (idx, offset) in lco.offsets.iter().enumerate() {
            let Some(cfg) = overrides.get(offset) else {
                continue;
            };
            let bit = 1u64 << idx;
            merge(&mut entries, Attr::Flags(cfg.into()), bit);
            match cfg.debounce_period_us()? {
                Some(period_us) => merge(&mut entries, Attr::Debounce(period_us), bit),
                None => unset(&mut entries, &Attr::Debounce(0), bit),
            }
        }
    }
    let attrs: Vec<&Entry> = entries[1..].iter().filter(|e| e.mask != 0).collect();
    let required = attrs.len() + usize::from(values.mask != 0);
    if required > v2::NUM_ATTRS_MAX {
        return Err(Error::ConfigOverflow {
            required,
            max: v2::NUM_ATTRS_MAX,
        });
    }
    let mut lc = v2::LineConfig {
        flags,
        ..Default::default()
    };
    for e in attrs {
        match e.attr {
            Attr::Flags(flags) => lc.add_flags(flags, e.mask),
            Attr::Debounce(period_us) => lc.add_debounce(period_us, e.mask),
        }
    }
    if values.mask != 0 {
        lc.add_values(&values);
    }
    Ok(lc)
}

/// The v2 request for all lines.
pub(crate) fn v2_line_request(
    lco: &LineConfigOptions,
    consumer: &str,
    event_buffer_size: u32,
) -> Result<v2::LineRequest> {
    check_num_lines(lco)?;
    Ok(v2::LineRequest {
        offsets: v2::Offsets::from_slice(&lco.offsets),
        consumer: Name::from_bytes(consumer.as_bytes()),
        config: v2_line_config(lco)?,
        num_lines: lco.offsets.len() as u32,
        event_buffer_size,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::Offset;
    use crate::options::*;
    use std::time::Duration;

    fn lco(offsets: &[Offset], opts: &[ConfigOption]) -> LineConfigOptions {
        RequestOptions::new(&ChipOptions::default(), offsets, opts)
            .unwrap()
            .lco
    }

    fn attrs(lc: &v2::LineConfig) -> Vec<(v2::LineAttributeValue, u64)> {
        lc.active_attrs()
            .iter()
            .map(|lca| (lca.attr.to_value().unwrap(), lca.mask))
            .collect()
    }

    mod abi_v1 {
        use super::*;

        #[test]
        fn handle_request() {
            let lco = lco(
                &[3, 1, 2],
                &[as_output([1u8, 0, 1]), as_active_low(), as_open_drain()],
            );
            let hr = v1_handle_request(&lco, "test").unwrap();
            assert_eq!(hr.num_lines, 3);
            assert_eq!(hr.offsets.get(0), 3);
            assert_eq!(hr.offsets.get(2), 2);
            assert_eq!(
                hr.flags,
                v1::HandleRequestFlags::OUTPUT
                    | v1::HandleRequestFlags::ACTIVE_LOW
                    | v1::HandleRequestFlags::OPEN_DRAIN
            );
            assert_eq!(hr.values.get(0), 1);
            assert_eq!(hr.values.get(1), 0);
            assert_eq!(hr.values.get(2), 1);
            assert_eq!(hr.consumer.as_os_str(), "test");
        }

        #[test]
        fn handle_request_input() {
            let lco = lco(&[4], &[as_output([1u8]), as_input(), with_pull_up()]);
            let hr = v1_handle_request(&lco, "test").unwrap();
            assert_eq!(
                hr.flags,
                v1::HandleRequestFlags::INPUT | v1::HandleRequestFlags::BIAS_PULL_UP
            );
            assert_eq!(hr.values.get(0), 0);
        }

        #[test]
        fn values_only_differ() {
            let lco = lco(
                &[1, 2],
                &[as_output([0u8, 0]), with_lines(&[2], [as_output([1u8])])],
            );
            let hr = v1_handle_request(&lco, "test").unwrap();
            assert_eq!(hr.values.get(0), 0);
            assert_eq!(hr.values.get(1), 1);
        }

        #[test]
        fn per_line_config() {
            let lco = lco(&[1, 2], &[with_lines(&[2], [as_active_low()])]);
            assert_eq!(
                v1_handle_request(&lco, "test").unwrap_err().to_string(),
                "uAPI ABI v1 requires all lines to share the same configuration."
            );
        }

        #[test]
        fn debounce() {
            let lco = lco(&[1], &[with_debounce_period(Duration::from_millis(10))]);
            let err = v1_handle_request(&lco, "test").unwrap_err();
            assert!(matches!(err, Error::AbiLimitation(AbiVersion::V1, _)));
            assert_eq!(err.to_string(), "uAPI ABI v1 does not support debounce.");
            assert!(v1_event_requests(&lco, "test").is_err());
            assert!(v1_handle_config(&lco).is_err());
        }

        #[test]
        fn event_clock() {
            let lco = lco(
                &[1],
                &[with_both_edges(), with_event_clock(EventClock::Realtime)],
            );
            assert_eq!(
                v1_event_requests(&lco, "test").unwrap_err().to_string(),
                "uAPI ABI v1 does not support selecting the event clock source."
            );
        }

        #[test]
        fn event_requests() {
            let lco = lco(&[5, 7], &[with_falling_edge(), as_active_low()]);
            let ers = v1_event_requests(&lco, "watcher").unwrap();
            assert_eq!(ers.len(), 2);
            assert_eq!(ers[0].offset, 5);
            assert_eq!(ers[1].offset, 7);
            for er in ers {
                assert_eq!(
                    er.handleflags,
                    v1::HandleRequestFlags::INPUT | v1::HandleRequestFlags::ACTIVE_LOW
                );
                assert_eq!(er.eventflags, v1::EventRequestFlags::FALLING_EDGE);
                assert_eq!(er.consumer.as_os_str(), "watcher");
            }
        }

        #[test]
        fn handle_config() {
            let lco = lco(&[1, 2], &[as_output([1u8, 0])]);
            let hc = v1_handle_config(&lco).unwrap();
            assert_eq!(hc.flags, v1::HandleRequestFlags::OUTPUT);
            assert_eq!(hc.values.get(0), 1);
            assert_eq!(hc.values.get(1), 0);
        }

        #[test]
        fn handle_config_edges() {
            let lco = lco(&[1, 2], &[as_input()]);
            let lco = reconfigured(&lco, &[with_both_edges()]).unwrap();
            let err = v1_handle_config(&lco).unwrap_err();
            assert!(matches!(err, Error::AbiLimitation(AbiVersion::V1, _)));
            assert_eq!(
                err.to_string(),
                "uAPI ABI v1 does not support edge detection on line handles."
            );
            assert!(v1_handle_request(&lco, "test").is_err());

            // edges are removed again
            let lco = reconfigured(&lco, &[without_edges()]).unwrap();
            assert!(v1_handle_config(&lco).is_ok());
        }

        #[test]
        fn no_lines() {
            let lco = lco(&[], &[]);
            assert!(matches!(
                v1_handle_request(&lco, "test"),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    mod abi_v2 {
        use super::*;
        use gpioline_uapi::v2::LineAttributeValue::*;

        #[test]
        fn uniform() {
            let lco = lco(&[1, 2, 3], &[as_input(), with_both_edges()]);
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(
                lc.flags,
                v2::LineFlags::INPUT | v2::LineFlags::EDGE_RISING | v2::LineFlags::EDGE_FALLING
            );
            assert_eq!(lc.num_attrs, 0);
        }

        #[test]
        fn default_debounce() {
            let lco = lco(&[1, 2], &[with_debounce_period(Duration::from_micros(1500))]);
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(lc.flags, v2::LineFlags::INPUT);
            assert_eq!(
                attrs(&lc),
                vec![(DebouncePeriod(Duration::from_micros(1500)), 0b11)]
            );
        }

        #[test]
        fn outputs() {
            let lco = lco(&[0, 3], &[as_output([1u8, 0])]);
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(lc.flags, v2::LineFlags::OUTPUT);
            assert_eq!(attrs(&lc), vec![(Values(0b01), 0b11)]);

            // outputs all inactive still specify the values
            let lco = super::lco(&[0, 3], &[as_output([0u8])]);
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(attrs(&lc), vec![(Values(0), 0b11)]);
        }

        #[test]
        fn overrides() {
            let lco = lco(
                &[1, 2, 3, 4],
                &[
                    as_input(),
                    with_lines(&[2, 4], [as_active_low()]),
                    with_lines(&[3], [as_output([1u8])]),
                ],
            );
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(lc.flags, v2::LineFlags::INPUT);
            assert_eq!(
                attrs(&lc),
                vec![
                    (
                        Flags(v2::LineFlags::INPUT | v2::LineFlags::ACTIVE_LOW),
                        0b1010
                    ),
                    (Flags(v2::LineFlags::OUTPUT), 0b0100),
                    (Values(0b0100), 0b0100),
                ]
            );
        }

        #[test]
        fn override_matching_default() {
            // branched but unchanged lines stay with the config flags
            let lco = lco(&[1, 2], &[as_input(), with_lines(&[2], [as_input()])]);
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(lc.flags, v2::LineFlags::INPUT);
            assert_eq!(lc.num_attrs, 0);
        }

        #[test]
        fn override_debounce() {
            let lco = lco(
                &[1, 2, 3],
                &[
                    with_debounce_period(Duration::from_millis(1)),
                    with_lines(&[2], [with_debounce_period(Duration::from_millis(2))]),
                    with_lines(&[3], [without_debounce()]),
                ],
            );
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(lc.flags, v2::LineFlags::INPUT);
            assert_eq!(
                attrs(&lc),
                vec![
                    (DebouncePeriod(Duration::from_millis(1)), 0b001),
                    (DebouncePeriod(Duration::from_millis(2)), 0b010),
                ]
            );
        }

        #[test]
        fn empty_entries_dropped() {
            // all lines move away from the default flags
            let lco = lco(
                &[1, 2],
                &[
                    as_input(),
                    with_lines(&[1, 2], [as_active_low()]),
                ],
            );
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(lc.flags, v2::LineFlags::INPUT);
            assert_eq!(
                attrs(&lc),
                vec![(
                    Flags(v2::LineFlags::INPUT | v2::LineFlags::ACTIVE_LOW),
                    0b11
                )]
            );
        }

        #[test]
        fn overflow() {
            let offsets: Vec<Offset> = (0..12).collect();
            let mut opts = vec![as_input()];
            // each line gets a distinct debounce period
            for offset in 0..11 {
                opts.push(with_lines(
                    &[offset],
                    [with_debounce_period(Duration::from_micros(
                        u64::from(offset) + 1,
                    ))],
                ));
            }
            let lco = lco(&offsets, &opts);
            assert!(matches!(
                v2_line_config(&lco),
                Err(Error::ConfigOverflow {
                    required: 11,
                    max: 10
                })
            ));

            // ten fit
            opts.pop();
            let lco = super::lco(&offsets, &opts);
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(lc.num_attrs, 10);
        }

        #[test]
        fn values_count_toward_limit() {
            let offsets: Vec<Offset> = (0..10).collect();
            let mut opts = vec![as_input()];
            for offset in 0..9 {
                opts.push(with_lines(
                    &[offset],
                    [with_debounce_period(Duration::from_micros(
                        u64::from(offset) + 1,
                    ))],
                ));
            }
            let lco = lco(&offsets, &opts);
            assert_eq!(v2_line_config(&lco).unwrap().num_attrs, 9);

            opts.push(with_lines(&[9], [as_output([1u8])]));
            let lco = super::lco(&offsets, &opts);
            // flags for line 9 and its value
            assert!(matches!(
                v2_line_config(&lco),
                Err(Error::ConfigOverflow {
                    required: 11,
                    max: 10
                })
            ));
        }

        #[test]
        fn debounce_out_of_range() {
            let lco = lco(
                &[1, 2],
                &[with_lines(
                    &[2],
                    [with_debounce_period(Duration::from_secs(5000))],
                )],
            );
            assert!(matches!(
                v2_line_config(&lco),
                Err(Error::InvalidArgument(_))
            ));

            let lco = super::lco(&[1], &[with_debounce_period(Duration::from_secs(5000))]);
            assert!(matches!(
                v2_line_request(&lco, "test", 0),
                Err(Error::InvalidArgument(_))
            ));
        }

        #[test]
        fn unrequested_overrides_ignored() {
            let lco = lco(&[1, 2], &[with_lines(&[7], [as_open_drain()])]);
            let lc = v2_line_config(&lco).unwrap();
            assert_eq!(lc.num_attrs, 0);
        }

        #[test]
        fn line_request() {
            let lco = lco(&[4, 2], &[with_rising_edge()]);
            let lr = v2_line_request(&lco, "edgy", 32).unwrap();
            assert_eq!(lr.num_lines, 2);
            assert_eq!(lr.offsets.get(0), 4);
            assert_eq!(lr.offsets.get(1), 2);
            assert_eq!(lr.consumer.as_os_str(), "edgy");
            assert_eq!(lr.event_buffer_size, 32);
            assert_eq!(
                lr.config.flags,
                v2::LineFlags::INPUT | v2::LineFlags::EDGE_RISING
            );
        }

        #[test]
        fn too_many_lines() {
            let offsets: Vec<Offset> = (0..65).collect();
            let lco = lco(&offsets, &[]);
            assert!(matches!(
                v2_line_request(&lco, "test", 0),
                Err(Error::InvalidArgument(_))
            ));
        }
    }
}
