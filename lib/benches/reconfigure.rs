// SPDX-FileCopyrightText: 2023 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{criterion_group, criterion_main, Bencher, Criterion};

use gpioline::line::Offset;
use gpioline::{options, AbiVersion, Chip, ConfigOption};
use gpiosim::Simpleton;
use std::time::Duration;

criterion_group!(benches, benchmarks);
criterion_main!(benches);

fn benchmarks(c: &mut Criterion) {
    c.bench_function("uapi_v1 reconfigure uniform", |b| uniform(b, AbiVersion::V1));
    c.bench_function("uapi_v2 reconfigure uniform", |b| uniform(b, AbiVersion::V2));
    c.bench_function("uapi_v2 reconfigure mixed", mixed);
}

// determine time taken to flip the bias of a set of lines
fn uniform(b: &mut Bencher, abiv: AbiVersion) {
    let s = Simpleton::new(8);
    let offsets: Vec<Offset> = (0..8).collect();
    let chip = Chip::new(s.dev_path(), &[options::with_abi_version(abiv)]).unwrap();
    let l = chip
        .request_lines(&offsets, &[options::as_input()])
        .unwrap();
    let mut up = false;

    b.iter(|| {
        up = !up;
        let bias = if up {
            options::with_pull_up()
        } else {
            options::with_pull_down()
        };
        l.reconfigure(&[bias]).unwrap();
    });
}

// determine time taken to reconfigure lines that need most of the available attributes
fn mixed(b: &mut Bencher) {
    let s = Simpleton::new(16);
    let offsets: Vec<Offset> = (0..16).collect();
    let chip = Chip::new(s.dev_path(), &[options::with_abi_version(AbiVersion::V2)]).unwrap();
    let l = chip
        .request_lines(&offsets, &[options::as_input()])
        .unwrap();
    let opts: Vec<ConfigOption> = (0..8)
        .map(|o| {
            options::with_lines(
                &[o, o + 8],
                [
                    options::with_both_edges(),
                    options::with_debounce_period(Duration::from_micros(100 + o as u64)),
                ],
            )
        })
        .collect();

    b.iter(|| {
        l.reconfigure(&opts).unwrap();
    });
}
