// SPDX-FileCopyrightText: 2023 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{criterion_group, criterion_main, Bencher, Criterion};

use gpioline::line::Offset;
use gpioline::{options, AbiVersion, Chip, Lines, Value};
use gpiosim::Simpleton;

criterion_group!(benches, benchmarks);
criterion_main!(benches);

// a single line, and the most lines a request may hold
const SIZES: [usize; 2] = [1, 64];

fn benchmarks(c: &mut Criterion) {
    for abiv in [AbiVersion::V1, AbiVersion::V2] {
        let tag = match abiv {
            AbiVersion::V1 => "v1",
            AbiVersion::V2 => "v2",
        };
        for n in SIZES {
            c.bench_function(&format!("{tag} values x{n}"), |b| values(b, abiv, n));
            c.bench_function(&format!("{tag} set_values x{n}"), |b| set_values(b, abiv, n));
        }
    }
}

fn request(s: &Simpleton, abiv: AbiVersion, n: usize, opts: &[gpioline::ConfigOption]) -> Lines {
    let offsets: Vec<Offset> = (0..n as Offset).collect();
    Chip::new(s.dev_path(), &[options::with_abi_version(abiv)])
        .unwrap()
        .request_lines(&offsets, opts)
        .unwrap()
}

// reading the values of n inputs
fn values(b: &mut Bencher, abiv: AbiVersion, n: usize) {
    let s = Simpleton::new(n as u32);
    let lines = request(&s, abiv, n, &[options::as_input()]);

    b.iter(|| lines.values().unwrap());
}

// toggling the values of n outputs
fn set_values(b: &mut Bencher, abiv: AbiVersion, n: usize) {
    let s = Simpleton::new(n as u32);
    let lines = request(&s, abiv, n, &[options::as_output(vec![Value::Active; n])]);
    let mut values = vec![Value::Active; n];

    b.iter(|| {
        values.iter_mut().for_each(|v| *v = v.not());
        lines.set_values(&values).unwrap();
    });
}
