// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Forwarding-path lookup benchmarks.
//!
//! Measures the per-packet cost of the read path with a populated table:
//! - longest-prefix match alone (trie walk)
//! - full resolution (trie walk + next-hop hash lookup)
//!
//! The read section stays open for the whole measurement, which is how a
//! worker amortises it over a packet batch.

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ipfwd::{Ip4Control, MacAddr, PortTable, RuntimeLimits};
use std::net::Ipv4Addr;
use std::sync::Arc;

const ROUTES: u32 = 1024;

/// One /24 per route, each with its own next hop.
fn populated_control() -> Ip4Control {
    let ports = Arc::new(PortTable::new());
    ports
        .add("eth0", MacAddr::new([0x02, 0, 0, 0, 0, 0x01]), 1500)
        .expect("port add");
    let mut control = Ip4Control::new(&RuntimeLimits::default(), ports);
    for i in 0..ROUTES {
        let b = (i >> 8) as u8;
        let c = (i & 0xff) as u8;
        let nh = Ipv4Addr::new(10, b, c, 1);
        control
            .nexthop_add(nh, MacAddr::new([0x02, 0, 0, 0, b, c]), 0)
            .expect("nexthop add");
        control
            .route_add(Ipv4Addr::new(10, b, c, 0), 24, None)
            .expect("route add");
    }
    control
}

fn bench_fib_lookup(c: &mut Criterion) {
    let control = populated_control();
    let mut dp = control.dataplane().expect("dataplane");
    let view = dp.read();

    c.bench_function("fib_lookup_hit_1k_routes", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 1) & (ROUTES - 1);
            let dst = Ipv4Addr::new(10, (i >> 8) as u8, (i & 0xff) as u8, 99);
            black_box(view.fib_lookup(black_box(dst)))
        });
    });

    c.bench_function("fib_lookup_miss", |b| {
        let dst = Ipv4Addr::new(198, 51, 100, 1);
        b.iter(|| black_box(view.fib_lookup(black_box(dst))));
    });
}

fn bench_route_lookup(c: &mut Criterion) {
    let control = populated_control();
    let mut dp = control.dataplane().expect("dataplane");
    let view = dp.read();

    c.bench_function("route_lookup_full_1k_routes", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 1) & (ROUTES - 1);
            let dst = Ipv4Addr::new(10, (i >> 8) as u8, (i & 0xff) as u8, 99);
            black_box(view.route_lookup(black_box(dst)))
        });
    });
}

fn bench_nexthop_lookup(c: &mut Criterion) {
    let control = populated_control();
    let mut dp = control.dataplane().expect("dataplane");
    let view = dp.read();

    c.bench_function("nexthop_lookup_hit", |b| {
        let ip = Ipv4Addr::new(10, 1, 7, 1);
        b.iter(|| black_box(view.nexthop(black_box(ip))));
    });
}

criterion_group!(
    benches,
    bench_fib_lookup,
    bench_route_lookup,
    bench_nexthop_lookup
);
criterion_main!(benches);
