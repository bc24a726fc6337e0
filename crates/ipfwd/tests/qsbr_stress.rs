// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::cast_possible_truncation)] // Test parameters

//! Reclamation stress: concurrent readers against control-plane churn.
//!
//! Readers hammer lookups inside read sections while the control thread
//! adds, refreshes and deletes routes and next hops. The invariants
//! checked are the ones the reclamation scheme exists for: a resolved
//! lookup always references a coherent next-hop record, and once every
//! reader has quiesced (or gone away) the retirement queue drains to
//! zero.

use ipfwd::{Ip4Control, MacAddr, PortTable, RuntimeLimits};
use std::alloc::{GlobalAlloc, Layout, System};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Poisons every freed block. Freed memory usually keeps its old
/// contents, which would let a use-after-free slip past the coherence
/// asserts below; after the fill, a lookup touching reclaimed memory
/// reads 0xAA garbage and fails them.
struct PoisonAlloc;

// SAFETY: delegates to the system allocator; the poison fill writes
// only within the block being freed, before it is handed back.
unsafe impl GlobalAlloc for PoisonAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe {
            std::ptr::write_bytes(ptr, 0xAA, layout.size());
            System.dealloc(ptr, layout);
        }
    }
}

#[global_allocator]
static POISON: PoisonAlloc = PoisonAlloc;

const READERS: usize = 4;
const CHURN_MS: u64 = 300;

fn nh_ip(i: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, i, 0, 1)
}

fn prefix(i: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, i, 0, 0)
}

#[test]
fn readers_survive_route_churn() {
    let ports = Arc::new(PortTable::new());
    ports
        .add("eth0", MacAddr::new([0x02, 0, 0, 0, 0, 0x01]), 1500)
        .unwrap();
    let mut control = Ip4Control::new(&RuntimeLimits::default(), ports);
    let qsbr = Arc::clone(control.qsbr());
    let stop = Arc::new(AtomicBool::new(false));

    // Seed half the table so readers see hits from the start.
    for i in 0..8u8 {
        control
            .nexthop_add(nh_ip(i), MacAddr::new([0x02, 0, 0, 0, 1, i]), 0)
            .unwrap();
        control.route_add(prefix(i), 16, None).unwrap();
    }

    let mut workers = Vec::new();
    for _ in 0..READERS {
        let mut dp = control.dataplane().unwrap();
        let stop = Arc::clone(&stop);
        workers.push(thread::spawn(move || {
            let mut hits = 0u64;
            let mut lookups = 0u64;
            while !stop.load(Ordering::Relaxed) {
                // One read section per simulated packet batch.
                {
                    let view = dp.read();
                    for _ in 0..64 {
                        let dst = Ipv4Addr::new(10, fastrand::u8(0..16), fastrand::u8(..), 2);
                        lookups += 1;
                        if let Some(hop) = view.route_lookup(dst) {
                            hits += 1;
                            // A resolved hop is a coherent record. A
                            // reclaimed one reads as allocator poison
                            // (0xAA everywhere) and fails here.
                            assert_eq!(hop.ip.octets()[0], 10);
                            assert_eq!(hop.port_id, 0);
                            assert!(!hop.dst_mac.is_zero());
                        }
                    }
                }
                dp.quiesce();
            }
            (lookups, hits)
        }));
    }

    // Control-plane churn: refresh, delete and re-add while readers run.
    let deadline = Instant::now() + Duration::from_millis(CHURN_MS);
    let mut rounds = 0u32;
    while Instant::now() < deadline {
        let i = fastrand::u8(0..16);
        match fastrand::u8(0..3) {
            0 => {
                control
                    .nexthop_add(nh_ip(i), MacAddr::new([0x02, 0, 0, 0, 2, i]), 0)
                    .unwrap();
                let _ = control.route_add(prefix(i), 16, None);
            }
            1 => {
                let _ = control.route_del(prefix(i), 16);
            }
            _ => {
                if control.route_del(prefix(i), 16).is_ok() {
                    control.nexthop_del(nh_ip(i)).unwrap();
                }
            }
        }
        rounds += 1;
        if rounds % 64 == 0 {
            control.reclaim();
            thread::yield_now();
        }
    }

    stop.store(true, Ordering::Relaxed);
    let mut total_lookups = 0u64;
    for worker in workers {
        let (lookups, _hits) = worker.join().expect("reader panicked");
        total_lookups += lookups;
    }
    assert!(total_lookups > 0);

    // All reader handles dropped: everything retired is freeable now.
    control.reclaim();
    assert_eq!(qsbr.pending(), 0, "retirement queue did not drain");
}

#[test]
fn reclamation_blocked_by_one_stalled_reader() {
    let ports = Arc::new(PortTable::new());
    ports
        .add("eth0", MacAddr::new([0x02, 0, 0, 0, 0, 0x01]), 1500)
        .unwrap();
    let mut control = Ip4Control::new(&RuntimeLimits::default(), ports);
    let qsbr = Arc::clone(control.qsbr());

    control
        .nexthop_add(nh_ip(0), MacAddr::new([0x02, 0, 0, 0, 1, 0]), 0)
        .unwrap();
    control.route_add(prefix(0), 16, None).unwrap();
    // Drain setup-time retirements so only the removal below is pending.
    control.reclaim();

    let mut stalled = control.dataplane().unwrap();
    // Reader registered but not yet quiescent past the removal.
    {
        let view = stalled.read();
        assert!(view.route_lookup(Ipv4Addr::new(10, 0, 1, 2)).is_some());
    }

    control.route_del(prefix(0), 16).unwrap();
    assert!(qsbr.pending() > 0);
    assert_eq!(control.reclaim(), 0, "freed under a non-quiescent reader");

    stalled.quiesce();
    assert!(control.reclaim() > 0);
    assert_eq!(qsbr.pending(), 0);
}
