// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Next-hop store: IPv4 address -> link-layer rewrite record.
//!
//! A single-writer hash table with lock-free readers. Buckets are heads
//! of singly linked chains of immutable nodes; the writer publishes a
//! mutation by swinging one `AtomicPtr` (push-front for inserts,
//! predecessor relink for updates and removals) and retires the replaced
//! node through the [`Qsbr`] coordinator. Readers traverse with acquire
//! loads and never observe a half-updated record: a record's fields are
//! frozen once its node is published (copy-and-swap, no in-place field
//! writes).
//!
//! The store owns its records; the FIB references them by key (see
//! [`NextHopRef`]), so a copy-and-swap upsert never invalidates a route.

use crate::config::RuntimeLimits;
use crate::error::{Error, Result};
use crate::qsbr::{Qsbr, ReadGuard};
use crate::types::{MacAddr, NhFlags, PortId};
use log::debug;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// Link-layer rewrite and egress port for one resolved IPv4 address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextHop {
    /// The address this record resolves. Key redundancy for iteration
    /// and reverse lookups.
    pub ip: Ipv4Addr,
    /// Destination MAC stamped on egress frames.
    pub dst_mac: MacAddr,
    /// Source MAC stamped on egress frames (the egress port's address).
    pub src_mac: MacAddr,
    /// Egress port. Opaque handle into the port table.
    pub port_id: PortId,
    pub flags: NhFlags,
}

/// Non-owning reference to a next hop, held by FIB entries.
///
/// Deliberately a key, not a pointer: a copy-and-swap upsert of the
/// record leaves every route pointing at the fresh version, and a
/// dangling pointer is impossible by construction. Resolution is one
/// hash lookup on the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NextHopRef(Ipv4Addr);

impl NextHopRef {
    pub(crate) fn new(ip: Ipv4Addr) -> Self {
        Self(ip)
    }

    #[must_use]
    pub fn ip(self) -> Ipv4Addr {
        self.0
    }
}

/// Chain node. `hop` is immutable after publication; `next` is only
/// written by the single writer.
struct Node {
    hop: NextHop,
    next: AtomicPtr<Node>,
}

struct NhShared {
    buckets: Box<[AtomicPtr<Node>]>,
    mask: usize,
}

impl NhShared {
    fn bucket_of(&self, ip: Ipv4Addr) -> usize {
        let mut h = u32::from(ip).wrapping_mul(0x9E37_79B9);
        h ^= h >> 16;
        h as usize & self.mask
    }
}

impl Drop for NhShared {
    fn drop(&mut self) {
        // Last owner teardown: no readers remain, retired nodes are
        // already unlinked and owned by the coordinator's queue.
        for bucket in self.buckets.iter_mut() {
            let mut cur = *bucket.get_mut();
            while !cur.is_null() {
                // SAFETY: exclusive access; chain nodes are uniquely
                // owned by their bucket.
                let node = unsafe { Box::from_raw(cur) };
                cur = node.next.load(Ordering::Relaxed);
            }
        }
    }
}

/// Writer handle. Exactly one exists per table; mutation methods take
/// `&mut self`, which is what serializes the single writer in the type
/// system.
pub struct NextHopStore {
    shared: Arc<NhShared>,
    qsbr: Arc<Qsbr>,
    len: usize,
}

/// Cloneable read-only view handed to dataplane workers.
#[derive(Clone)]
pub struct NextHopView {
    shared: Arc<NhShared>,
}

impl NextHopStore {
    /// # Panics
    ///
    /// Panics when `limits.nh_buckets` is not a power of two (sizing is
    /// a startup-time programming error, not a runtime condition).
    #[must_use]
    pub fn new(limits: &RuntimeLimits, qsbr: Arc<Qsbr>) -> Self {
        assert!(
            limits.nh_buckets.is_power_of_two(),
            "nh_buckets must be a power of two"
        );
        let buckets = (0..limits.nh_buckets)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shared: Arc::new(NhShared {
                buckets,
                mask: limits.nh_buckets - 1,
            }),
            qsbr,
            len: 0,
        }
    }

    #[must_use]
    pub fn view(&self) -> NextHopView {
        NextHopView {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Control-plane lookup. Returns a clone; the writer thread is the
    /// only one freeing nodes, so the traversal needs no guard.
    #[must_use]
    pub fn get(&self, ip: Ipv4Addr) -> Option<NextHop> {
        let mut cur = self.shared.buckets[self.shared.bucket_of(ip)].load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: nodes are freed only through the coordinator by
            // this writer; none can vanish under the writer's own feet.
            let node = unsafe { &*cur };
            if node.hop.ip == ip {
                return Some(node.hop.clone());
            }
            cur = node.next.load(Ordering::Acquire);
        }
        None
    }

    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.get(ip).is_some()
    }

    /// Insert or refresh a record (upsert). An existing record for the
    /// same address is replaced wholesale via copy-and-swap and retired;
    /// readers see either the old or the new version, never a torn one.
    pub fn insert_or_update(&mut self, hop: NextHop) -> Result<NextHopRef> {
        let ip = hop.ip;
        let bucket = &self.shared.buckets[self.shared.bucket_of(ip)];
        let mut link: &AtomicPtr<Node> = bucket;
        loop {
            let cur = link.load(Ordering::Acquire);
            if cur.is_null() {
                // Not present: publish a fresh node at the bucket head.
                let node = Box::into_raw(Box::new(Node {
                    hop,
                    next: AtomicPtr::new(bucket.load(Ordering::Relaxed)),
                }));
                bucket.store(node, Ordering::Release);
                self.len += 1;
                self.qsbr.bump();
                debug!("[nexthop] added {}", ip);
                return Ok(NextHopRef::new(ip));
            }
            // SAFETY: writer-owned traversal, see get().
            let cur_node = unsafe { &*cur };
            if cur_node.hop.ip == ip {
                // Copy-and-swap: splice a replacement node into the
                // chain, retire the old one.
                let node = Box::into_raw(Box::new(Node {
                    hop,
                    next: AtomicPtr::new(cur_node.next.load(Ordering::Relaxed)),
                }));
                link.store(node, Ordering::Release);
                // SAFETY: cur is unlinked above and came from Box::into_raw.
                unsafe { self.qsbr.retire_ptr(cur) };
                debug!("[nexthop] refreshed {}", ip);
                return Ok(NextHopRef::new(ip));
            }
            link = &cur_node.next;
        }
    }

    /// Remove the record for `ip` and retire it. The caller must have
    /// removed or repointed any FIB entry referencing it first; the
    /// store does not scan the FIB.
    pub fn remove(&mut self, ip: Ipv4Addr) -> Result<()> {
        let bucket = &self.shared.buckets[self.shared.bucket_of(ip)];
        let mut link: &AtomicPtr<Node> = bucket;
        loop {
            let cur = link.load(Ordering::Acquire);
            if cur.is_null() {
                return Err(Error::NotFound);
            }
            // SAFETY: writer-owned traversal, see get().
            let cur_node = unsafe { &*cur };
            if cur_node.hop.ip == ip {
                // Unlink, then retire. A reader paused on the removed
                // node still follows its next pointer until reclaim.
                link.store(cur_node.next.load(Ordering::Relaxed), Ordering::Release);
                // SAFETY: cur is unlinked above and came from Box::into_raw.
                unsafe { self.qsbr.retire_ptr(cur) };
                self.len -= 1;
                debug!("[nexthop] removed {}", ip);
                return Ok(());
            }
            link = &cur_node.next;
        }
    }

    /// Point-in-time snapshot of all records, sorted by address.
    /// Control-plane path; clones, holds no lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NextHop> {
        let mut out = Vec::with_capacity(self.len);
        for bucket in self.shared.buckets.iter() {
            let mut cur = bucket.load(Ordering::Acquire);
            while !cur.is_null() {
                // SAFETY: writer-owned traversal, see get().
                let node = unsafe { &*cur };
                out.push(node.hop.clone());
                cur = node.next.load(Ordering::Acquire);
            }
        }
        out.sort_by_key(|hop| u32::from(hop.ip));
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl NextHopView {
    /// Dataplane lookup. Lock-free, allocation-free; O(1) expected.
    /// The returned reference stays valid for the read section: nothing
    /// the record hangs off is freed before every worker quiesces.
    #[must_use]
    pub fn lookup<'g>(&self, ip: Ipv4Addr, _guard: &'g ReadGuard<'_>) -> Option<&'g NextHop> {
        let mut cur = self.shared.buckets[self.shared.bucket_of(ip)].load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: the node was published with release ordering and
            // is not freed until after this read section ends (QSBR
            // contract, witnessed by the guard).
            let node = unsafe { &*cur };
            if node.hop.ip == ip {
                return Some(&node.hop);
            }
            cur = node.next.load(Ordering::Acquire);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(ip: [u8; 4], mac_last: u8, port_id: PortId) -> NextHop {
        NextHop {
            ip: Ipv4Addr::from(ip),
            dst_mac: MacAddr::new([0x02, 0, 0, 0, 0, mac_last]),
            src_mac: MacAddr::new([0x02, 0xff, 0, 0, 0, port_id as u8]),
            port_id,
            flags: NhFlags::REACHABLE | NhFlags::STATIC,
        }
    }

    fn small_store() -> NextHopStore {
        // Four buckets to force chain collisions.
        let limits = RuntimeLimits {
            nh_buckets: 4,
            ..RuntimeLimits::default()
        };
        let qsbr = Arc::new(Qsbr::new(&limits));
        NextHopStore::new(&limits, qsbr)
    }

    #[test]
    fn insert_get_remove() {
        let mut store = small_store();
        store.insert_or_update(hop([192, 0, 2, 1], 0xaa, 0)).unwrap();
        assert_eq!(store.len(), 1);
        let got = store.get(Ipv4Addr::new(192, 0, 2, 1)).expect("present");
        assert_eq!(got.dst_mac, MacAddr::new([0x02, 0, 0, 0, 0, 0xaa]));
        store.remove(Ipv4Addr::new(192, 0, 2, 1)).unwrap();
        assert!(store.get(Ipv4Addr::new(192, 0, 2, 1)).is_none());
        assert_eq!(store.remove(Ipv4Addr::new(192, 0, 2, 1)), Err(Error::NotFound));
    }

    #[test]
    fn upsert_keeps_one_entry_with_latest_fields() {
        let mut store = small_store();
        store.insert_or_update(hop([192, 0, 2, 1], 0xaa, 0)).unwrap();
        store.insert_or_update(hop([192, 0, 2, 1], 0xbb, 1)).unwrap();
        assert_eq!(store.len(), 1);
        let got = store.get(Ipv4Addr::new(192, 0, 2, 1)).expect("present");
        assert_eq!(got.dst_mac, MacAddr::new([0x02, 0, 0, 0, 0, 0xbb]));
        assert_eq!(got.port_id, 1);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn collision_chains_survive_middle_removal() {
        let mut store = small_store();
        // Four buckets guarantee at least two of these five share one.
        let ips = [[10, 0, 0, 1], [10, 0, 0, 2], [10, 0, 0, 3], [10, 0, 0, 4], [10, 0, 0, 5]];
        for (i, ip) in ips.iter().enumerate() {
            store.insert_or_update(hop(*ip, i as u8, 0)).unwrap();
        }
        store.remove(Ipv4Addr::new(10, 0, 0, 3)).unwrap();
        for ip in [[10, 0, 0, 1], [10, 0, 0, 2], [10, 0, 0, 4], [10, 0, 0, 5]] {
            assert!(store.contains(Ipv4Addr::from(ip)), "{:?} lost", ip);
        }
        assert!(!store.contains(Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn snapshot_is_sorted() {
        let mut store = small_store();
        for ip in [[10, 0, 0, 9], [10, 0, 0, 1], [172, 16, 0, 1], [10, 0, 0, 5]] {
            store.insert_or_update(hop(ip, 0, 0)).unwrap();
        }
        let ips: Vec<Ipv4Addr> = store.snapshot().iter().map(|hop| hop.ip).collect();
        let mut sorted = ips.clone();
        sorted.sort_by_key(|ip| u32::from(*ip));
        assert_eq!(ips, sorted);
    }

    #[test]
    fn view_lookup_inside_read_section() {
        let limits = RuntimeLimits::default();
        let qsbr = Arc::new(Qsbr::new(&limits));
        let mut store = NextHopStore::new(&limits, Arc::clone(&qsbr));
        store.insert_or_update(hop([198, 51, 100, 7], 0x07, 2)).unwrap();

        let view = store.view();
        let mut token = qsbr.register_reader().expect("register");
        let guard = qsbr.enter_read_section(&mut token);
        let found = view
            .lookup(Ipv4Addr::new(198, 51, 100, 7), &guard)
            .expect("present");
        assert_eq!(found.port_id, 2);
        assert!(view.lookup(Ipv4Addr::new(198, 51, 100, 8), &guard).is_none());
    }
}
