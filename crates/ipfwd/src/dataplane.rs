// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-worker dataplane reader handle.
//!
//! Each forwarding worker owns one [`Dataplane`]: a registered reader
//! token plus read-only views of the FIB and the next-hop store. The
//! poll loop opens a bounded read section per batch of packets, resolves
//! routes through it, then reports quiescence:
//!
//! ```ignore
//! let mut dp = control.dataplane()?;
//! loop {
//!     {
//!         let view = dp.read();
//!         for pkt in batch {
//!             if let Some(nh) = view.route_lookup(pkt.dst) {
//!                 rewrite_and_emit(pkt, nh);
//!             } // else: no route, drop path
//!         }
//!     }
//!     dp.quiesce();
//! }
//! ```

use crate::error::Result;
use crate::fib::FibView;
use crate::nexthop::{NextHop, NextHopRef, NextHopView};
use crate::qsbr::{Qsbr, ReadGuard, ReaderToken};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// One dataplane worker's handle onto the forwarding state.
pub struct Dataplane {
    qsbr: Arc<Qsbr>,
    token: ReaderToken,
    fib: FibView,
    nexthops: NextHopView,
}

impl Dataplane {
    pub(crate) fn new(qsbr: Arc<Qsbr>, fib: FibView, nexthops: NextHopView) -> Result<Self> {
        let token = qsbr.register_reader()?;
        Ok(Self {
            qsbr,
            token,
            fib,
            nexthops,
        })
    }

    /// Open a read section. Lookups hang off the returned view; while it
    /// lives, nothing it can reach is freed. Keep sections bounded.
    pub fn read(&mut self) -> PacketView<'_> {
        PacketView {
            guard: self.qsbr.enter_read_section(&mut self.token),
            fib: &self.fib,
            nexthops: &self.nexthops,
        }
    }

    /// Report a quiescent point. Called once per poll-loop iteration,
    /// outside any read section; this is what lets retired memory be
    /// freed.
    pub fn quiesce(&mut self) {
        self.qsbr.report_quiescent(&mut self.token);
    }
}

impl Drop for Dataplane {
    fn drop(&mut self) {
        self.qsbr.release(&self.token);
    }
}

/// An open read section. No lookup through it blocks, allocates or
/// returns an error: a miss is `None`, handled by the packet drop path.
pub struct PacketView<'a> {
    guard: ReadGuard<'a>,
    fib: &'a FibView,
    nexthops: &'a NextHopView,
}

impl PacketView<'_> {
    /// Full per-packet resolution: longest-prefix match, then the
    /// referenced next hop.
    ///
    /// An open section can hold a leaf for a route the writer has since
    /// removed along with its next hop; the miss is the ordinary
    /// no-route drop path, not an error.
    #[must_use]
    pub fn route_lookup(&self, dst: Ipv4Addr) -> Option<&NextHop> {
        let nh_ref = self.fib.lookup(dst, &self.guard)?;
        self.nexthops.lookup(nh_ref.ip(), &self.guard)
    }

    /// Longest-prefix match only.
    #[must_use]
    pub fn fib_lookup(&self, dst: Ipv4Addr) -> Option<NextHopRef> {
        self.fib.lookup(dst, &self.guard)
    }

    /// Direct next-hop lookup by address.
    #[must_use]
    pub fn nexthop(&self, ip: Ipv4Addr) -> Option<&NextHop> {
        self.nexthops.lookup(ip, &self.guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeLimits;
    use crate::fib::Fib;
    use crate::nexthop::NextHopStore;
    use crate::types::{Ipv4Net, MacAddr, NhFlags};

    fn setup() -> (Arc<Qsbr>, NextHopStore, Fib) {
        let limits = RuntimeLimits::default();
        let qsbr = Arc::new(Qsbr::new(&limits));
        let nexthops = NextHopStore::new(&limits, Arc::clone(&qsbr));
        let fib = Fib::new(Arc::clone(&qsbr));
        (qsbr, nexthops, fib)
    }

    #[test]
    fn resolves_through_fib_and_nexthop() {
        let (qsbr, mut nexthops, mut fib) = setup();
        let nh_ip = Ipv4Addr::new(192, 0, 2, 1);
        let nh_ref = nexthops
            .insert_or_update(NextHop {
                ip: nh_ip,
                dst_mac: MacAddr::new([0x02, 0, 0, 0, 0, 1]),
                src_mac: MacAddr::ZERO,
                port_id: 0,
                flags: NhFlags::REACHABLE,
            })
            .unwrap();
        let net = Ipv4Net::new(Ipv4Addr::new(192, 0, 2, 0), 24).unwrap();
        fib.insert(net, nh_ref).unwrap();

        let mut dp = Dataplane::new(Arc::clone(&qsbr), fib.view(), nexthops.view()).unwrap();
        let view = dp.read();
        let hop = view.route_lookup(Ipv4Addr::new(192, 0, 2, 5)).expect("resolves");
        assert_eq!(hop.ip, nh_ip);
        assert!(view.route_lookup(Ipv4Addr::new(198, 51, 100, 1)).is_none());
    }

    #[test]
    fn lookup_misses_when_route_outlives_its_next_hop() {
        let (qsbr, mut nexthops, mut fib) = setup();
        let nh_ip = Ipv4Addr::new(192, 0, 2, 1);
        let nh_ref = nexthops
            .insert_or_update(NextHop {
                ip: nh_ip,
                dst_mac: MacAddr::new([0x02, 0, 0, 0, 0, 1]),
                src_mac: MacAddr::ZERO,
                port_id: 0,
                flags: NhFlags::REACHABLE,
            })
            .unwrap();
        let net = Ipv4Net::new(Ipv4Addr::new(192, 0, 2, 0), 24).unwrap();
        fib.insert(net, nh_ref).unwrap();

        let mut dp = Dataplane::new(Arc::clone(&qsbr), fib.view(), nexthops.view()).unwrap();
        // The reader can observe this window mid-section: route still
        // published, next hop already unlinked.
        nexthops.remove(nh_ip).unwrap();

        let view = dp.read();
        assert!(view.fib_lookup(Ipv4Addr::new(192, 0, 2, 5)).is_some());
        assert!(view.route_lookup(Ipv4Addr::new(192, 0, 2, 5)).is_none());
    }
}
