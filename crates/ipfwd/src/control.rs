// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPv4 control plane: route, next-hop and address handlers.
//!
//! Thin orchestration over the stores and the FIB, reached through the
//! [`Dispatcher`]. Each handler validates its input, performs the
//! address-store on-link check where applicable, then mutates in the
//! order that keeps the tables consistent for concurrent readers:
//!
//! - additions touch the next-hop store first and the FIB second, so a
//!   published route always resolves
//! - deletions remove the FIB entry first; the next hop is only retired
//!   once nothing references it
//!
//! Mutations are serialized externally: the dispatch layer processes one
//! request at a time, which is the crate-wide single-writer assumption.

use crate::addr::{AddrStore, LocalAddress};
use crate::api::{Dispatcher, Opcode, Request, Response};
use crate::config::RuntimeLimits;
use crate::dataplane::Dataplane;
use crate::error::{Error, Result, Status};
use crate::fib::{Fib, RouteEntry};
use crate::nexthop::{NextHop, NextHopRef, NextHopStore};
use crate::port::PortTable;
use crate::qsbr::Qsbr;
use crate::types::{Ipv4Net, MacAddr, NhFlags, PortId};
use log::{info, warn};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const ROUTE_ADD: Opcode = Opcode(0x0401);
pub const ROUTE_DEL: Opcode = Opcode(0x0402);
pub const ROUTE_LIST: Opcode = Opcode(0x0403);
pub const NEXTHOP_ADD: Opcode = Opcode(0x0404);
pub const NEXTHOP_DEL: Opcode = Opcode(0x0405);
pub const NEXTHOP_LIST: Opcode = Opcode(0x0406);
pub const ADDR_ADD: Opcode = Opcode(0x0407);
pub const ADDR_DEL: Opcode = Opcode(0x0408);
pub const ADDR_LIST: Opcode = Opcode(0x0409);

/// Owner of the IPv4 forwarding state. One per router instance,
/// explicitly constructed and passed to the dispatch layer; the sole
/// mutator of the next-hop store, address store and FIB.
pub struct Ip4Control {
    ports: Arc<PortTable>,
    qsbr: Arc<Qsbr>,
    nexthops: NextHopStore,
    addrs: AddrStore,
    fib: Fib,
}

impl Ip4Control {
    #[must_use]
    pub fn new(limits: &RuntimeLimits, ports: Arc<PortTable>) -> Self {
        let qsbr = Arc::new(Qsbr::new(limits));
        let nexthops = NextHopStore::new(limits, Arc::clone(&qsbr));
        let fib = Fib::new(Arc::clone(&qsbr));
        info!(
            "[ip4] control plane up ({} worker slots, {} nh buckets)",
            limits.max_workers, limits.nh_buckets
        );
        Self {
            ports,
            qsbr,
            nexthops,
            addrs: AddrStore::new(),
            fib,
        }
    }

    /// The reclamation coordinator shared with dataplane workers.
    #[must_use]
    pub fn qsbr(&self) -> &Arc<Qsbr> {
        &self.qsbr
    }

    /// Build a reader handle for one dataplane worker. Fails only when
    /// the coordinator's worker table is exhausted.
    pub fn dataplane(&self) -> Result<Dataplane> {
        Dataplane::new(
            Arc::clone(&self.qsbr),
            self.fib.view(),
            self.nexthops.view(),
        )
    }

    /// Free retired memory whose readers have all quiesced. Called
    /// periodically by the embedding process; also runs opportunistically
    /// when the retirement queue crosses its high-water mark.
    pub fn reclaim(&self) -> usize {
        self.qsbr.reclaim()
    }

    /// Create or refresh a next hop (upsert). The source MAC is stamped
    /// from the egress port; flags accumulated by routing decisions are
    /// preserved across refreshes.
    pub fn nexthop_add(&mut self, ip: Ipv4Addr, mac: MacAddr, port_id: PortId) -> Result<NextHopRef> {
        let Some(src_mac) = self.ports.mac(port_id) else {
            return Err(Error::InvalidPort(port_id));
        };
        let mut flags = NhFlags::REACHABLE | NhFlags::STATIC;
        if let Some(existing) = self.nexthops.get(ip) {
            flags |= existing.flags;
        }
        if self.addrs.covering(ip).is_some() {
            flags |= NhFlags::LINK;
        }
        self.nexthops.insert_or_update(NextHop {
            ip,
            dst_mac: mac,
            src_mac,
            port_id,
            flags,
        })
    }

    /// Delete a next hop. Refused while any route still references it;
    /// the operator removes the routes first, which is what keeps a live
    /// FIB entry always resolvable.
    pub fn nexthop_del(&mut self, ip: Ipv4Addr) -> Result<()> {
        let references = self.fib.routes_referencing(NextHopRef::new(ip));
        if references > 0 {
            warn!("[ip4] refusing to delete next hop {} ({} routes)", ip, references);
            return Err(Error::InvalidInput(format!(
                "next hop {} still referenced by {} route(s)",
                ip, references
            )));
        }
        self.nexthops.remove(ip)
    }

    /// Point-in-time snapshot of all next hops, sorted by address.
    #[must_use]
    pub fn nexthop_list(&self) -> Vec<NextHop> {
        self.nexthops.snapshot()
    }

    /// Install a route.
    ///
    /// With a gateway, the gateway's next hop must already exist. Without
    /// one the route is on-link: the next hop is the lowest configured
    /// next-hop address inside the prefix. Either way the next-hop
    /// record is updated (reachability flags from the address-store
    /// check) before the FIB entry is published.
    pub fn route_add(
        &mut self,
        prefix: Ipv4Addr,
        prefixlen: u8,
        gateway: Option<Ipv4Addr>,
    ) -> Result<()> {
        let net = Ipv4Net::new(prefix, prefixlen)?;
        let nh_ip = match gateway {
            Some(gw) => {
                if !self.nexthops.contains(gw) {
                    return Err(Error::InvalidInput(format!("no next hop for gateway {}", gw)));
                }
                gw
            }
            None => self
                .nexthops
                .snapshot()
                .iter()
                .map(|hop| hop.ip)
                .filter(|ip| net.contains(*ip))
                .min_by_key(|ip| u32::from(*ip))
                .ok_or_else(|| {
                    Error::InvalidInput(format!("no next hop inside {}", net))
                })?,
        };

        let mut hop = self
            .nexthops
            .get(nh_ip)
            .ok_or_else(|| Error::Inconsistent(format!("next hop {} vanished", nh_ip)))?;
        // On-link check: reached directly when a local prefix covers it.
        hop.flags |= NhFlags::REACHABLE;
        hop.flags |= if self.addrs.covering(nh_ip).is_some() {
            NhFlags::LINK
        } else {
            NhFlags::GATEWAY
        };
        let nh_ref = self.nexthops.insert_or_update(hop)?;
        self.fib.insert(net, nh_ref)?;
        info!("[ip4] route {} via {}", net, nh_ip);
        Ok(())
    }

    /// Remove the exact route. The FIB entry goes first; the next hop
    /// stays configured until deleted explicitly.
    pub fn route_del(&mut self, prefix: Ipv4Addr, prefixlen: u8) -> Result<()> {
        let net = Ipv4Net::new(prefix, prefixlen)?;
        self.fib.remove(net)?;
        info!("[ip4] route {} removed", net);
        Ok(())
    }

    #[must_use]
    pub fn route_list(&self) -> Vec<RouteEntry> {
        self.fib.iter_routes()
    }

    pub fn addr_add(&mut self, ip: Ipv4Addr, prefixlen: u8, port_id: PortId) -> Result<()> {
        if !self.ports.is_valid(port_id) {
            return Err(Error::InvalidPort(port_id));
        }
        self.addrs.insert(ip, prefixlen, port_id)
    }

    pub fn addr_del(&mut self, ip: Ipv4Addr) -> Result<()> {
        self.addrs.remove(ip)
    }

    #[must_use]
    pub fn addr_list(&self) -> Vec<LocalAddress> {
        self.addrs.snapshot()
    }
}

/// Register the IPv4 handlers into the dispatch registry. The mutex is
/// the external serialization point for the single writer; dispatch
/// processes one request at a time, so it is never contended.
pub fn register_ip4_handlers(control: Arc<Mutex<Ip4Control>>, dispatcher: &mut Dispatcher) {
    let ctl = Arc::clone(&control);
    dispatcher.register(ROUTE_ADD, "route add", move |req| match req {
        Request::RouteAdd {
            prefix,
            prefixlen,
            gateway,
        } => ctl
            .lock()
            .route_add(prefix, prefixlen, gateway)
            .map(|()| Response::Empty)
            .map_err(Status::from),
        _ => Err(Status::InvalidInput),
    });

    let ctl = Arc::clone(&control);
    dispatcher.register(ROUTE_DEL, "route del", move |req| match req {
        Request::RouteDel { prefix, prefixlen } => ctl
            .lock()
            .route_del(prefix, prefixlen)
            .map(|()| Response::Empty)
            .map_err(Status::from),
        _ => Err(Status::InvalidInput),
    });

    let ctl = Arc::clone(&control);
    dispatcher.register(ROUTE_LIST, "route list", move |req| match req {
        Request::RouteList => Ok(Response::Routes(ctl.lock().route_list())),
        _ => Err(Status::InvalidInput),
    });

    let ctl = Arc::clone(&control);
    dispatcher.register(NEXTHOP_ADD, "nexthop add", move |req| match req {
        Request::NexthopAdd { ip, mac, port_id } => ctl
            .lock()
            .nexthop_add(ip, mac, port_id)
            .map(|_| Response::Empty)
            .map_err(Status::from),
        _ => Err(Status::InvalidInput),
    });

    let ctl = Arc::clone(&control);
    dispatcher.register(NEXTHOP_DEL, "nexthop del", move |req| match req {
        Request::NexthopDel { ip } => ctl
            .lock()
            .nexthop_del(ip)
            .map(|()| Response::Empty)
            .map_err(Status::from),
        _ => Err(Status::InvalidInput),
    });

    let ctl = Arc::clone(&control);
    dispatcher.register(NEXTHOP_LIST, "nexthop list", move |req| match req {
        Request::NexthopList => Ok(Response::Nexthops(ctl.lock().nexthop_list())),
        _ => Err(Status::InvalidInput),
    });

    let ctl = Arc::clone(&control);
    dispatcher.register(ADDR_ADD, "addr add", move |req| match req {
        Request::AddrAdd {
            ip,
            prefixlen,
            port_id,
        } => ctl
            .lock()
            .addr_add(ip, prefixlen, port_id)
            .map(|()| Response::Empty)
            .map_err(Status::from),
        _ => Err(Status::InvalidInput),
    });

    let ctl = Arc::clone(&control);
    dispatcher.register(ADDR_DEL, "addr del", move |req| match req {
        Request::AddrDel { ip } => ctl
            .lock()
            .addr_del(ip)
            .map(|()| Response::Empty)
            .map_err(Status::from),
        _ => Err(Status::InvalidInput),
    });

    dispatcher.register(ADDR_LIST, "addr list", move |req| match req {
        Request::AddrList => Ok(Response::Addrs(control.lock().addr_list())),
        _ => Err(Status::InvalidInput),
    });
}
