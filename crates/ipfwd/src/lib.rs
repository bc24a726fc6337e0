// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # ipfwd - IPv4 forwarding state for a software router
//!
//! Concurrent forwarding-state subsystem: a longest-prefix-match FIB, a
//! next-hop store, local interface addresses and the quiescent-state
//! reclamation (QSBR) machinery that lets dataplane workers read all of
//! it without locks while a single control thread mutates it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ipfwd::{Ip4Control, PortTable, RuntimeLimits};
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! fn main() -> ipfwd::Result<()> {
//!     let ports = Arc::new(PortTable::new());
//!     let p0 = ports.add("eth0", ipfwd::MacAddr::new([2, 0, 0, 0, 0, 1]), 1500)?;
//!
//!     let mut control = Ip4Control::new(&RuntimeLimits::default(), Arc::clone(&ports));
//!     control.nexthop_add(Ipv4Addr::new(192, 0, 2, 1), ipfwd::MacAddr::new([2, 0, 0, 0, 0, 2]), p0)?;
//!     control.route_add(Ipv4Addr::new(192, 0, 2, 0), 24, None)?;
//!
//!     // One Dataplane per forwarding worker.
//!     let mut dp = control.dataplane()?;
//!     {
//!         let view = dp.read();
//!         let nh = view.route_lookup(Ipv4Addr::new(192, 0, 2, 5));
//!         assert!(nh.is_some());
//!     }
//!     dp.quiesce();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Control Plane                         |
//! |   Dispatcher -> Ip4Control (route/nexthop/addr handlers)     |
//! +--------------------------------------------------------------+
//! |                      Forwarding State                        |
//! |   Fib (stride-8 trie) | NextHopStore (hash) | AddrStore      |
//! +--------------------------------------------------------------+
//! |                        Reclamation                           |
//! |   Qsbr: generations, reader tokens, deferred frees           |
//! +--------------------------------------------------------------+
//! |                         Dataplane                            |
//! |   Dataplane::read() -> PacketView -> route_lookup()          |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Ip4Control`] | Single-writer owner of all forwarding state |
//! | [`Dataplane`] | Per-worker reader handle (read sections, quiescence) |
//! | [`Fib`] / [`FibView`] | Longest-prefix-match routing table |
//! | [`NextHopStore`] / [`NextHopView`] | Next-hop table keyed by IPv4 address |
//! | [`Qsbr`] | Quiescent-state-based memory reclamation |
//! | [`Dispatcher`] | Opcode-keyed control API registry |

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Local interface address store.
pub mod addr;
/// Control API dispatcher (opcodes, requests, responses).
pub mod api;
/// Global configuration (table sizing, reclamation thresholds).
pub mod config;
/// IPv4 control handlers (routes, next hops, addresses).
pub mod control;
/// Per-worker dataplane reader handle.
pub mod dataplane;
/// Error and wire-status types.
pub mod error;
/// Longest-prefix-match FIB (stride-8 multibit trie).
pub mod fib;
/// Next-hop store (single-writer lock-free hash table).
pub mod nexthop;
/// Network interface (port) table.
pub mod port;
/// Quiescent-state-based reclamation.
pub mod qsbr;
/// Shared plain types (addresses, prefixes, flags).
pub mod types;

pub use addr::{AddrStore, LocalAddress};
pub use api::{Dispatcher, Opcode, Request, Response};
pub use config::RuntimeLimits;
pub use control::{register_ip4_handlers, Ip4Control};
pub use dataplane::{Dataplane, PacketView};
pub use error::{Error, Result, Status};
pub use fib::{Fib, FibView, RouteEntry};
pub use nexthop::{NextHop, NextHopRef, NextHopStore, NextHopView};
pub use port::{register_port_handlers, PortInfo, PortTable};
pub use qsbr::{Qsbr, ReadGuard, ReaderToken};
pub use types::{Ipv4Net, MacAddr, NhFlags, PortId};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
