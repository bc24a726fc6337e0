// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-plane request dispatch.
//!
//! An explicitly constructed registry mapping request opcodes to named
//! handler functions. Built once at startup by each subsystem
//! registering its handlers; duplicate opcode registration is a
//! programming error and fatal at startup, an unknown opcode at dispatch
//! time is a protocol-level error surfaced to the caller.
//!
//! Request and response payloads are plain enums; the wire encoding the
//! operator tooling speaks is the embedding process's concern.

use crate::addr::LocalAddress;
use crate::error::Status;
use crate::fib::RouteEntry;
use crate::nexthop::NextHop;
use crate::port::PortInfo;
use crate::types::{MacAddr, PortId};
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

/// Request type identifier. Stable across the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u32);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Control request payloads, semantically per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RouteAdd {
        prefix: Ipv4Addr,
        prefixlen: u8,
        gateway: Option<Ipv4Addr>,
    },
    RouteDel {
        prefix: Ipv4Addr,
        prefixlen: u8,
    },
    RouteList,
    NexthopAdd {
        ip: Ipv4Addr,
        mac: MacAddr,
        port_id: PortId,
    },
    NexthopDel {
        ip: Ipv4Addr,
    },
    NexthopList,
    AddrAdd {
        ip: Ipv4Addr,
        prefixlen: u8,
        port_id: PortId,
    },
    AddrDel {
        ip: Ipv4Addr,
    },
    AddrList,
    PortAdd {
        name: String,
        mac: MacAddr,
        mtu: u16,
    },
    PortDel {
        name: String,
    },
    PortGet {
        name: String,
    },
    PortList,
}

/// Control response payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Empty,
    Routes(Vec<RouteEntry>),
    Nexthops(Vec<NextHop>),
    Addrs(Vec<LocalAddress>),
    Port(PortInfo),
    Ports(Vec<PortInfo>),
}

type HandlerFn = Box<dyn Fn(Request) -> Result<Response, Status> + Send + Sync>;

struct RegisteredHandler {
    name: &'static str,
    callback: HandlerFn,
}

/// Opcode -> handler registry. One per process, explicitly owned and
/// passed around; subsystems register into it at initialization.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<Opcode, RegisteredHandler>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `opcode`.
    ///
    /// # Panics
    ///
    /// Panics when a handler for `opcode` is already registered.
    /// Duplicate registration is a startup-time programming error, not
    /// a runtime condition.
    pub fn register<F>(&mut self, opcode: Opcode, name: &'static str, callback: F)
    where
        F: Fn(Request) -> Result<Response, Status> + Send + Sync + 'static,
    {
        let previous = self.handlers.insert(
            opcode,
            RegisteredHandler {
                name,
                callback: Box::new(callback),
            },
        );
        assert!(
            previous.is_none(),
            "duplicate api handler registration for {} ('{}')",
            opcode,
            name
        );
        debug!("[api] registered handler {} '{}'", opcode, name);
    }

    /// Route a request to its handler. Unknown opcodes are a protocol
    /// error, not a crash.
    pub fn dispatch(&self, opcode: Opcode, request: Request) -> Result<Response, Status> {
        let Some(handler) = self.handlers.get(&opcode) else {
            warn!("[api] no handler for opcode {}", opcode);
            return Err(Status::UnknownOpcode);
        };
        let result = (handler.callback)(request);
        if let Err(status) = &result {
            debug!("[api] '{}' failed: {}", handler.name, status);
        }
        result
    }

    /// Name of the registered handler, for diagnostics.
    #[must_use]
    pub fn handler_name(&self, opcode: Opcode) -> Option<&'static str> {
        self.handlers.get(&opcode).map(|handler| handler.name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
