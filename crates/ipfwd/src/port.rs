// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Port table: configured physical/virtual ports.
//!
//! The forwarding core only consumes read-only queries from here
//! (`is_valid`, `mac`, `mtu`, at route/next-hop creation time); the CRUD
//! surface exists for the operator. Device probing and NIC life-cycle
//! belong to the embedding dataplane, not this table: a port here is a
//! record, identified by a small integer handle.

use crate::api::{Dispatcher, Opcode, Request, Response};
use crate::error::{Error, Result, Status};
use crate::types::{MacAddr, PortId};
use dashmap::DashMap;
use log::debug;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

pub const PORT_ADD: Opcode = Opcode(0x0101);
pub const PORT_DEL: Opcode = Opcode(0x0102);
pub const PORT_GET: Opcode = Opcode(0x0103);
pub const PORT_LIST: Opcode = Opcode(0x0104);

/// Operator-visible description of one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub port_id: PortId,
    pub name: String,
    pub mac: MacAddr,
    pub mtu: u16,
}

/// Registry of configured ports, keyed by handle, unique by name.
pub struct PortTable {
    ports: DashMap<PortId, PortInfo>,
    next_id: AtomicU16,
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PortTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ports: DashMap::new(),
            next_id: AtomicU16::new(0),
        }
    }

    /// Configure a port. Rejects a duplicate name; returns the assigned
    /// handle.
    pub fn add(&self, name: &str, mac: MacAddr, mtu: u16) -> Result<PortId> {
        if name.is_empty() {
            return Err(Error::InvalidInput("empty port name".into()));
        }
        if self.ports.iter().any(|entry| entry.name == name) {
            return Err(Error::Exists);
        }
        let port_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.ports.insert(
            port_id,
            PortInfo {
                port_id,
                name: name.to_owned(),
                mac,
                mtu,
            },
        );
        debug!("[port] added '{}' id={} mac={} mtu={}", name, port_id, mac, mtu);
        Ok(port_id)
    }

    /// Remove a port by name.
    pub fn del(&self, name: &str) -> Result<()> {
        let port_id = self
            .ports
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.port_id)
            .ok_or(Error::NotFound)?;
        self.ports.remove(&port_id);
        debug!("[port] removed '{}' id={}", name, port_id);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<PortInfo> {
        self.ports
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.clone())
    }

    /// All configured ports, sorted by handle.
    #[must_use]
    pub fn list(&self) -> Vec<PortInfo> {
        let mut out: Vec<PortInfo> = self.ports.iter().map(|entry| entry.clone()).collect();
        out.sort_by_key(|port| port.port_id);
        out
    }

    /// Read-only queries consumed by the forwarding core.
    #[must_use]
    pub fn is_valid(&self, port_id: PortId) -> bool {
        self.ports.contains_key(&port_id)
    }

    #[must_use]
    pub fn mac(&self, port_id: PortId) -> Option<MacAddr> {
        self.ports.get(&port_id).map(|entry| entry.mac)
    }

    #[must_use]
    pub fn mtu(&self, port_id: PortId) -> Option<u16> {
        self.ports.get(&port_id).map(|entry| entry.mtu)
    }
}

/// Register the port CRUD handlers into `dispatcher`.
pub fn register_port_handlers(table: Arc<PortTable>, dispatcher: &mut Dispatcher) {
    let t = Arc::clone(&table);
    dispatcher.register(PORT_ADD, "port add", move |req| match req {
        Request::PortAdd { name, mac, mtu } => {
            let port_id = t.add(&name, mac, mtu).map_err(Status::from)?;
            Ok(Response::Port(PortInfo {
                port_id,
                name,
                mac,
                mtu,
            }))
        }
        _ => Err(Status::InvalidInput),
    });

    let t = Arc::clone(&table);
    dispatcher.register(PORT_DEL, "port del", move |req| match req {
        Request::PortDel { name } => t.del(&name).map(|()| Response::Empty).map_err(Status::from),
        _ => Err(Status::InvalidInput),
    });

    let t = Arc::clone(&table);
    dispatcher.register(PORT_GET, "port get", move |req| match req {
        Request::PortGet { name } => t
            .get(&name)
            .map(Response::Port)
            .ok_or(Status::NotFound),
        _ => Err(Status::InvalidInput),
    });

    let t = table;
    dispatcher.register(PORT_LIST, "port list", move |req| match req {
        Request::PortList => Ok(Response::Ports(t.list())),
        _ => Err(Status::InvalidInput),
    });
}
