// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local interface address store.
//!
//! Decides whether a destination is on-link: an address covered by a
//! configured local prefix needs no gateway. Consulted at route and
//! next-hop configuration time only, never per packet, so plain
//! concurrent-map access is fine here (single-writer assumption upstream
//! serializes mutations).

use crate::error::{Error, Result};
use crate::types::{Ipv4Net, PortId};
use dashmap::DashMap;
use log::debug;
use std::net::Ipv4Addr;

/// One locally owned address: interface address, prefix length and the
/// port that carries it. Created and destroyed only by explicit operator
/// action; no implicit expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAddress {
    pub ip: Ipv4Addr,
    pub prefixlen: u8,
    pub port_id: PortId,
}

impl LocalAddress {
    /// The on-link prefix this address configures (host bits masked).
    pub fn network(&self) -> Ipv4Net {
        // prefixlen was validated at insert time.
        Ipv4Net::truncate(self.ip, self.prefixlen).expect("validated prefixlen")
    }

    /// True when `ip` is on the same link as this address.
    #[must_use]
    pub fn covers(&self, ip: Ipv4Addr) -> bool {
        self.network().contains(ip)
    }
}

/// Exact-IP map of local addresses. At most one record per address; two
/// records may configure overlapping prefixes on different ports
/// (multi-homing).
pub struct AddrStore {
    map: DashMap<Ipv4Addr, LocalAddress>,
}

impl Default for AddrStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AddrStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Add a local address. `prefixlen` must be 1..=32; a second record
    /// for the same exact address is rejected.
    pub fn insert(&self, ip: Ipv4Addr, prefixlen: u8, port_id: PortId) -> Result<()> {
        if prefixlen == 0 || prefixlen > 32 {
            return Err(Error::InvalidPrefix {
                prefix: ip,
                prefixlen,
            });
        }
        match self.map.entry(ip) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::Exists),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(LocalAddress {
                    ip,
                    prefixlen,
                    port_id,
                });
                debug!("[addr] added {}/{} on port {}", ip, prefixlen, port_id);
                Ok(())
            }
        }
    }

    pub fn remove(&self, ip: Ipv4Addr) -> Result<()> {
        match self.map.remove(&ip) {
            Some(_) => {
                debug!("[addr] removed {}", ip);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Record configured with exactly this address, if any.
    #[must_use]
    pub fn lookup_exact(&self, ip: Ipv4Addr) -> Option<LocalAddress> {
        self.map.get(&ip).map(|entry| entry.clone())
    }

    /// The local address whose prefix covers `ip`, preferring the
    /// longest covering prefix. `None` means `ip` is off-link.
    #[must_use]
    pub fn covering(&self, ip: Ipv4Addr) -> Option<LocalAddress> {
        self.map
            .iter()
            .filter(|entry| entry.covers(ip))
            .max_by_key(|entry| entry.prefixlen)
            .map(|entry| entry.clone())
    }

    /// Point-in-time listing sorted by address.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LocalAddress> {
        let mut out: Vec<LocalAddress> =
            self.map.iter().map(|entry| entry.clone()).collect();
        out.sort_by_key(|addr| u32::from(addr.ip));
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_duplicate_rejected() {
        let store = AddrStore::new();
        store.insert(Ipv4Addr::new(10, 0, 0, 1), 24, 0).unwrap();
        assert_eq!(
            store.insert(Ipv4Addr::new(10, 0, 0, 1), 16, 1),
            Err(Error::Exists)
        );
        // Overlapping prefix on another port is multi-homing, allowed.
        store.insert(Ipv4Addr::new(10, 0, 0, 2), 24, 1).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn prefixlen_validation() {
        let store = AddrStore::new();
        assert!(matches!(
            store.insert(Ipv4Addr::new(10, 0, 0, 1), 0, 0),
            Err(Error::InvalidPrefix { .. })
        ));
        assert!(matches!(
            store.insert(Ipv4Addr::new(10, 0, 0, 1), 33, 0),
            Err(Error::InvalidPrefix { .. })
        ));
    }

    #[test]
    fn covering_prefers_longest_prefix() {
        let store = AddrStore::new();
        store.insert(Ipv4Addr::new(10, 0, 0, 1), 8, 0).unwrap();
        store.insert(Ipv4Addr::new(10, 1, 0, 1), 16, 1).unwrap();

        let hit = store.covering(Ipv4Addr::new(10, 1, 2, 3)).expect("on-link");
        assert_eq!(hit.port_id, 1);
        let hit = store.covering(Ipv4Addr::new(10, 2, 0, 9)).expect("on-link");
        assert_eq!(hit.port_id, 0);
        assert!(store.covering(Ipv4Addr::new(192, 0, 2, 1)).is_none());
    }

    #[test]
    fn remove_then_off_link() {
        let store = AddrStore::new();
        store.insert(Ipv4Addr::new(192, 0, 2, 1), 24, 0).unwrap();
        assert!(store.covering(Ipv4Addr::new(192, 0, 2, 50)).is_some());
        store.remove(Ipv4Addr::new(192, 0, 2, 1)).unwrap();
        assert!(store.covering(Ipv4Addr::new(192, 0, 2, 50)).is_none());
        assert_eq!(store.remove(Ipv4Addr::new(192, 0, 2, 1)), Err(Error::NotFound));
    }

    #[test]
    fn lookup_exact_is_exact() {
        let store = AddrStore::new();
        store.insert(Ipv4Addr::new(10, 0, 0, 1), 24, 0).unwrap();
        assert!(store.lookup_exact(Ipv4Addr::new(10, 0, 0, 1)).is_some());
        // Covered but not configured.
        assert!(store.lookup_exact(Ipv4Addr::new(10, 0, 0, 2)).is_none());
    }
}
