// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plain data carriers shared across the forwarding-state subsystem.

use crate::error::{Error, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::ops::{BitOr, BitOrAssign};

/// Egress port identifier. Opaque handle into the port table.
pub type PortId = u16;

/// 48-bit link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    #[must_use]
    pub const fn octets(self) -> [u8; 6] {
        self.0
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Next-hop state flags. Bitset, wire-compatible with a u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NhFlags(u16);

impl NhFlags {
    /// No flags set.
    pub const NONE: NhFlags = NhFlags(0);
    /// Link-layer address is resolved; frames can be forwarded.
    pub const REACHABLE: NhFlags = NhFlags(1 << 0);
    /// Reached through a gateway (not on a local prefix).
    pub const GATEWAY: NhFlags = NhFlags(1 << 1);
    /// Directly connected: covered by a local interface address.
    pub const LINK: NhFlags = NhFlags(1 << 2);
    /// Installed by operator configuration; exempt from aging.
    pub const STATIC: NhFlags = NhFlags(1 << 3);

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: NhFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NhFlags {
    type Output = NhFlags;
    fn bitor(self, rhs: NhFlags) -> NhFlags {
        NhFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for NhFlags {
    fn bitor_assign(&mut self, rhs: NhFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for NhFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(NhFlags, &str); 4] = [
            (NhFlags::REACHABLE, "reachable"),
            (NhFlags::GATEWAY, "gateway"),
            (NhFlags::LINK, "link"),
            (NhFlags::STATIC, "static"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

/// An IPv4 network prefix: address plus prefix length, host bits clear.
///
/// Construction validates the prefix; a held `Ipv4Net` is always
/// well-formed, so the FIB never has to re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Net {
    addr: Ipv4Addr,
    prefixlen: u8,
}

impl Ipv4Net {
    /// Build a prefix, rejecting `prefixlen > 32` and set host bits.
    pub fn new(addr: Ipv4Addr, prefixlen: u8) -> Result<Self> {
        let invalid = Error::InvalidPrefix {
            prefix: addr,
            prefixlen,
        };
        if prefixlen > 32 {
            return Err(invalid);
        }
        let bits = u32::from(addr);
        if bits & !mask(prefixlen) != 0 {
            return Err(invalid);
        }
        Ok(Self { addr, prefixlen })
    }

    /// Build a prefix from any address by masking host bits away.
    /// Still rejects `prefixlen > 32`.
    pub fn truncate(addr: Ipv4Addr, prefixlen: u8) -> Result<Self> {
        if prefixlen > 32 {
            return Err(Error::InvalidPrefix {
                prefix: addr,
                prefixlen,
            });
        }
        Ok(Self {
            addr: Ipv4Addr::from(u32::from(addr) & mask(prefixlen)),
            prefixlen,
        })
    }

    #[must_use]
    pub const fn addr(self) -> Ipv4Addr {
        self.addr
    }

    #[must_use]
    pub const fn prefixlen(self) -> u8 {
        self.prefixlen
    }

    /// Network bits as a host-order u32.
    #[must_use]
    pub fn bits(self) -> u32 {
        u32::from(self.addr)
    }

    #[must_use]
    pub fn netmask(self) -> u32 {
        mask(self.prefixlen)
    }

    /// True when `ip` falls inside this prefix.
    #[must_use]
    pub fn contains(self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.netmask() == self.bits()
    }
}

impl fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefixlen)
    }
}

/// Netmask for a prefix length. `prefixlen` must be <= 32.
fn mask(prefixlen: u8) -> u32 {
    if prefixlen == 0 {
        0
    } else {
        !0u32 << (32 - u32::from(prefixlen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_display() {
        let mac = MacAddr::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:01");
        assert!(MacAddr::ZERO.is_zero());
        assert!(!mac.is_zero());
    }

    #[test]
    fn flags_ops() {
        let mut flags = NhFlags::REACHABLE | NhFlags::STATIC;
        assert!(flags.contains(NhFlags::REACHABLE));
        assert!(!flags.contains(NhFlags::GATEWAY));
        flags |= NhFlags::GATEWAY;
        assert!(flags.contains(NhFlags::GATEWAY));
        assert_eq!(flags.to_string(), "reachable|gateway|static");
        assert_eq!(NhFlags::NONE.to_string(), "-");
    }

    #[test]
    fn net_validation() {
        assert!(Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 8).is_ok());
        assert!(Ipv4Net::new(Ipv4Addr::new(0, 0, 0, 0), 0).is_ok());
        assert!(Ipv4Net::new(Ipv4Addr::new(255, 255, 255, 255), 32).is_ok());
        // host bits set
        assert_eq!(
            Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 1), 8),
            Err(Error::InvalidPrefix {
                prefix: Ipv4Addr::new(10, 0, 0, 1),
                prefixlen: 8
            })
        );
        // length out of range
        assert!(Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 33).is_err());
    }

    #[test]
    fn net_truncate_masks_host_bits() {
        let net = Ipv4Net::truncate(Ipv4Addr::new(192, 0, 2, 17), 24).unwrap();
        assert_eq!(net.addr(), Ipv4Addr::new(192, 0, 2, 0));
        assert!(net.contains(Ipv4Addr::new(192, 0, 2, 200)));
        assert!(!net.contains(Ipv4Addr::new(192, 0, 3, 1)));
    }

    #[test]
    fn default_prefix_contains_everything() {
        let net = Ipv4Net::new(Ipv4Addr::new(0, 0, 0, 0), 0).unwrap();
        assert!(net.contains(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(net.contains(Ipv4Addr::new(255, 255, 255, 255)));
    }
}
