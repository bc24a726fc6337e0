// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sizing constants and runtime limits - single source of truth.
//!
//! All fixed-size tables in this crate are dimensioned here.
//! **NEVER hardcode these values elsewhere!**
//!
//! Two levels, same split as the rest of the stack:
//!
//! - **Level 1 (static)**: compile-time constants (trie geometry, defaults)
//! - **Level 2 (dynamic)**: [`RuntimeLimits`], chosen by the embedding
//!   process at construction time and passed down explicitly (no globals)

/// Default number of dataplane worker slots in the reclamation
/// coordinator. One slot per forwarding core; registration beyond this
/// fails with `ResourceLimit`.
pub const DEFAULT_MAX_WORKERS: usize = 64;

/// Default bucket count for the next-hop hash table. Must be a power of
/// two (bucket index is `hash & (buckets - 1)`).
pub const DEFAULT_NH_BUCKETS: usize = 1024;

/// Retirement-queue length at which `retire()` triggers an opportunistic
/// `reclaim()` pass on the writer thread.
pub const DEFAULT_RETIRE_HIGH_WATER: usize = 256;

/// FIB trie stride in address bits. 8 bits per level bounds lookup depth
/// at [`FIB_LEVELS`] independent of table size.
pub const FIB_STRIDE: u32 = 8;

/// Number of trie levels (32 address bits / 8-bit stride).
pub const FIB_LEVELS: usize = 4;

/// Slots per trie node (`1 << FIB_STRIDE`).
pub const FIB_FANOUT: usize = 1 << FIB_STRIDE;

/// Construction-time sizing for the forwarding-state subsystem.
///
/// Owned by the embedding process and handed to `Qsbr::new` /
/// `Ip4Control::new`; defaults match a mid-size software router.
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    /// Capacity of the reclamation coordinator's worker-slot table.
    pub max_workers: usize,
    /// Next-hop hash bucket count (power of two).
    pub nh_buckets: usize,
    /// Retirement-queue high-water mark for opportunistic reclaim.
    pub retire_high_water: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            nh_buckets: DEFAULT_NH_BUCKETS,
            retire_high_water: DEFAULT_RETIRE_HIGH_WATER,
        }
    }
}
