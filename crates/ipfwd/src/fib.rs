// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Forwarding table: longest-prefix match from IPv4 prefix to next hop.
//!
//! A 4-level, stride-8 multibit trie with prefix expansion. Each node
//! carries 256 leaf slots (best match whose length falls in this node's
//! 8-bit window) and 256 child pointers; a prefix of length `L` lives at
//! depth `(L-1)/8` and is expanded into `2^(8 - L%8)` slots. Lookup is
//! at most [`FIB_LEVELS`](crate::config::FIB_LEVELS) slot loads plus
//! child loads, independent of table size, with no allocation and no
//! lock: the dataplane follows acquire-loaded pointers, the single
//! writer publishes with release stores and retires replaced leaves and
//! pruned nodes through the [`Qsbr`] coordinator.
//!
//! The writer additionally keeps a private shadow table of exact routes
//! (prefix -> leaf allocation). Deleting a prefix uses it to restore
//! each expanded slot to the longest remaining same-node route covering
//! it; shorter routes at shallower depths need no restore because the
//! lookup tracks the best candidate on its way down.

use crate::config::{FIB_FANOUT, FIB_LEVELS};
use crate::error::{Error, Result};
use crate::nexthop::NextHopRef;
use crate::qsbr::{Qsbr, ReadGuard};
use crate::types::Ipv4Net;
use log::{debug, error};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// One installed route, as reported by [`Fib::iter_routes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub net: Ipv4Net,
    pub nh: NextHopRef,
}

/// Immutable once published. Shared by every slot its prefix expands
/// into; retired exactly once when the route is replaced or removed.
struct Leaf {
    net: Ipv4Net,
    nh: NextHopRef,
}

struct TrieNode {
    slots: [AtomicPtr<Leaf>; FIB_FANOUT],
    children: [AtomicPtr<TrieNode>; FIB_FANOUT],
}

impl TrieNode {
    fn boxed() -> Box<TrieNode> {
        Box::new(TrieNode {
            slots: std::array::from_fn(|_| AtomicPtr::new(null_mut())),
            children: std::array::from_fn(|_| AtomicPtr::new(null_mut())),
        })
    }

    /// Writer-side emptiness check used for pruning.
    fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.load(Ordering::Relaxed).is_null())
            && self
                .children
                .iter()
                .all(|c| c.load(Ordering::Relaxed).is_null())
    }
}

struct FibShared {
    root: TrieNode,
    /// The /0 route, outside the trie: it covers every slot of every
    /// node and is cheaper as a single fallback pointer.
    default_route: AtomicPtr<Leaf>,
}

impl Drop for FibShared {
    fn drop(&mut self) {
        // Leaves were already unlinked and retired by the writer's drop
        // (the shadow table is the authoritative leaf set; slots can
        // share one allocation or hold none for a fully shadowed
        // route). Only the node chains are owned here.
        free_node(&mut self.root);
    }
}

/// Tear-down helper: frees a node's children recursively.
fn free_node(node: &mut TrieNode) {
    for child in node.children.iter_mut() {
        let ptr = *child.get_mut();
        if !ptr.is_null() {
            // SAFETY: child nodes are uniquely owned by their parent.
            let mut boxed = unsafe { Box::from_raw(ptr) };
            free_node(&mut boxed);
        }
    }
}

/// Null every leaf slot reachable from `node`, including children.
/// Writer-side unlink step ahead of retiring the leaves.
fn clear_slots(node: &TrieNode) {
    for slot in &node.slots {
        slot.store(null_mut(), Ordering::Release);
    }
    for child in &node.children {
        let ptr = child.load(Ordering::Acquire);
        if !ptr.is_null() {
            // SAFETY: writer-owned traversal; nodes are freed only at
            // the last view drop.
            clear_slots(unsafe { &*ptr });
        }
    }
}

/// Writer handle for the forwarding table. Mutations take `&mut self`
/// (single-writer discipline in the type system); reads go through
/// [`FibView`].
pub struct Fib {
    shared: Arc<FibShared>,
    qsbr: Arc<Qsbr>,
    /// Exact installed routes -> their live leaf allocation. Writer
    /// private; drives delete-time slot restoration.
    routes: BTreeMap<(u32, u8), *mut Leaf>,
}

// SAFETY: the raw leaf pointers in the shadow table point into the trie
// and are only dereferenced under `&mut self` by the single writer.
unsafe impl Send for Fib {}

impl Drop for Fib {
    fn drop(&mut self) {
        // Unlink every leaf, then retire the authoritative set from the
        // shadow table. Outstanding views keep reading nulled slots;
        // the coordinator defers the frees past their read sections.
        self.shared.default_route.store(null_mut(), Ordering::Release);
        clear_slots(&self.shared.root);
        for (_, leaf) in std::mem::take(&mut self.routes) {
            // SAFETY: unlinked above; allocated via Box, one shadow
            // entry per allocation.
            unsafe { self.qsbr.retire_ptr(leaf) };
        }
    }
}

/// Cloneable read-only view handed to dataplane workers.
#[derive(Clone)]
pub struct FibView {
    shared: Arc<FibShared>,
}

/// Byte of `bits` selecting the slot at `depth`.
fn byte_at(bits: u32, depth: usize) -> usize {
    ((bits >> (24 - 8 * depth)) & 0xff) as usize
}

/// Trie depth a prefix length lives at. `plen` must be 1..=32.
fn depth_of(plen: u8) -> usize {
    usize::from(plen - 1) / 8
}

/// Expansion range of a prefix inside its node: (depth, first slot,
/// slot count).
fn slot_range(net: Ipv4Net) -> (usize, usize, usize) {
    let plen = net.prefixlen();
    let depth = depth_of(plen);
    let bits_in_node = usize::from(plen) - 8 * depth; // 1..=8
    let count = 1usize << (8 - bits_in_node);
    let base = byte_at(net.bits(), depth) & !(count - 1);
    (depth, base, count)
}

impl Fib {
    #[must_use]
    pub fn new(qsbr: Arc<Qsbr>) -> Self {
        Self {
            shared: Arc::new(FibShared {
                root: TrieNode {
                    slots: std::array::from_fn(|_| AtomicPtr::new(null_mut())),
                    children: std::array::from_fn(|_| AtomicPtr::new(null_mut())),
                },
                default_route: AtomicPtr::new(null_mut()),
            }),
            qsbr,
            routes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn view(&self) -> FibView {
        FibView {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Install or replace a route. An existing entry with the exact
    /// same prefix is replaced silently (last writer wins) and retired.
    /// Prefix validity is carried by the [`Ipv4Net`] type.
    pub fn insert(&mut self, net: Ipv4Net, nh: NextHopRef) -> Result<()> {
        let key = (net.bits(), net.prefixlen());
        let leaf = Box::into_raw(Box::new(Leaf { net, nh }));

        if net.prefixlen() == 0 {
            let old = self.shared.default_route.swap(leaf, Ordering::AcqRel);
            let prev = self.routes.insert(key, leaf);
            debug_assert_eq!(prev.unwrap_or(null_mut()), old);
            if old.is_null() {
                self.qsbr.bump();
            } else {
                // SAFETY: unlinked by the swap above; allocated via Box.
                unsafe { self.qsbr.retire_ptr(old) };
            }
            debug!("[fib] installed {} -> {}", net, nh.ip());
            return Ok(());
        }

        let (depth, base, count) = slot_range(net);
        let mut node: &TrieNode = &self.shared.root;
        for d in 0..depth {
            let b = byte_at(net.bits(), d);
            let child = node.children[b].load(Ordering::Acquire);
            let child = if child.is_null() {
                let fresh = Box::into_raw(TrieNode::boxed());
                node.children[b].store(fresh, Ordering::Release);
                fresh
            } else {
                child
            };
            // SAFETY: children are freed only through the coordinator
            // by this writer.
            node = unsafe { &*child };
        }

        let plen = net.prefixlen();
        for slot in &node.slots[base..base + count] {
            let cur = slot.load(Ordering::Relaxed);
            // SAFETY: writer-owned traversal; leaves outlive this call.
            let replace = cur.is_null() || unsafe { (*cur).net.prefixlen() } <= plen;
            if replace {
                slot.store(leaf, Ordering::Release);
            }
        }

        match self.routes.insert(key, leaf) {
            // SAFETY: every slot holding the old leaf was overwritten
            // above (equal length means identical expansion range).
            Some(old) => unsafe { self.qsbr.retire_ptr(old) },
            None => self.qsbr.bump(),
        }
        debug!("[fib] installed {} -> {}", net, nh.ip());
        Ok(())
    }

    /// Remove the exact prefix. Overlapping shorter and longer prefixes
    /// are unaffected; slots the removed route was expanded into are
    /// restored to the longest remaining same-node route covering them.
    pub fn remove(&mut self, net: Ipv4Net) -> Result<()> {
        let key = (net.bits(), net.prefixlen());
        let Some(leaf) = self.routes.remove(&key) else {
            return Err(Error::NotFound);
        };

        if net.prefixlen() == 0 {
            self.shared.default_route.store(null_mut(), Ordering::Release);
            // SAFETY: unlinked above; allocated via Box.
            unsafe { self.qsbr.retire_ptr(leaf) };
            debug!("[fib] removed {}", net);
            return Ok(());
        }

        let (depth, base, count) = slot_range(net);
        let mut path: Vec<(&TrieNode, usize)> = Vec::with_capacity(FIB_LEVELS);
        let mut node: &TrieNode = &self.shared.root;
        for d in 0..depth {
            let b = byte_at(net.bits(), d);
            let child = node.children[b].load(Ordering::Acquire);
            if child.is_null() {
                // Shadow table says the route exists but its node chain
                // is gone: invariant violation.
                let what = format!("missing trie node for installed route {}", net);
                debug_assert!(false, "{}", what);
                error!("[fib] {}", what);
                return Err(Error::Inconsistent(what));
            }
            path.push((node, b));
            // SAFETY: writer-owned traversal, see insert().
            node = unsafe { &*child };
        }

        for idx in base..base + count {
            let slot = &node.slots[idx];
            if slot.load(Ordering::Relaxed) != leaf {
                continue; // shadowed by a longer prefix, leave it
            }
            slot.store(self.best_covering(net, depth, idx), Ordering::Release);
        }
        // SAFETY: no slot references the leaf anymore.
        unsafe { self.qsbr.retire_ptr(leaf) };

        // Prune node chains left empty, deepest first. The root is
        // inline and never pruned.
        let mut empty = node.is_empty();
        for (parent, b) in path.iter().rev() {
            if !empty {
                break;
            }
            let dead = parent.children[*b].swap(null_mut(), Ordering::AcqRel);
            debug_assert!(!dead.is_null());
            // SAFETY: unlinked above; the node is empty so it owns
            // nothing else.
            unsafe { self.qsbr.retire_ptr(dead) };
            empty = parent.is_empty();
        }

        debug!("[fib] removed {}", net);
        Ok(())
    }

    /// Longest remaining shadow route that lives in the same node as
    /// `net` (same leading bytes, length within the node's window), is
    /// shorter than the removed route, and covers `slot_idx`.
    fn best_covering(&self, net: Ipv4Net, depth: usize, slot_idx: usize) -> *mut Leaf {
        let node_mask = if depth == 0 {
            0
        } else {
            !0u32 << (32 - 8 * depth as u32)
        };
        let node_base = net.bits() & node_mask;
        let node_top = node_base | !node_mask;

        let mut best: *mut Leaf = null_mut();
        let mut best_plen = 0u8;
        for (&(pbits, plen), &cand) in self.routes.range((node_base, 0u8)..=(node_top, 32u8)) {
            if plen == 0 || depth_of(plen) != depth || plen >= net.prefixlen() {
                continue;
            }
            let bits_in_node = usize::from(plen) - 8 * depth;
            let span = 1usize << (8 - bits_in_node);
            let cand_base = byte_at(pbits, depth) & !(span - 1);
            if slot_idx >= cand_base && slot_idx < cand_base + span && plen > best_plen {
                best = cand;
                best_plen = plen;
            }
        }
        best
    }

    /// Number of routes whose next-hop reference equals `nh`. Used by
    /// the control plane to refuse deleting a next hop still in use.
    #[must_use]
    pub fn routes_referencing(&self, nh: NextHopRef) -> usize {
        self.routes
            .values()
            // SAFETY: shadow leaves are live trie allocations, only
            // dereferenced by the writer.
            .filter(|&&leaf| unsafe { (*leaf).nh } == nh)
            .count()
    }

    /// All installed routes in prefix order. Control-plane snapshot.
    #[must_use]
    pub fn iter_routes(&self) -> Vec<RouteEntry> {
        self.routes
            .values()
            .map(|&leaf| {
                // SAFETY: see routes_referencing().
                let leaf = unsafe { &*leaf };
                RouteEntry {
                    net: leaf.net,
                    nh: leaf.nh,
                }
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FibView {
    /// Longest-prefix match. Lock-free, allocation-free, bounded at
    /// [`FIB_LEVELS`] node visits. Returns the next-hop reference of
    /// the longest installed prefix covering `dst`, or `None`.
    #[must_use]
    pub fn lookup<'g>(&self, dst: Ipv4Addr, _guard: &'g ReadGuard<'_>) -> Option<NextHopRef> {
        let bits = u32::from(dst);
        let mut best = self.shared.default_route.load(Ordering::Acquire);
        let mut node: &TrieNode = &self.shared.root;
        for depth in 0..FIB_LEVELS {
            let b = byte_at(bits, depth);
            let leaf = node.slots[b].load(Ordering::Acquire);
            if !leaf.is_null() {
                best = leaf;
            }
            let child = node.children[b].load(Ordering::Acquire);
            if child.is_null() {
                break;
            }
            // SAFETY: published with release ordering; not freed before
            // this read section ends (QSBR contract via the guard).
            node = unsafe { &*child };
        }
        if best.is_null() {
            None
        } else {
            // SAFETY: same reclamation argument as above.
            Some(unsafe { (*best).nh })
        }
    }
}
