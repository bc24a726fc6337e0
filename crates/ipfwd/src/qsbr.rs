// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Quiescent-state-based reclamation coordinator.
//!
//! Dataplane workers read the forwarding tables without locks; the
//! control thread replaces entries by publishing a new pointer and
//! *retiring* the old allocation instead of freeing it. A retired object
//! is freed only once every registered worker has reported a quiescent
//! state (a point where it holds no reference into shared structures)
//! after the retirement.
//!
//! The scheme is an explicit generation counter plus a fixed table of
//! per-worker slots:
//!
//! - `retire()` bumps the global generation and stamps the object with
//!   the post-bump value
//! - `report_quiescent()` copies the global generation into the worker's
//!   slot
//! - `reclaim()` frees every retired object whose stamp is <= the
//!   minimum generation seen across all registered workers
//!
//! Concurrency shape: many readers, exactly one writer (mutations are
//! serialized upstream by the dispatch layer). A worker that stops
//! reporting quiescence stalls reclamation without blocking anyone;
//! that is the accepted trade-off and belongs to monitoring.

use crate::config::RuntimeLimits;
use crate::error::{Error, Result};
use crossbeam::utils::CachePadded;
use log::{debug, warn};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One slot per registered dataplane worker.
///
/// Cache-line padded: `seen` is written by the owning worker on every
/// poll-loop iteration and must not false-share with its neighbours.
struct WorkerSlot {
    /// Slot is claimed by a live worker.
    registered: AtomicBool,
    /// Last global generation this worker observed while quiescent.
    seen: AtomicU64,
    /// Worker is currently inside a read section. Not part of the
    /// reclamation math; guards the report-while-reading misuse in
    /// debug builds.
    in_read: AtomicBool,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            registered: AtomicBool::new(false),
            seen: AtomicU64::new(0),
            in_read: AtomicBool::new(false),
        }
    }
}

/// Registration handle for one dataplane worker. Not cloneable; the
/// exclusive borrow taken by [`Qsbr::enter_read_section`] is what keeps
/// quiescence reports out of read sections at compile time.
#[derive(Debug)]
pub struct ReaderToken {
    idx: usize,
}

/// Marks an active read section. Dereferencing shared forwarding state
/// is only sound while a guard is alive; dropping it exits the section.
pub struct ReadGuard<'a> {
    slot: &'a WorkerSlot,
    _token: PhantomData<&'a mut ReaderToken>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.slot.in_read.store(false, Ordering::Release);
    }
}

/// A retired allocation waiting for all readers to pass a quiescent
/// point. Type-erased: the stamp plus a raw pointer and its dropper.
struct Retired {
    gen: u64,
    ptr: *mut (),
    drop_fn: unsafe fn(*mut ()),
}

// SAFETY: the pointee is `Send` (enforced by the `T: Send` bound on
// `retire_ptr`) and ownership is exclusively the queue's until drop_fn
// runs exactly once.
unsafe impl Send for Retired {}

unsafe fn drop_box<T>(ptr: *mut ()) {
    // SAFETY: ptr originates from Box::into_raw::<T> in retire_ptr and
    // is dropped exactly once (the queue entry is removed alongside).
    drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
}

/// The reclamation coordinator.
pub struct Qsbr {
    /// Global generation. Monotonically increasing; bumped on every
    /// table mutation.
    global: AtomicU64,
    slots: Box<[CachePadded<WorkerSlot>]>,
    /// Retirement queue. Writer-side only (retire/reclaim are writer
    /// operations); the mutex is uncontended and never taken on a read
    /// path.
    retired: Mutex<Vec<Retired>>,
    high_water: usize,
}

impl Qsbr {
    #[must_use]
    pub fn new(limits: &RuntimeLimits) -> Self {
        let slots = (0..limits.max_workers)
            .map(|_| CachePadded::new(WorkerSlot::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            global: AtomicU64::new(1),
            slots,
            retired: Mutex::new(Vec::new()),
            high_water: limits.retire_high_water,
        }
    }

    /// Register a dataplane worker. Called once per worker at startup;
    /// fails only when the fixed-size slot table is exhausted.
    pub fn register_reader(&self) -> Result<ReaderToken> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .registered
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // A freshly claimed slot holds no references, so any
                // seen value a concurrent reclaim observes before this
                // store lands is still safe; at worst reclamation is
                // deferred until the first quiescence report.
                slot.seen.store(self.global.load(Ordering::Acquire), Ordering::Release);
                slot.in_read.store(false, Ordering::Release);
                debug!("[qsbr] reader registered slot={}", idx);
                return Ok(ReaderToken { idx });
            }
        }
        warn!("[qsbr] worker slot table exhausted ({} slots)", self.slots.len());
        Err(Error::ResourceLimit("worker slots"))
    }

    /// Release a worker's slot. The worker must hold no references into
    /// shared structures when it deregisters.
    pub fn unregister(&self, token: ReaderToken) {
        self.release(&token);
    }

    pub(crate) fn release(&self, token: &ReaderToken) {
        let slot = &self.slots[token.idx];
        debug_assert!(!slot.in_read.load(Ordering::Acquire));
        slot.registered.store(false, Ordering::Release);
        debug!("[qsbr] reader unregistered slot={}", token.idx);
    }

    /// Enter a read section. The exclusive token borrow prevents
    /// `report_quiescent` until the returned guard is dropped.
    ///
    /// Read sections must be bounded: the worker must not block for an
    /// unbounded time while holding a guard, or reclamation stalls.
    pub fn enter_read_section<'a>(&'a self, token: &'a mut ReaderToken) -> ReadGuard<'a> {
        let slot = &self.slots[token.idx];
        debug_assert!(!slot.in_read.load(Ordering::Acquire), "nested read section");
        slot.in_read.store(true, Ordering::Release);
        ReadGuard {
            slot,
            _token: PhantomData,
        }
    }

    /// Report that this worker holds no reference into shared state.
    /// Called once per poll-loop iteration, outside any read section.
    pub fn report_quiescent(&self, token: &mut ReaderToken) {
        let slot = &self.slots[token.idx];
        debug_assert!(
            !slot.in_read.load(Ordering::Acquire),
            "quiescence reported inside a read section"
        );
        slot.seen
            .store(self.global.load(Ordering::Acquire), Ordering::Release);
    }

    /// Current global generation. Monotonic; exposed for monitoring.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.global.load(Ordering::Acquire)
    }

    /// Number of retired objects not yet freed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.retired.lock().len()
    }

    /// Bump the global generation without retiring anything. Used by
    /// mutations that only publish new memory (pure inserts).
    pub(crate) fn bump(&self) {
        self.global.fetch_add(1, Ordering::AcqRel);
    }

    /// Retire a heap allocation: capture the post-bump generation and
    /// queue the pointer for deferred freeing. Does not free inline
    /// unless the queue crossed its high-water mark.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw::<T>`, must already be
    /// unreachable from every shared structure (unlinked with `Release`
    /// ordering before this call), and must not be retired twice.
    pub unsafe fn retire_ptr<T: Send + 'static>(&self, ptr: *mut T) {
        let gen = self.global.fetch_add(1, Ordering::AcqRel) + 1;
        let mut queue = self.retired.lock();
        queue.push(Retired {
            gen,
            ptr: ptr.cast(),
            drop_fn: drop_box::<T>,
        });
        if queue.len() >= self.high_water {
            let freed = self.reclaim_queue(&mut queue);
            if freed == 0 {
                warn!(
                    "[qsbr] retirement queue above high water ({} pending), readers not quiescing",
                    queue.len()
                );
            }
        }
    }

    /// Free every retired object whose generation has been observed by
    /// all registered workers. Writer-side; bounded by the queue length.
    pub fn reclaim(&self) -> usize {
        let mut queue = self.retired.lock();
        self.reclaim_queue(&mut queue)
    }

    fn reclaim_queue(&self, queue: &mut Vec<Retired>) -> usize {
        let min_seen = self.min_seen();
        let before = queue.len();
        queue.retain(|retired| {
            if retired.gen <= min_seen {
                // SAFETY: every registered worker has reported a
                // quiescent state at or after this retirement, so no
                // reader can still hold the pointer. drop_fn matches the
                // pointee type captured in retire_ptr.
                unsafe { (retired.drop_fn)(retired.ptr) };
                false
            } else {
                true
            }
        });
        let freed = before - queue.len();
        if freed > 0 {
            debug!("[qsbr] reclaimed {} objects, {} pending", freed, queue.len());
        }
        freed
    }

    /// Minimum observed generation across registered workers, or
    /// `u64::MAX` when no worker is registered (everything reclaimable).
    fn min_seen(&self) -> u64 {
        let mut min = u64::MAX;
        for slot in self.slots.iter() {
            if slot.registered.load(Ordering::Acquire) {
                min = min.min(slot.seen.load(Ordering::Acquire));
            }
        }
        min
    }
}

impl Drop for Qsbr {
    fn drop(&mut self) {
        // Tear-down: no readers can remain (they borrow the coordinator),
        // so everything pending is freed.
        let mut queue = self.retired.lock();
        for retired in queue.drain(..) {
            // SAFETY: exclusive access at drop; each entry freed once.
            unsafe { (retired.drop_fn)(retired.ptr) };
        }
    }
}
