//! Hazard-pointer and active-snapshot registries.
//!
//! One `ThreadRegistry` is embedded in each `ConcurrentList`. A thread
//! enrolls the first time it touches a given list and keeps the same slot
//! for the lifetime of the thread; enrollment is cached in a thread-local
//! keyed by the registry's address, so one thread can use several
//! independent lists without fighting over slots.
//!
//! Ceilings are fixed at compile time (design parameter, spec.md §4.2/§5).
//! Threads beyond `MAX_THREADS` still observe and mutate the chain
//! correctly; they simply never publish a hazard pointer or a snapshot, so
//! reclamation treats them as absent rather than corrupting anything.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};

/// Hazard-pointer slots per enrolled thread: one to protect `prev`, one for
/// `curr`, matching the two-cursor hand-over-hand traversals in §4.5.
pub(crate) const HAZARDS_PER_THREAD: usize = 2;

/// Number of threads a single list can track for hazard pointers and active
/// snapshots. Threads beyond this simply skip hazard protection and never
/// participate in the active-snapshot watermark (spec.md §5 "Capacity
/// limits").
pub(crate) const MAX_THREADS: usize = 128;

thread_local! {
    static SLOTS: RefCell<HashMap<usize, usize>> = RefCell::new(HashMap::new());
}

pub(crate) struct ThreadRegistry {
    hazards: Box<[AtomicPtr<()>]>,
    active_snapshot: Box<[AtomicU64]>,
    next_index: AtomicUsize,
}

impl ThreadRegistry {
    pub(crate) fn new() -> Self {
        ThreadRegistry {
            hazards: (0..MAX_THREADS * HAZARDS_PER_THREAD)
                .map(|_| AtomicPtr::new(std::ptr::null_mut()))
                .collect(),
            active_snapshot: (0..MAX_THREADS).map(|_| AtomicU64::new(0)).collect(),
            next_index: AtomicUsize::new(0),
        }
    }

    /// Returns this thread's slot index into this registry, enrolling it on
    /// first use. `None` once the registry is at capacity; callers must
    /// treat that thread as unprotected rather than fail the operation.
    pub(crate) fn slot(&self) -> Option<usize> {
        let key = self as *const _ as usize;
        SLOTS.with(|slots| {
            if let Some(&i) = slots.borrow().get(&key) {
                return Some(i);
            }
            let i = self.next_index.fetch_add(1, Ordering::AcqRel);
            if i >= MAX_THREADS {
                return None;
            }
            slots.borrow_mut().insert(key, i);
            Some(i)
        })
    }

    /// Publish `ptr` into this thread's hazard slot 0 (the `curr` slot).
    pub(crate) fn hp_acquire<T>(&self, ptr: *const T) {
        if let Some(i) = self.slot() {
            self.hazards[i * HAZARDS_PER_THREAD].store(ptr as *mut (), Ordering::Release);
        }
    }

    /// Publish `ptr` into this thread's hazard slot 1 (the `prev` slot),
    /// used by traversals that must hold two nodes at once.
    pub(crate) fn hp_acquire_secondary<T>(&self, ptr: *const T) {
        if let Some(i) = self.slot() {
            self.hazards[i * HAZARDS_PER_THREAD + 1].store(ptr as *mut (), Ordering::Release);
        }
    }

    /// Clear both of this thread's hazard slots.
    pub(crate) fn hp_release(&self) {
        if let Some(i) = self.slot() {
            self.hazards[i * HAZARDS_PER_THREAD].store(std::ptr::null_mut(), Ordering::Release);
            self.hazards[i * HAZARDS_PER_THREAD + 1].store(std::ptr::null_mut(), Ordering::Release);
        }
    }

    /// True if any enrolled thread currently protects `ptr`.
    pub(crate) fn any_hp_equals<T>(&self, ptr: *const T) -> bool {
        let target = ptr as *mut ();
        self.hazards
            .iter()
            .any(|slot| slot.load(Ordering::Acquire) == target)
    }

    /// Publish this thread's active transaction snapshot.
    pub(crate) fn publish_snapshot(&self, snapshot: u64) {
        if let Some(i) = self.slot() {
            self.active_snapshot[i].store(snapshot, Ordering::Release);
        }
    }

    /// Clear this thread's active transaction snapshot (commit/rollback).
    pub(crate) fn clear_snapshot(&self) {
        if let Some(i) = self.slot() {
            self.active_snapshot[i].store(0, Ordering::Release);
        }
    }

    /// The minimum snapshot held by any in-flight transaction, or `None` if
    /// none are active.
    pub(crate) fn min_active_snapshot(&self) -> Option<u64> {
        self.active_snapshot
            .iter()
            .map(|s| s.load(Ordering::Acquire))
            .filter(|&v| v != 0)
            .min()
    }
}
