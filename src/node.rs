//! The versioned wrapper node that the chain is built from.
//!
//! Every element a caller inserts is boxed into one of these; the box is the
//! unit the chain links, CASes, and eventually reclaims. `elm` is wrapped in
//! `ManuallyDrop` because a node's payload can be taken out of the node
//! before the node's own memory is freed (see `ConcurrentList::remove_head`
//! and the reclaimer) — the node's allocation and the element's lifetime are
//! managed independently.

use std::cell::Cell;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

pub(crate) struct Node<T> {
    pub(crate) elm: ManuallyDrop<T>,
    pub(crate) insert_txn_id: u64,
    pub(crate) removed_txn_id: AtomicU64,
    pub(crate) next: AtomicPtr<Node<T>>,
    /// Set once `elm` has been moved out by `remove_head` so the eventual
    /// reclaimer knows not to read or drop it a second time. Only ever
    /// touched by the thread that detached the node and, later, by whichever
    /// single thread pops it off a retired list — never concurrently.
    pub(crate) value_taken: Cell<bool>,
}

impl<T> Node<T> {
    pub(crate) fn new_boxed(elm: T, insert_txn_id: u64, next: *mut Node<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            elm: ManuallyDrop::new(elm),
            insert_txn_id,
            removed_txn_id: AtomicU64::new(0),
            next: AtomicPtr::new(next),
            value_taken: Cell::new(false),
        }))
    }
}

/// A node is visible at snapshot `s` iff it was inserted no later than `s`
/// and either never removed or removed strictly after `s`. Pure function of
/// the node's two version fields; independent of chain position.
pub(crate) fn visible<T>(node: &Node<T>, s: u64) -> bool {
    let removed = node.removed_txn_id.load(Ordering::Acquire);
    node.insert_txn_id <= s && (removed == 0 || removed > s)
}
