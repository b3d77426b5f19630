//! Buffered, snapshot-isolated transactions.
//!
//! A `Transaction` does not touch the chain at all until `commit`. Inserts
//! and removes are buffered against the snapshot captured at `begin_txn`;
//! `for_each`/`contains` resolve that snapshot plus the buffered intent
//! without mutating anything shared. `commit` applies everything under one
//! freshly allocated commit id and then reclaims; `rollback` just discards
//! the buffers.
//!
//! `ElementHandle` only ever names a node that already exists in the chain
//! (it is the address of that node, minted at insertion time), so unlike
//! the caller-managed `void *` identity of the implementation this was
//! adapted from, a transaction has no handle to give for an element it has
//! only buffered for insertion. `remove`/`ins_after` therefore only ever
//! resolve against elements already visible in the list — a buffered insert
//! can't be used as another buffered op's target within the same
//! transaction. See `DESIGN.md`.

use std::cell::RefCell;
use std::sync::atomic::Ordering;

use crate::handle::ElementHandle;
use crate::list::ConcurrentList;
use crate::node::visible;

enum BufferedInsert<T> {
    Head(T),
    Tail(T),
    After(ElementHandle<T>, T),
}

struct Buffers<T> {
    inserts: Vec<BufferedInsert<T>>,
    removed: Vec<ElementHandle<T>>,
}

/// A buffered transaction against a `ConcurrentList`. Must be finished with
/// `commit` or `rollback`; both consume `self`, so the "committed or rolled
/// back twice" misuse the implementation this was adapted from had to guard
/// against at runtime is unrepresentable here — there is no handle left to
/// misuse.
pub struct Transaction<'a, T> {
    list: &'a ConcurrentList<T>,
    snapshot: u64,
    buffers: RefCell<Buffers<T>>,
}

impl<'a, T> Transaction<'a, T> {
    pub(crate) fn new(list: &'a ConcurrentList<T>) -> Self {
        let snapshot = list.commit_id.load(Ordering::Acquire);
        list.registry.publish_snapshot(snapshot);
        Transaction {
            list,
            snapshot,
            buffers: RefCell::new(Buffers {
                inserts: Vec::new(),
                removed: Vec::new(),
            }),
        }
    }

    /// Buffers `elm` to be inserted at the head on commit. The most
    /// recently buffered head-insert ends up leftmost.
    pub fn ins_head(&self, elm: T) {
        self.buffers
            .borrow_mut()
            .inserts
            .push(BufferedInsert::Head(elm));
    }

    /// Buffers `elm` to be inserted at the tail on commit, in call order.
    pub fn ins_tail(&self, elm: T) {
        self.buffers
            .borrow_mut()
            .inserts
            .push(BufferedInsert::Tail(elm));
    }

    /// Buffers `elm` to be inserted immediately after `anchor` on commit.
    /// Multiple buffered inserts after the same anchor, in the same
    /// transaction, land in call order immediately following one another
    /// (each one's effective anchor becomes the previous one), not all
    /// directly after `anchor` itself.
    pub fn ins_after(&self, anchor: ElementHandle<T>, elm: T) {
        self.buffers
            .borrow_mut()
            .inserts
            .push(BufferedInsert::After(anchor, elm));
    }

    /// Buffers `handle` to be removed on commit, if it currently names a
    /// node visible at this transaction's snapshot. A no-op otherwise.
    pub fn remove(&self, handle: ElementHandle<T>) {
        if visible_in_list(self.list, self.snapshot, handle) {
            self.buffers.borrow_mut().removed.push(handle);
        }
    }

    /// True if `handle` would be visible in this transaction's view: either
    /// buffered for insertion after that very handle (never true — only
    /// real, already-inserted elements are handles) or present in the list
    /// as of this transaction's snapshot and not buffered for removal.
    pub fn contains(&self, handle: ElementHandle<T>) -> bool {
        let buffers = self.buffers.borrow();
        if buffers.removed.contains(&handle) {
            return false;
        }
        visible_in_list(self.list, self.snapshot, handle)
    }

    /// Visits every element in this transaction's view, in the order it
    /// would appear after commit: buffered head-inserts (most recent
    /// first), then the snapshot (with buffered after-anchor inserts
    /// interleaved immediately after their anchor, and buffered removes
    /// skipped), then buffered tail-inserts in call order.
    pub fn for_each<F: FnMut(&T)>(&self, mut f: F) {
        let buffers = self.buffers.borrow();
        for ins in buffers.inserts.iter().rev() {
            if let BufferedInsert::Head(elm) = ins {
                f(elm);
            }
        }
        let mut curr = self.list.head.load(Ordering::Acquire);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if visible(node, self.snapshot) {
                let handle = ElementHandle::new(curr);
                if !buffers.removed.contains(&handle) {
                    f(&node.elm);
                    for ins in buffers.inserts.iter() {
                        if let BufferedInsert::After(anchor, elm) = ins {
                            if *anchor == handle {
                                f(elm);
                            }
                        }
                    }
                }
            }
            curr = node.next.load(Ordering::Acquire);
        }
        for ins in buffers.inserts.iter() {
            if let BufferedInsert::Tail(elm) = ins {
                f(elm);
            }
        }
    }

    /// Applies every buffered insert and remove under one freshly allocated
    /// commit id, then reclaims any node whose removal is no longer visible
    /// to any remaining active transaction.
    pub fn commit(self) {
        let buffers = self.buffers.into_inner();
        let c = self.list.commit_id.fetch_add(1, Ordering::AcqRel);

        for handle in &buffers.removed {
            self.list.stamp_removed(*handle, c);
        }

        let mut last_for_anchor: Vec<(ElementHandle<T>, ElementHandle<T>)> = Vec::new();
        let mut tails = Vec::new();
        let mut heads = Vec::new();
        for ins in buffers.inserts {
            match ins {
                BufferedInsert::After(anchor, elm) => {
                    let effective = last_for_anchor
                        .iter()
                        .find(|(a, _)| *a == anchor)
                        .map(|(_, last)| *last)
                        .unwrap_or(anchor);
                    if let Some(new_handle) = self.list.insert_after(effective, elm) {
                        match last_for_anchor.iter_mut().find(|(a, _)| *a == anchor) {
                            Some(entry) => entry.1 = new_handle,
                            None => last_for_anchor.push((anchor, new_handle)),
                        }
                    }
                }
                BufferedInsert::Tail(elm) => tails.push(elm),
                BufferedInsert::Head(elm) => heads.push(elm),
            }
        }
        for elm in tails {
            self.list.insert_tail(elm);
        }
        for elm in heads.into_iter().rev() {
            self.list.insert_head(elm);
        }

        self.list.registry.clear_snapshot();
        self.list.reclaim();
    }

    /// Discards every buffered insert and remove; the list is left exactly
    /// as it was before the transaction began. Elements only ever buffered
    /// here, never inserted, are dropped along with the transaction.
    pub fn rollback(self) {
        self.list.registry.clear_snapshot();
    }
}

fn visible_in_list<T>(list: &ConcurrentList<T>, snapshot: u64, handle: ElementHandle<T>) -> bool {
    let mut curr = list.head.load(Ordering::Acquire);
    while !curr.is_null() {
        let node = unsafe { &*curr };
        if (curr as *const _) == handle.addr {
            return visible(node, snapshot);
        }
        curr = node.next.load(Ordering::Acquire);
    }
    false
}
