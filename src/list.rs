//! The lock-free, singly-linked, versioned list itself.

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use crate::handle::ElementHandle;
use crate::iter::ListIter;
use crate::node::{visible, Node};
use crate::registry::{ThreadRegistry, MAX_THREADS};
use crate::transaction::Transaction;

/// Index into `retired_heads` shared by every thread that overflowed the
/// registry's per-thread slot table. A lock-free stack push is safe with any
/// number of concurrent producers, so sharing one slot among overflow
/// threads costs nothing beyond slightly more contention.
const OVERFLOW_SLOT: usize = MAX_THREADS;

/// A lock-free singly-linked sequence with multi-version snapshot isolation.
///
/// Readers and transactions see a consistent view of the list as of the
/// commit id in effect when they started, regardless of concurrent mutation
/// by other threads. See `Transaction` for buffered multi-step updates.
pub struct ConcurrentList<T> {
    pub(crate) head: AtomicPtr<Node<T>>,
    pub(crate) commit_id: AtomicU64,
    pub(crate) registry: ThreadRegistry,
    retired_heads: Box<[AtomicPtr<Node<T>>]>,
    reclaim_hook: Option<Arc<dyn Fn(T) + Send + Sync>>,
}

// SAFETY: elements move between threads through CAS-linked nodes exactly
// like `Mutex<T>`'s contents do; `T: Send` is the same bound `Mutex` needs to
// be `Sync`, and for the same reason.
unsafe impl<T: Send> Send for ConcurrentList<T> {}
unsafe impl<T: Send> Sync for ConcurrentList<T> {}

impl<T> Default for ConcurrentList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentList<T> {
    pub fn new() -> Self {
        ConcurrentList {
            head: AtomicPtr::new(ptr::null_mut()),
            commit_id: AtomicU64::new(1),
            registry: ThreadRegistry::new(),
            retired_heads: (0..=OVERFLOW_SLOT)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
            reclaim_hook: None,
        }
    }

    /// Like `new`, but `hook` is invoked exactly once for every element
    /// reclaimed via `remove_by_identity` or a committed transactional
    /// remove. Never invoked for `remove_head` (the element is handed back
    /// to the caller instead) or for elements buffered in a rolled-back
    /// transaction.
    pub fn with_reclaim_hook<F>(hook: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut list = Self::new();
        list.reclaim_hook = Some(Arc::new(hook));
        list
    }

    pub fn insert_head(&self, elm: T) -> ElementHandle<T> {
        let c = self.commit_id.fetch_add(1, Ordering::AcqRel);
        let node = Node::new_boxed(elm, c, ptr::null_mut());
        let mut old_head = self.head.load(Ordering::Acquire);
        loop {
            unsafe { (*node).next.store(old_head, Ordering::Release) };
            match self.head.compare_exchange_weak(
                old_head,
                node,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return ElementHandle::new(node),
                Err(actual) => old_head = actual,
            }
        }
    }

    pub fn insert_tail(&self, elm: T) -> ElementHandle<T> {
        let c = self.commit_id.fetch_add(1, Ordering::AcqRel);
        let node = Node::new_boxed(elm, c, ptr::null_mut());
        let handle = ElementHandle::new(node);
        loop {
            let head_val = self.head.load(Ordering::Acquire);
            if head_val.is_null() {
                if self
                    .head
                    .compare_exchange_weak(head_val, node, Ordering::Release, Ordering::Acquire)
                    .is_ok()
                {
                    return handle;
                }
                continue;
            }
            self.registry.hp_acquire(head_val);
            if self.head.load(Ordering::Acquire) != head_val {
                self.registry.hp_release();
                continue;
            }
            let mut prev = head_val;
            loop {
                let next_val = unsafe { (*prev).next.load(Ordering::Acquire) };
                if next_val.is_null() {
                    break;
                }
                self.registry.hp_acquire(next_val);
                prev = next_val;
            }
            let prev_next = unsafe { &(*prev).next };
            if prev_next
                .compare_exchange_weak(
                    ptr::null_mut(),
                    node,
                    Ordering::Release,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.registry.hp_release();
                return handle;
            }
            self.registry.hp_release();
        }
    }

    /// Inserts `elm` immediately after `anchor`, as of the current commit
    /// id. Returns `None` (and drops `elm`) if `anchor` is not visible in
    /// the list right now — it may have been removed or never have been a
    /// member of this list at all.
    pub fn insert_after(&self, anchor: ElementHandle<T>, elm: T) -> Option<ElementHandle<T>> {
        let s = self.commit_id.load(Ordering::Acquire);
        let c = self.commit_id.fetch_add(1, Ordering::AcqRel);
        let node = Node::new_boxed(elm, c, ptr::null_mut());
        let handle = ElementHandle::new(node);
        loop {
            let head_val = self.head.load(Ordering::Acquire);
            if head_val.is_null() {
                unsafe { drop(Box::from_raw(node)) };
                return None;
            }
            self.registry.hp_acquire(head_val);
            if self.head.load(Ordering::Acquire) != head_val {
                self.registry.hp_release();
                continue;
            }
            let mut curr = head_val;
            loop {
                let curr_ref = unsafe { &*curr };
                if (curr as *const Node<T>) == anchor.addr && visible(curr_ref, s) {
                    let old_next = curr_ref.next.load(Ordering::Acquire);
                    unsafe { (*node).next.store(old_next, Ordering::Release) };
                    if curr_ref
                        .next
                        .compare_exchange_weak(
                            old_next,
                            node,
                            Ordering::Release,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.registry.hp_release();
                        return Some(handle);
                    }
                    continue;
                }
                let next_val = curr_ref.next.load(Ordering::Acquire);
                if next_val.is_null() {
                    self.registry.hp_release();
                    unsafe { drop(Box::from_raw(node)) };
                    return None;
                }
                self.registry.hp_acquire_secondary(next_val);
                curr = next_val;
            }
        }
    }

    /// Removes and returns the first visible element, or `None` if the list
    /// has no visible element right now. Unlike `remove_by_identity`, this
    /// is a consuming pop: the element is handed back synchronously and the
    /// node's own memory is retired for the hazard-pointer reclaimer, not
    /// freed inline — see `SPEC_FULL.md` §4.10.
    pub fn remove_head(&self) -> Option<T> {
        let s = self.commit_id.load(Ordering::Acquire);
        'retry: loop {
            let head_val = self.head.load(Ordering::Acquire);
            if head_val.is_null() {
                return None;
            }
            self.registry.hp_acquire(head_val);
            if self.head.load(Ordering::Acquire) != head_val {
                self.registry.hp_release();
                continue 'retry;
            }
            let w = unsafe { &*head_val };
            if visible(w, s) {
                let next_val = w.next.load(Ordering::Acquire);
                if self
                    .head
                    .compare_exchange_weak(
                        head_val,
                        next_val,
                        Ordering::Release,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.registry.hp_release();
                    return Some(self.take_and_retire(head_val));
                }
                self.registry.hp_release();
                continue 'retry;
            }
            let mut prev = head_val;
            let mut curr = w.next.load(Ordering::Acquire);
            let mut cas_failed = false;
            while !curr.is_null() {
                self.registry.hp_acquire_secondary(curr);
                let curr_ref = unsafe { &*curr };
                if visible(curr_ref, s) {
                    let nxt = curr_ref.next.load(Ordering::Acquire);
                    let prev_next = unsafe { &(*prev).next };
                    if prev_next
                        .compare_exchange_weak(curr, nxt, Ordering::Release, Ordering::Acquire)
                        .is_ok()
                    {
                        self.registry.hp_release();
                        return Some(self.take_and_retire(curr));
                    }
                    cas_failed = true;
                    break;
                }
                prev = curr;
                curr = curr_ref.next.load(Ordering::Acquire);
            }
            self.registry.hp_release();
            if cas_failed {
                continue 'retry;
            }
            return None;
        }
    }

    /// Reads the element out of an already-unlinked node and pushes the node
    /// onto this thread's retired list. The node's memory is not touched
    /// again until a later `reclaim()` finds no hazard pointer on it.
    fn take_and_retire(&self, node: *mut Node<T>) -> T {
        let value = unsafe {
            let node_ref = &*node;
            let value = ptr::read(&*node_ref.elm);
            node_ref.value_taken.set(true);
            value
        };
        self.retire(node);
        value
    }

    /// Marks the element identified by `handle` as removed as of a freshly
    /// allocated commit id. The node stays in the chain (other readers at
    /// older snapshots still see it) until a later `reclaim()` physically
    /// unlinks and frees it. Returns `false` if `handle` does not currently
    /// name any node in the chain at all. Matches `list.c`'s `ll_remove_`:
    /// this does not check visibility, so calling it twice on the same
    /// already-removed handle re-stamps `removed_txn_id` and returns `true`
    /// again rather than `false`.
    pub fn remove_by_identity(&self, handle: ElementHandle<T>) -> bool {
        let c = self.commit_id.fetch_add(1, Ordering::AcqRel);
        let mut curr = self.head.load(Ordering::Acquire);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if (curr as *const Node<T>) == handle.addr {
                node.removed_txn_id.store(c, Ordering::Release);
                return true;
            }
            curr = node.next.load(Ordering::Acquire);
        }
        false
    }

    /// Stamps the node named by `handle` with `commit_id` directly, without
    /// allocating a new one. Used by `Transaction::commit` so every remove
    /// buffered in one transaction shares a single commit id.
    pub(crate) fn stamp_removed(&self, handle: ElementHandle<T>, commit_id: u64) {
        let mut curr = self.head.load(Ordering::Acquire);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if (curr as *const Node<T>) == handle.addr {
                node.removed_txn_id.store(commit_id, Ordering::Release);
                return;
            }
            curr = node.next.load(Ordering::Acquire);
        }
    }

    pub fn contains(&self, handle: ElementHandle<T>) -> bool {
        let s = self.commit_id.load(Ordering::Acquire);
        let mut curr = self.head.load(Ordering::Acquire);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if (curr as *const Node<T>) == handle.addr && visible(node, s) {
                return true;
            }
            curr = node.next.load(Ordering::Acquire);
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        let s = self.commit_id.load(Ordering::Acquire);
        let mut curr = self.head.load(Ordering::Acquire);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if visible(node, s) {
                return false;
            }
            curr = node.next.load(Ordering::Acquire);
        }
        true
    }

    pub fn size(&self) -> usize {
        let s = self.commit_id.load(Ordering::Acquire);
        let mut n = 0;
        let mut curr = self.head.load(Ordering::Acquire);
        while !curr.is_null() {
            let node = unsafe { &*curr };
            if visible(node, s) {
                n += 1;
            }
            curr = node.next.load(Ordering::Acquire);
        }
        n
    }

    /// A snapshot iterator as of the commit id in effect right now.
    pub fn iter(&self) -> ListIter<'_, T> {
        ListIter::new(self)
    }

    /// Starts a buffered transaction against the commit id in effect right
    /// now. See `Transaction` for the buffering/commit/rollback contract.
    pub fn begin_txn(&self) -> Transaction<'_, T> {
        Transaction::new(self)
    }

    fn retire(&self, node: *mut Node<T>) {
        let idx = self.registry.slot().unwrap_or(OVERFLOW_SLOT);
        let head = &self.retired_heads[idx];
        let mut old = head.load(Ordering::Acquire);
        loop {
            unsafe { (*node).next.store(old, Ordering::Release) };
            match head.compare_exchange_weak(old, node, Ordering::Release, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }

    /// Physically unlinks every node removed before the oldest snapshot any
    /// active transaction still holds, then frees every retired node no
    /// longer protected by a hazard pointer. Called at the end of a
    /// transaction commit; see `Transaction::commit`.
    pub(crate) fn reclaim(&self) {
        let min_active = self
            .registry
            .min_active_snapshot()
            .unwrap_or_else(|| self.commit_id.load(Ordering::Acquire));
        let mut prev: *mut Node<T> = ptr::null_mut();
        let mut curr = self.head.load(Ordering::Acquire);
        while !curr.is_null() {
            let curr_ref = unsafe { &*curr };
            let rid = curr_ref.removed_txn_id.load(Ordering::Acquire);
            let reclaimable = rid != 0 && rid < min_active;
            let next = curr_ref.next.load(Ordering::Acquire);
            if reclaimable {
                self.registry.hp_acquire(curr);
                let unlinked = if prev.is_null() {
                    self.head
                        .compare_exchange_weak(curr, next, Ordering::Release, Ordering::Acquire)
                        .is_ok()
                } else {
                    let prev_next = unsafe { &(*prev).next };
                    prev_next
                        .compare_exchange_weak(curr, next, Ordering::Release, Ordering::Acquire)
                        .is_ok()
                };
                if unlinked {
                    self.registry.hp_release();
                    self.retire(curr);
                    curr = next;
                    continue;
                }
                self.registry.hp_release();
            }
            prev = curr;
            curr = next;
        }
        self.drain_retired();
    }

    fn drain_retired(&self) {
        for slot in self.retired_heads.iter() {
            let mut still_held: *mut Node<T> = ptr::null_mut();
            let mut node = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            while !node.is_null() {
                let node_ref = unsafe { &*node };
                let next = node_ref.next.load(Ordering::Acquire);
                if self.registry.any_hp_equals(node) {
                    node_ref.next.store(still_held, Ordering::Release);
                    still_held = node;
                } else {
                    unsafe { self.drop_node(node) };
                }
                node = next;
            }
            if !still_held.is_null() {
                let tail = retired_tail(still_held);
                let mut old = slot.load(Ordering::Acquire);
                loop {
                    unsafe { (*tail).next.store(old, Ordering::Release) };
                    match slot.compare_exchange_weak(
                        old,
                        still_held,
                        Ordering::Release,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => old = actual,
                    }
                }
            }
        }
    }

    /// Frees a retired node. If `remove_head` already moved the element out
    /// of it, only the node's own allocation is freed; otherwise the
    /// element is handed to the reclaim hook, if any.
    unsafe fn drop_node(&self, node: *mut Node<T>) {
        let mut boxed = Box::from_raw(node);
        if !boxed.value_taken.get() {
            let value = ManuallyDrop::take(&mut boxed.elm);
            drop(boxed);
            if let Some(hook) = &self.reclaim_hook {
                hook(value);
            } else {
                drop(value);
            }
        }
    }
}

fn retired_tail<T>(mut node: *mut Node<T>) -> *mut Node<T> {
    loop {
        let next = unsafe { (*node).next.load(Ordering::Acquire) };
        if next.is_null() {
            return node;
        }
        node = next;
    }
}

impl<T> Drop for ConcurrentList<T> {
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let mut boxed = unsafe { Box::from_raw(curr) };
            curr = *boxed.next.get_mut();
            if !boxed.value_taken.get() {
                unsafe { ManuallyDrop::drop(&mut boxed.elm) };
            }
        }
        for slot in self.retired_heads.iter_mut() {
            let mut node = *slot.get_mut();
            while !node.is_null() {
                let mut boxed = unsafe { Box::from_raw(node) };
                node = *boxed.next.get_mut();
                if !boxed.value_taken.get() {
                    unsafe { ManuallyDrop::drop(&mut boxed.elm) };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_head_reverses_order() {
        let list = ConcurrentList::new();
        list.insert_head(1);
        list.insert_head(2);
        list.insert_head(3);
        let values: Vec<_> = list.iter().copied().collect();
        assert_eq!(values, vec![3, 2, 1]);
    }

    #[test]
    fn insert_tail_preserves_order() {
        let list = ConcurrentList::new();
        list.insert_tail(1);
        list.insert_tail(2);
        list.insert_tail(3);
        let values: Vec<_> = list.iter().copied().collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn insert_after_places_immediately_following_anchor() {
        let list = ConcurrentList::new();
        let a = list.insert_tail("a");
        list.insert_tail("b");
        list.insert_tail("c");
        list.insert_after(a, "m");
        let values: Vec<_> = list.iter().copied().collect();
        assert_eq!(values, vec!["a", "m", "b", "c"]);
    }

    #[test]
    fn remove_head_pops_in_order() {
        let list = ConcurrentList::new();
        list.insert_tail(1);
        list.insert_tail(2);
        assert_eq!(list.remove_head(), Some(1));
        assert_eq!(list.remove_head(), Some(2));
        assert_eq!(list.remove_head(), None);
    }

    #[test]
    fn remove_by_identity_hides_element_from_future_reads() {
        let list = ConcurrentList::new();
        let a = list.insert_tail("a");
        list.insert_tail("b");
        assert!(list.remove_by_identity(a));
        assert!(!list.contains(a));
        let values: Vec<_> = list.iter().copied().collect();
        assert_eq!(values, vec!["b"]);
    }

    #[test]
    fn size_and_is_empty_reflect_visible_elements_only() {
        let list = ConcurrentList::new();
        assert!(list.is_empty());
        let a = list.insert_tail(1);
        list.insert_tail(2);
        assert_eq!(list.size(), 2);
        list.remove_by_identity(a);
        assert_eq!(list.size(), 1);
    }

    #[test]
    fn reclaim_hook_runs_for_committed_removes_not_for_pop() {
        use std::sync::atomic::AtomicUsize;
        let reclaimed = Arc::new(AtomicUsize::new(0));
        let reclaimed2 = Arc::clone(&reclaimed);
        let list = ConcurrentList::with_reclaim_hook(move |_: i32| {
            reclaimed2.fetch_add(1, Ordering::SeqCst);
        });
        list.insert_tail(1);
        let b = list.insert_tail(2);
        assert_eq!(list.remove_head(), Some(1));
        assert_eq!(reclaimed.load(Ordering::SeqCst), 0);

        let txn = list.begin_txn();
        txn.remove(b);
        txn.commit();
        assert_eq!(reclaimed.load(Ordering::SeqCst), 1);
    }
}
