//! Snapshot iteration over a `ConcurrentList`.

use std::sync::atomic::Ordering;

use crate::list::ConcurrentList;
use crate::node::{visible, Node};

/// Yields references to the elements visible at the commit id in effect
/// when the iterator was created. Concurrent inserts and removes by other
/// threads never change what this iterator yields, even mid-traversal.
pub struct ListIter<'a, T> {
    // Held only to tie `'a` to the list's borrow — nothing outlives the
    // list while an iterator over it is alive. Never read after
    // construction; `cur` is a raw pointer so the borrow checker would
    // otherwise see nothing keeping the list's nodes reachable.
    #[allow(dead_code)]
    list: &'a ConcurrentList<T>,
    snapshot: u64,
    cur: *const Node<T>,
}

impl<'a, T> ListIter<'a, T> {
    pub(crate) fn new(list: &'a ConcurrentList<T>) -> Self {
        let snapshot = list.commit_id.load(Ordering::Acquire);
        let mut cur = list.head.load(Ordering::Acquire) as *const Node<T>;
        while !cur.is_null() && !visible(unsafe { &*cur }, snapshot) {
            cur = unsafe { (*cur).next.load(Ordering::Acquire) };
        }
        ListIter { list, snapshot, cur }
    }
}

impl<'a, T> Iterator for ListIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.cur.is_null() {
            return None;
        }
        let node = unsafe { &*self.cur };
        let item = &*node.elm;
        let mut next = node.next.load(Ordering::Acquire);
        while !next.is_null() && !visible(unsafe { &*next }, self.snapshot) {
            next = unsafe { (*next).next.load(Ordering::Acquire) };
        }
        self.cur = next;
        Some(item)
    }
}
