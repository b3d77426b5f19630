//! End-to-end scenarios from the list's testable-properties plan.

use versioned_list::ConcurrentList;

#[test]
fn basic_ordering() {
    let list = ConcurrentList::new();
    list.insert_tail('a');
    list.insert_tail('b');
    list.insert_tail('c');

    let values: Vec<_> = list.iter().copied().collect();
    assert_eq!(values, vec!['a', 'b', 'c']);

    assert_eq!(list.remove_head(), Some('a'));
    assert_eq!(list.remove_head(), Some('b'));
    assert_eq!(list.remove_head(), Some('c'));
    assert!(list.is_empty());
}

#[test]
fn insert_after_anchor_and_orphan() {
    let list = ConcurrentList::new();
    let a = list.insert_tail("a");
    list.insert_tail("b");
    list.insert_tail("c");

    let orphan = list.insert_tail("orphan");
    assert!(list.remove_by_identity(orphan));

    assert!(list.insert_after(a, "m").is_some());
    assert_eq!(list.size(), 4);

    assert!(list.insert_after(orphan, "x").is_none());
    assert_eq!(list.size(), 4);

    let values: Vec<_> = list.iter().copied().collect();
    assert_eq!(values, vec!["a", "m", "b", "c"]);
}

#[test]
fn transaction_view_differs_from_list_until_commit() {
    let list = ConcurrentList::new();
    let one = list.insert_tail(1);
    let two = list.insert_tail(2);

    let txn = list.begin_txn();
    txn.ins_after(one, 42);
    txn.ins_tail(99);
    txn.remove(two);

    assert_eq!(list.size(), 2);
    let mut seen = Vec::new();
    txn.for_each(|v| seen.push(*v));
    assert_eq!(seen, vec![1, 42, 99]);

    txn.commit();

    assert_eq!(list.size(), 3);
    let values: Vec<_> = list.iter().copied().collect();
    assert_eq!(values, vec![1, 42, 99]);
}

#[test]
fn multiple_insert_after_same_anchor_land_in_call_order() {
    let list = ConcurrentList::new();
    let a = list.insert_tail('A');

    let txn = list.begin_txn();
    txn.ins_after(a, 'u');
    txn.ins_after(a, 'v');
    txn.commit();

    let values: Vec<_> = list.iter().copied().collect();
    assert_eq!(values, vec!['A', 'u', 'v']);
}

#[test]
fn rollback_discards_every_buffered_change() {
    let list = ConcurrentList::new();
    let a = list.insert_tail("a");

    let txn = list.begin_txn();
    txn.ins_tail("b");
    txn.remove(a);
    txn.rollback();

    assert_eq!(list.size(), 1);
    let values: Vec<_> = list.iter().copied().collect();
    assert_eq!(values, vec!["a"]);
}

#[test]
fn empty_transaction_commit_is_observationally_a_no_op() {
    let list = ConcurrentList::new();
    list.insert_tail(1);
    list.insert_tail(2);

    let before: Vec<_> = list.iter().copied().collect();
    let txn = list.begin_txn();
    txn.commit();
    let after: Vec<_> = list.iter().copied().collect();

    assert_eq!(before, after);
    assert_eq!(list.size(), 2);
}

#[test]
fn concurrent_mixed_head_and_tail_with_remove_head_drains_exactly() {
    use std::sync::Arc;
    use std::thread;

    const THREADS: usize = 6;
    const PER_THREAD: usize = 200;

    let list = Arc::new(ConcurrentList::new());
    let mut handles = Vec::new();
    for t in 0..THREADS {
        let list = Arc::clone(&list);
        handles.push(thread::spawn(move || {
            for k in 0..PER_THREAD {
                list.insert_head((t, k, "head"));
                list.insert_tail((t, k, "tail"));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(list.size(), THREADS * PER_THREAD * 2);

    let list2 = Arc::clone(&list);
    let popper = thread::spawn(move || {
        let mut count = 0;
        while list2.remove_head().is_some() {
            count += 1;
        }
        count
    });
    let popped = popper.join().unwrap();

    assert_eq!(popped, THREADS * PER_THREAD * 2);
    assert!(list.is_empty());
}
