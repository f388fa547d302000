/*
 * Thread Lists
 *
 * Records live in a ThreadArena and are addressed by stable handles. A
 * ThreadList is a doubly-linked list threaded through the records' own
 * `prev`/`next` handles, so moving a record between lists never moves the
 * record itself.
 *
 * Invariants:
 * - `len` equals the number of records reachable from `head`
 * - `head` and `tail` are both `None` exactly when `len` is 0
 * - a record is in at most one list; its linkage is `None` when unlisted
 *
 * Lookups by identifier are linear. Thread counts are small, so this is
 * fine.
 */

use alloc::vec::Vec;
use core::time::Duration;

use super::{
    thread::{ThreadFlags, ThreadId, ThreadRecord},
    types::Priority,
};

/// Stable index of a record in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Storage for every record the scheduler owns
#[derive(Debug, Default)]
pub struct ThreadArena {
    slots: Vec<Option<ThreadRecord>>,
    free: Vec<usize>,
}

impl ThreadArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record and return its handle, reusing a freed slot if any
    pub fn insert(&mut self, record: ThreadRecord) -> Handle {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(record);
                Handle(index)
            }
            None => {
                self.slots.push(Some(record));
                Handle(self.slots.len() - 1)
            }
        }
    }

    /// Take a record out of the arena
    ///
    /// # Panics
    /// Panics if the handle is stale or the record is still linked.
    pub fn remove(&mut self, handle: Handle) -> ThreadRecord {
        let record = self.slots[handle.0]
            .take()
            .unwrap_or_else(|| contract_violation("removing a stale handle from the arena"));
        if record.is_linked() {
            contract_violation("removing a record that is still linked into a list");
        }
        self.free.push(handle.0);
        record
    }

    pub fn get(&self, handle: Handle) -> Option<&ThreadRecord> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut ThreadRecord> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every live record with its handle
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &ThreadRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|r| (Handle(i), r)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut ThreadRecord)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|r| (Handle(i), r)))
    }
}

impl core::ops::Index<Handle> for ThreadArena {
    type Output = ThreadRecord;

    fn index(&self, handle: Handle) -> &ThreadRecord {
        self.get(handle)
            .unwrap_or_else(|| contract_violation("dereferencing a stale thread handle"))
    }
}

impl core::ops::IndexMut<Handle> for ThreadArena {
    fn index_mut(&mut self, handle: Handle) -> &mut ThreadRecord {
        self.get_mut(handle)
            .unwrap_or_else(|| contract_violation("dereferencing a stale thread handle"))
    }
}

/// Doubly-linked list of records, linked through the arena
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThreadList {
    head: Option<Handle>,
    tail: Option<Handle>,
    len: usize,
}

impl ThreadList {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<Handle> {
        self.head
    }

    pub fn tail(&self) -> Option<Handle> {
        self.tail
    }

    /// Append at the tail
    ///
    /// # Panics
    /// Panics if the record is already linked somewhere. A record that was
    /// not cleaned on removal is a logic bug, not a runtime condition.
    pub fn add(&mut self, arena: &mut ThreadArena, handle: Handle) {
        ensure_unlinked(arena, handle);
        match self.tail {
            None => {
                self.head = Some(handle);
                self.tail = Some(handle);
            }
            Some(tail) => {
                arena[tail].next = Some(handle);
                arena[handle].prev = Some(tail);
                self.tail = Some(handle);
            }
        }
        arena[handle].listed = true;
        self.len += 1;
    }

    /// Insert at the head
    ///
    /// # Panics
    /// Same contract as [`ThreadList::add`].
    pub fn prepend(&mut self, arena: &mut ThreadArena, handle: Handle) {
        ensure_unlinked(arena, handle);
        match self.head {
            None => {
                self.head = Some(handle);
                self.tail = Some(handle);
            }
            Some(head) => {
                arena[head].prev = Some(handle);
                arena[handle].next = Some(head);
                self.head = Some(handle);
            }
        }
        arena[handle].listed = true;
        self.len += 1;
    }

    /// Unlink a record. The caller guarantees it is a member of this list.
    pub fn remove(&mut self, arena: &mut ThreadArena, handle: Handle) -> Handle {
        let (prev, next) = {
            let record = &arena[handle];
            (record.prev, record.next)
        };

        match prev {
            Some(p) => arena[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena[n].prev = prev,
            None => self.tail = prev,
        }

        let record = &mut arena[handle];
        record.prev = None;
        record.next = None;
        record.listed = false;
        self.len -= 1;
        handle
    }

    /// Remove and return the head
    pub fn pop(&mut self, arena: &mut ThreadArena) -> Option<Handle> {
        let head = self.head?;
        Some(self.remove(arena, head))
    }

    /// First record with identifier `id`
    pub fn find(&self, arena: &ThreadArena, id: ThreadId) -> Option<Handle> {
        self.iter(arena).find(|&h| arena[h].id == id)
    }

    /// Move the head to the tail and return it
    pub fn rotate(&mut self, arena: &mut ThreadArena) -> Option<Handle> {
        let head = self.pop(arena)?;
        self.add(arena, head);
        Some(head)
    }

    /// Walk the list from head to tail
    pub fn iter<'a>(&self, arena: &'a ThreadArena) -> ListIter<'a> {
        ListIter {
            arena,
            cursor: self.head,
        }
    }

    /// Record with the least accumulated time
    ///
    /// The tail is the initial candidate and the scan only replaces it on a
    /// strictly smaller time, so equal times resolve to the tail.
    pub fn min_total_time(&self, arena: &ThreadArena) -> Option<Handle> {
        let tail = self.tail?;
        let mut best = tail;
        let mut best_time: Duration = arena[tail].total_time;

        for handle in self.iter(arena).take_while(|&h| h != tail) {
            let time = arena[handle].total_time;
            if time < best_time {
                best_time = time;
                best = handle;
            }
        }
        Some(best)
    }

    /// Raise every record that went undispatched this epoch to `top`
    ///
    /// Raised records also lose their accumulated time. Afterwards every
    /// record's SCHEDULED flag is cleared, which opens the next epoch.
    pub fn boost_priority(&self, arena: &mut ThreadArena, top: Priority) -> usize {
        let mut boosted = 0;
        let mut cursor = self.head;
        while let Some(handle) = cursor {
            let record = &mut arena[handle];
            if !record.flags.contains(ThreadFlags::SCHEDULED) && record.priority != top {
                record.priority = top;
                record.total_time = Duration::ZERO;
                boosted += 1;
            }
            record.flags.remove(ThreadFlags::SCHEDULED);
            cursor = record.next;
        }
        boosted
    }

    /// First record at the highest priority present
    ///
    /// Returns as soon as a record at `top` is seen.
    pub fn select_highest_priority(&self, arena: &ThreadArena, top: Priority) -> Option<Handle> {
        let mut best = self.head?;
        let mut best_priority = arena[best].priority;

        for handle in self.iter(arena) {
            let priority = arena[handle].priority;
            if priority == top {
                return Some(handle);
            }
            if priority > best_priority {
                best_priority = priority;
                best = handle;
            }
        }
        Some(best)
    }
}

/// Iterator over the handles of a list
pub struct ListIter<'a> {
    arena: &'a ThreadArena,
    cursor: Option<Handle>,
}

impl Iterator for ListIter<'_> {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        let current = self.cursor?;
        self.cursor = self.arena[current].next;
        Some(current)
    }
}

fn ensure_unlinked(arena: &ThreadArena, handle: Handle) {
    let record = &arena[handle];
    if record.is_linked() {
        contract_violation("thread was not properly cleaned after being removed");
    }
}

/// Report a broken internal invariant and stop
#[track_caller]
pub(crate) fn contract_violation(what: &str) -> ! {
    log::error!("contract violation: {}", what);
    panic!("contract violation: {what}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(times: &[u64]) -> (ThreadArena, ThreadList) {
        let mut arena = ThreadArena::new();
        let mut list = ThreadList::new();
        for (i, &t) in times.iter().enumerate() {
            let mut record = ThreadRecord::new(ThreadId(i as i64), Priority(3));
            record.total_time = Duration::from_millis(t);
            let handle = arena.insert(record);
            list.add(&mut arena, handle);
        }
        (arena, list)
    }

    fn ids(list: &ThreadList, arena: &ThreadArena) -> Vec<i64> {
        list.iter(arena).map(|h| arena[h].id.0).collect()
    }

    #[test]
    fn add_then_find_returns_same_record() {
        let (arena, list) = arena_with(&[0, 0, 0]);
        let handle = list.find(&arena, ThreadId(1)).unwrap();
        assert_eq!(arena[handle].id, ThreadId(1));
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn remove_then_find_returns_none() {
        let (mut arena, mut list) = arena_with(&[0, 0, 0]);
        let middle = list.find(&arena, ThreadId(1)).unwrap();
        list.remove(&mut arena, middle);

        assert_eq!(list.find(&arena, ThreadId(1)), None);
        assert!(!arena[middle].is_linked());
        assert_eq!(ids(&list, &arena), vec![0, 2]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn removing_only_element_empties_list() {
        let (mut arena, mut list) = arena_with(&[0]);
        let only = list.head().unwrap();
        list.remove(&mut arena, only);
        assert!(list.is_empty());
        assert_eq!(list.head(), None);
        assert_eq!(list.tail(), None);
    }

    #[test]
    fn prepend_puts_record_at_head() {
        let (mut arena, mut list) = arena_with(&[0, 0]);
        let extra = arena.insert(ThreadRecord::new(ThreadId(9), Priority(3)));
        list.prepend(&mut arena, extra);
        assert_eq!(ids(&list, &arena), vec![9, 0, 1]);
        assert_eq!(list.pop(&mut arena), Some(extra));
    }

    #[test]
    fn rotate_cycles_in_insertion_order() {
        let (mut arena, mut list) = arena_with(&[0, 0, 0]);
        let visited: Vec<i64> = (0..6)
            .map(|_| {
                let handle = list.rotate(&mut arena).unwrap();
                arena[handle].id.0
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn rotate_on_empty_list_is_none() {
        let mut arena = ThreadArena::new();
        let mut list = ThreadList::new();
        assert_eq!(list.rotate(&mut arena), None);
        assert_eq!(list.pop(&mut arena), None);
    }

    #[test]
    #[should_panic(expected = "not properly cleaned")]
    fn adding_a_linked_record_is_fatal() {
        let (mut arena, mut list) = arena_with(&[0, 0]);
        let head = list.head().unwrap();
        list.add(&mut arena, head);
    }

    #[test]
    #[should_panic(expected = "not properly cleaned")]
    fn prepending_a_record_from_another_list_is_fatal() {
        let (mut arena, list) = arena_with(&[0, 0]);
        let mut other = ThreadList::new();
        let tail = list.tail().unwrap();
        other.prepend(&mut arena, tail);
    }

    #[test]
    fn min_total_time_picks_smallest() {
        let (arena, list) = arena_with(&[3, 1, 2]);
        let h = list.min_total_time(&arena).unwrap();
        assert_eq!(arena[h].id, ThreadId(1));
    }

    #[test]
    fn min_total_time_ties_go_to_tail() {
        let (arena, list) = arena_with(&[5, 5, 5]);
        let h = list.min_total_time(&arena).unwrap();
        assert_eq!(arena[h].id, ThreadId(2));
    }

    #[test]
    fn boost_skips_scheduled_and_top_records() {
        let (mut arena, list) = arena_with(&[7, 7, 7]);
        let handles: Vec<Handle> = list.iter(&arena).collect();
        arena[handles[0]].priority = Priority(1);
        arena[handles[1]].priority = Priority(0);
        arena[handles[1]].flags.insert(ThreadFlags::SCHEDULED);

        let boosted = list.boost_priority(&mut arena, Priority(3));

        assert_eq!(boosted, 1);
        assert_eq!(arena[handles[0]].priority, Priority(3));
        assert_eq!(arena[handles[0]].total_time, Duration::ZERO);
        assert_eq!(arena[handles[1]].priority, Priority(0));
        assert_eq!(arena[handles[1]].total_time, Duration::from_millis(7));
        assert_eq!(arena[handles[2]].total_time, Duration::from_millis(7));
        assert!(arena.iter().all(|(_, r)| !r.flags.contains(ThreadFlags::SCHEDULED)));
    }

    #[test]
    fn select_highest_prefers_first_at_max_level() {
        let (mut arena, list) = arena_with(&[0, 0, 0]);
        let handles: Vec<Handle> = list.iter(&arena).collect();
        arena[handles[0]].priority = Priority(0);
        arena[handles[1]].priority = Priority(2);
        arena[handles[2]].priority = Priority(2);

        let h = list.select_highest_priority(&arena, Priority(3)).unwrap();
        assert_eq!(h, handles[1]);

        arena[handles[2]].priority = Priority(3);
        let h = list.select_highest_priority(&arena, Priority(3)).unwrap();
        assert_eq!(h, handles[2]);
    }

    #[test]
    fn arena_reuses_freed_slots() {
        let mut arena = ThreadArena::new();
        let a = arena.insert(ThreadRecord::new(ThreadId(0), Priority(0)));
        let _b = arena.insert(ThreadRecord::new(ThreadId(1), Priority(0)));
        arena.remove(a);
        assert_eq!(arena.len(), 1);
        let c = arena.insert(ThreadRecord::new(ThreadId(2), Priority(0)));
        assert_eq!(c, a);
        assert_eq!(arena[c].id, ThreadId(2));
    }

    mod invariants {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Add(usize),
            Prepend(usize),
            Remove(usize),
            Pop,
            Rotate,
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..8usize).prop_map(Op::Add),
                (0..8usize).prop_map(Op::Prepend),
                (0..8usize).prop_map(Op::Remove),
                Just(Op::Pop),
                Just(Op::Rotate),
            ]
        }

        proptest! {
            #[test]
            fn size_matches_reachable_records(ops in proptest::collection::vec(op(), 0..64)) {
                let mut arena = ThreadArena::new();
                let handles: Vec<Handle> = (0..8)
                    .map(|i| arena.insert(ThreadRecord::new(ThreadId(i), Priority(0))))
                    .collect();
                let mut list = ThreadList::new();

                for op in ops {
                    match op {
                        Op::Add(i) if !arena[handles[i]].is_linked() => {
                            list.add(&mut arena, handles[i]);
                        }
                        Op::Prepend(i) if !arena[handles[i]].is_linked() => {
                            list.prepend(&mut arena, handles[i]);
                        }
                        Op::Remove(i) if list.find(&arena, ThreadId(i as i64)).is_some() => {
                            list.remove(&mut arena, handles[i]);
                        }
                        Op::Pop => {
                            list.pop(&mut arena);
                        }
                        Op::Rotate => {
                            list.rotate(&mut arena);
                        }
                        _ => {}
                    }

                    let reachable = list.iter(&arena).count();
                    prop_assert_eq!(reachable, list.len());
                    prop_assert_eq!(list.head().is_none(), list.is_empty());
                    prop_assert_eq!(list.tail().is_none(), list.is_empty());
                    for &h in &handles {
                        let member = list.iter(&arena).any(|m| m == h);
                        if !member {
                            prop_assert!(!arena[h].is_linked());
                        }
                    }
                }
            }
        }
    }
}
