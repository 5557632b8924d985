use std::ptr::NonNull;

use crate::{Slot, SlotState};

/// Intrusive FIFO queue of free slots, threaded through the `next_free` field of the slots
/// themselves. Slots may come from any number of chunks.
///
/// The queue also owns the state tag of its members: pushing tags a slot as free and popping
/// tags it as allocated. A slot is therefore tagged free exactly while it is linked here.
#[derive(Debug)]
pub(crate) struct FreeList<T> {
    head: Option<NonNull<Slot<T>>>,
    tail: Option<NonNull<Slot<T>>>,
    len: usize,
}

impl<T> FreeList<T> {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Links a slot onto the tail of the queue and tags it as free.
    ///
    /// # Safety
    ///
    /// The slot must be inside a chunk that outlives its membership in this list, must not
    /// currently be linked into any free list and must not be accessed by anyone else while
    /// it is linked.
    pub(crate) unsafe fn push_back(&mut self, slot: NonNull<Slot<T>>) {
        // SAFETY: Forwarding guarantees from caller.
        unsafe {
            Slot::set_next_free(slot, None);
        }

        // SAFETY: Forwarding guarantees from caller.
        unsafe {
            Slot::set_state(slot, SlotState::FREE);
        }

        match self.tail {
            // SAFETY: Every member of the list satisfies the `push_back()` requirements.
            Some(tail) => unsafe { Slot::set_next_free(tail, Some(slot)) },
            None => self.head = Some(slot),
        }

        self.tail = Some(slot);

        self.len = self
            .len
            .checked_add(1)
            .expect("a free list longer than the address space cannot exist");
    }

    /// Unlinks the slot at the head of the queue and tags it as allocated.
    #[must_use]
    pub(crate) fn pop_front(&mut self) -> Option<NonNull<Slot<T>>> {
        let head = self.head?;

        // SAFETY: Every member of the list satisfies the `push_back()` requirements.
        self.head = unsafe { Slot::next_free(head) };

        if self.head.is_none() {
            self.tail = None;
        }

        // SAFETY: Every member of the list satisfies the `push_back()` requirements.
        unsafe {
            Slot::set_next_free(head, None);
        }

        // SAFETY: Every member of the list satisfies the `push_back()` requirements.
        unsafe {
            Slot::set_state(head, SlotState::ALLOCATED);
        }

        self.len = self
            .len
            .checked_sub(1)
            .expect("we just removed an item so the length must have been non-zero");

        Some(head)
    }

    /// Forgets all members without touching them. Used during teardown, right before the
    /// chunks holding the members are released.
    pub(crate) fn clear(&mut self) {
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Iterates over the members from head to tail.
    pub(crate) fn iter(&self) -> FreeListIter<'_, T> {
        FreeListIter {
            next: self.head,
            _list: self,
        }
    }
}

#[derive(Debug)]
pub(crate) struct FreeListIter<'a, T> {
    next: Option<NonNull<Slot<T>>>,

    // Borrowing the list prevents it from being modified while we walk it.
    _list: &'a FreeList<T>,
}

impl<T> Iterator for FreeListIter<'_, T> {
    type Item = NonNull<Slot<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;

        // SAFETY: Every member of the list satisfies the `push_back()` requirements.
        self.next = unsafe { Slot::next_free(current) };

        Some(current)
    }
}
