use std::alloc::{Layout, alloc, dealloc};
use std::any::type_name;
use std::fmt;
use std::mem::MaybeUninit;
use std::num::NonZero;
use std::ptr::NonNull;

use num_integer::Integer;

/// Occupancy tag stored in every slot.
///
/// The valid values are distinctive bit patterns rather than a boolean, so that stomped
/// or uninitialized memory is very unlikely to pass for a valid slot by coincidence.
#[derive(Clone, Copy, Eq, PartialEq)]
pub(crate) struct SlotState(u32);

impl SlotState {
    /// The slot is on loan to a caller.
    pub(crate) const ALLOCATED: Self = Self(0xA110_CAED);

    /// The slot is linked into the free list.
    pub(crate) const FREE: Self = Self(0xDEA1_10CA);

    /// The slot has been taken back from its caller and its value is being dropped. It is
    /// neither on loan nor linked into the free list.
    pub(crate) const RELEASING: Self = Self(0x0DE1_1E7E);
}

impl fmt::Debug for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ALLOCATED => write!(f, "Allocated"),
            Self::FREE => write!(f, "Free"),
            Self::RELEASING => write!(f, "Releasing"),
            Self(other) => write!(f, "Garbled({other:#010X})"),
        }
    }
}

/// One unit of pool storage: the value payload followed by the bookkeeping fields.
///
/// The payload is the first field of a `#[repr(C)]` struct, so a pointer to the payload and a
/// pointer to the slot have the same address and can be converted into each other.
///
/// The bookkeeping fields are only ever accessed through raw pointers. Callers hold pointers
/// into the payload while the slot is on loan and we must not create references that overlap
/// with whatever they are doing there.
#[repr(C)]
pub(crate) struct Slot<T> {
    #[allow(
        dead_code,
        reason = "only accessed through the pointers handed out by the pool"
    )]
    value: MaybeUninit<T>,
    state: SlotState,
    next_free: Option<NonNull<Slot<T>>>,
}

impl<T> Slot<T> {
    #[must_use]
    pub(crate) fn value_ptr(slot: NonNull<Self>) -> NonNull<T> {
        slot.cast()
    }

    #[must_use]
    pub(crate) fn from_value_ptr(value: NonNull<T>) -> NonNull<Self> {
        value.cast()
    }

    /// # Safety
    ///
    /// `slot` must point to an initialized slot inside a live chunk.
    #[must_use]
    pub(crate) unsafe fn state(slot: NonNull<Self>) -> SlotState {
        // SAFETY: Forwarding guarantees from caller, the slot is valid for reads.
        let state = unsafe { &raw const (*slot.as_ptr()).state };

        // SAFETY: Every slot has its state written in `Chunk::try_new()`.
        unsafe { state.read() }
    }

    /// # Safety
    ///
    /// `slot` must point to an initialized slot inside a live chunk and the caller must hold
    /// the lock of the pool that owns the chunk.
    pub(crate) unsafe fn set_state(slot: NonNull<Self>, state: SlotState) {
        // SAFETY: Forwarding guarantees from caller, the slot is valid for writes.
        let target = unsafe { &raw mut (*slot.as_ptr()).state };

        // SAFETY: The field is properly aligned and within the slot.
        unsafe { target.write(state) };
    }

    /// # Safety
    ///
    /// Same as [`Self::state()`].
    #[must_use]
    pub(crate) unsafe fn next_free(slot: NonNull<Self>) -> Option<NonNull<Self>> {
        // SAFETY: Forwarding guarantees from caller, the slot is valid for reads.
        let next = unsafe { &raw const (*slot.as_ptr()).next_free };

        // SAFETY: Every slot has its link written in `Chunk::try_new()`.
        unsafe { next.read() }
    }

    /// # Safety
    ///
    /// Same as [`Self::set_state()`].
    pub(crate) unsafe fn set_next_free(slot: NonNull<Self>, next: Option<NonNull<Self>>) {
        // SAFETY: Forwarding guarantees from caller, the slot is valid for writes.
        let target = unsafe { &raw mut (*slot.as_ptr()).next_free };

        // SAFETY: The field is properly aligned and within the slot.
        unsafe { target.write(next) };
    }
}

/// A contiguous, heap-allocated array of slots that is the unit of pool growth.
///
/// A chunk never moves, shrinks or frees individual slots. Its memory is returned to the heap
/// only when the chunk itself is dropped, which does not run the destructors of any values
/// still stored in it.
pub(crate) struct Chunk<T> {
    first_slot: NonNull<Slot<T>>,
    slot_count: NonZero<usize>,
}

impl<T> Chunk<T> {
    /// Allocates a chunk with every slot tagged as free and unlinked.
    ///
    /// Returns `None` if the heap cannot supply the memory or if the requested size cannot be
    /// expressed as a memory layout at all.
    #[must_use]
    pub(crate) fn try_new(slot_count: NonZero<usize>) -> Option<Self> {
        let layout = Self::layout(slot_count)?;

        // SAFETY: The layout is valid and non-zero-sized because a slot always contains at
        // least its state tag and the slot count is non-zero.
        let first_slot = NonNull::new(unsafe { alloc(layout) })?.cast::<Slot<T>>();

        for index in 0..slot_count.get() {
            // SAFETY: The index is within the array we just allocated.
            let slot = unsafe { first_slot.add(index) };

            // SAFETY: The pointer is valid for writes and properly aligned for `Slot<T>`.
            unsafe {
                slot.write(Slot {
                    value: MaybeUninit::uninit(),
                    state: SlotState::FREE,
                    next_free: None,
                });
            }
        }

        Some(Self {
            first_slot,
            slot_count,
        })
    }

    #[must_use]
    fn layout(slot_count: NonZero<usize>) -> Option<Layout> {
        Layout::array::<Slot<T>>(slot_count.get()).ok()
    }

    #[must_use]
    pub(crate) fn slot_count(&self) -> NonZero<usize> {
        self.slot_count
    }

    /// Iterates over all slots of the chunk in address order.
    pub(crate) fn slots(&self) -> impl Iterator<Item = NonNull<Slot<T>>> + '_ {
        (0..self.slot_count.get()).map(|index| {
            // SAFETY: The range keeps the index within the chunk.
            unsafe { self.first_slot.add(index) }
        })
    }

    /// Returns the index of the slot at `slot`, if that address is the start of one of the
    /// slots of this chunk.
    ///
    /// This only compares addresses and never reads through the pointer, so it is valid to
    /// call with any pointer whatsoever.
    #[must_use]
    pub(crate) fn index_of(&self, slot: NonNull<Slot<T>>) -> Option<usize> {
        let offset = slot.addr().get().checked_sub(self.first_slot.addr().get())?;

        let (index, misalignment) = offset.div_rem(&size_of::<Slot<T>>());

        (misalignment == 0 && index < self.slot_count.get()).then_some(index)
    }
}

impl<T> fmt::Debug for Chunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("first_slot", &self.first_slot)
            .field("slot_count", &self.slot_count)
            .finish()
    }
}

impl<T> Drop for Chunk<T> {
    fn drop(&mut self) {
        let layout = Self::layout(self.slot_count)
            .expect("the layout was already calculated successfully when the chunk was allocated");

        // SAFETY: The memory was allocated in `try_new()` with the same layout.
        unsafe {
            dealloc(self.first_slot.as_ptr().cast(), layout);
        }
    }
}

// SAFETY: The chunk owns its memory exclusively. Moving it to another thread is fine as long
// as the values that may be stored in it can move between threads.
unsafe impl<T: Send> Send for Chunk<T> {}
