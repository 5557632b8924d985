use std::any::type_name;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use lock_api::{Mutex, RawMutex as RawMutexApi};
use scopeguard::ScopeGuard;
use tracing::{debug, warn};

use crate::{
    Chunk, DropPolicy, Error, FreeList, NoLock, RawMutex, Result, Slot, SlotPoolBuilder, SlotState,
};

/// Number of slots a pool allocates up front unless configured otherwise.
pub const DEFAULT_INITIAL_COUNT: usize = 32;

/// Number of slots a pool adds whenever it runs out, unless configured otherwise.
pub const DEFAULT_GROW_COUNT: usize = 4;

/// A growable pool of fixed-size slots, each able to hold one `T`.
///
/// The pool hands out pointers to slots via [`acquire()`][1] and takes them back via
/// [`release()`][2]. Both operations are O(1) apart from the ownership check on release,
/// which scans the (typically very short) list of chunks the pool has allocated.
///
/// Storage is allocated in chunks: one of `initial_count` slots when the pool is built and
/// another of `grow_count` slots every time an acquire finds no free slot. Chunks are never
/// released before the pool itself is dropped, so a pointer handed out by the pool remains
/// valid storage until it is released or the pool is dropped.
///
/// Free slots are reused in FIFO order: a released slot goes to the back of the free list and
/// acquires take from the front.
///
/// # Construction and destruction
///
/// [`acquire()`][1] and [`acquire_with()`][3] move a value into the slot and [`release()`][2]
/// drops it in place again. For raw storage that is initialized by other means, use
/// [`acquire_uninit()`][4] and [`release_uninit()`][5], which skip both steps.
///
/// # Release validation
///
/// Before taking a slot back, the pool verifies that the pointer points to the start of a
/// slot inside one of its own chunks and that the slot is currently on loan. Failing either
/// check means a double release, a pointer from elsewhere or memory corruption in the caller.
/// Continuing would corrupt the free list, so the pool panics instead.
///
/// # Thread safety
///
/// Every operation takes the pool's lock, of type `L`, for the duration of its free-list and
/// chunk-list work. Moving values into and out of slots happens outside the lock.
///
/// * With [`NoLock`] (the default) the pool can be moved between threads but not shared.
/// * With [`RawMutex`] (see [`SyncSlotPool`]) the pool can be shared between threads as long
///   as `T: Send`.
///
/// # Dropping
///
/// Dropping the pool releases all chunks. Values still on loan are abandoned without running
/// their destructors. See [`DropPolicy`] to turn that situation into a panic.
///
/// # Examples
///
/// ```
/// use slot_pool::SlotPool;
///
/// let pool = SlotPool::<String>::with_counts(16, 4).unwrap();
///
/// let greeting = pool.acquire("Hello".to_string()).unwrap();
///
/// // SAFETY: The pointer came from the pool and has not been released.
/// assert_eq!(unsafe { greeting.as_ref() }, "Hello");
///
/// // SAFETY: The pointer came from the pool, is released once and not used afterwards.
/// unsafe { pool.release(greeting) };
///
/// assert_eq!(pool.len(), 0);
/// ```
///
/// [1]: Self::acquire
/// [2]: Self::release
/// [3]: Self::acquire_with
/// [4]: Self::acquire_uninit
/// [5]: Self::release_uninit
pub struct SlotPool<T, L: RawMutexApi = NoLock> {
    core: Mutex<L, PoolCore<T>>,

    initial_count: NonZero<usize>,
    grow_count: NonZero<usize>,

    drop_policy: DropPolicy,
}

/// A [`SlotPool`] that can be shared between threads.
pub type SyncSlotPool<T> = SlotPool<T, RawMutex>;

impl<T, L: RawMutexApi> SlotPool<T, L> {
    /// Starts building a new [`SlotPool`].
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SyncSlotPool;
    ///
    /// let pool = SyncSlotPool::<u64>::builder()
    ///     .initial_count(128)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.capacity(), 128);
    /// ```
    pub fn builder() -> SlotPoolBuilder<T, L> {
        SlotPoolBuilder::new()
    }

    /// Creates a pool with `initial_count` slots that grows by `grow_count` slots at a time.
    ///
    /// If exactly one of the counts is zero, the other is used for both.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if both counts are zero.
    ///
    /// Returns [`Error::AllocationExhausted`] if the initial chunk cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let pool = SlotPool::<u32>::with_counts(0, 8).unwrap();
    /// assert_eq!(pool.initial_count(), 8);
    /// assert_eq!(pool.grow_count(), 8);
    ///
    /// assert!(SlotPool::<u32>::with_counts(0, 0).is_err());
    /// ```
    pub fn with_counts(initial_count: usize, grow_count: usize) -> Result<Self> {
        Self::builder()
            .initial_count(initial_count)
            .grow_count(grow_count)
            .build()
    }

    pub(crate) fn new_inner(
        initial_count: usize,
        grow_count: usize,
        drop_policy: DropPolicy,
    ) -> Result<Self> {
        let (initial_count, grow_count) = resolve_counts(initial_count, grow_count)?;

        let mut core = PoolCore::new();
        core.grow(initial_count)?;

        Ok(Self {
            core: Mutex::new(core),
            initial_count,
            grow_count,
            drop_policy,
        })
    }

    /// The number of slots the pool allocated when it was built.
    #[must_use]
    pub fn initial_count(&self) -> usize {
        self.initial_count.get()
    }

    /// The number of slots the pool adds each time it runs out of free slots.
    #[must_use]
    pub fn grow_count(&self) -> usize {
        self.grow_count.get()
    }

    /// The drop policy the pool was built with.
    #[must_use]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// The number of slots currently on loan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.lock().len()
    }

    /// Whether no slots are currently on loan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of free slots, i.e. how many acquires can succeed before the pool grows.
    #[must_use]
    pub fn available(&self) -> usize {
        self.core.lock().free.len()
    }

    /// The total number of slots across all chunks, whether free or on loan.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.lock().capacity
    }

    /// The number of chunks the pool has allocated so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.core.lock().chunks.len()
    }

    /// Whether `ptr` points to a slot of this pool that is currently on loan.
    ///
    /// This performs the same ownership check as [`release()`][1] but reports the outcome
    /// instead of panicking. The pointer is never dereferenced unless it lies within one of
    /// the pool's chunks, so any pointer may be passed.
    ///
    /// [1]: Self::release
    #[must_use]
    pub fn contains(&self, ptr: NonNull<T>) -> bool {
        matches!(
            self.core.lock().ownership(Slot::from_value_ptr(ptr)),
            Ownership::Loaned
        )
    }

    /// Moves `value` into a free slot and returns a pointer to it.
    ///
    /// The pool grows by [`grow_count()`][1] slots if no free slot is available.
    ///
    /// The pointer remains valid until it is passed to [`release()`][2] or the pool is
    /// dropped. The pool never creates references to the value, so the caller is free to
    /// create shared or exclusive references from the pointer as long as it upholds the
    /// usual aliasing rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationExhausted`] if the pool needed to grow but the heap could
    /// not supply the memory. The value is dropped in that case.
    ///
    /// [1]: Self::grow_count
    /// [2]: Self::release
    pub fn acquire(&self, value: T) -> Result<NonNull<T>> {
        self.acquire_with(|| value)
    }

    /// Constructs a value in a free slot via `f` and returns a pointer to it.
    ///
    /// The slot is reserved before `f` is called. If `f` panics, the slot is returned to the
    /// pool and the panic continues. `f` may itself use the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationExhausted`] if the pool needed to grow but the heap could
    /// not supply the memory. `f` is not called in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use slot_pool::SlotPool;
    ///
    /// let pool = SlotPool::<Vec<u8>>::with_counts(4, 4).unwrap();
    ///
    /// let buffer = pool.acquire_with(|| Vec::with_capacity(1024)).unwrap();
    ///
    /// // SAFETY: The pointer came from the pool and has not been released.
    /// assert!(unsafe { buffer.as_ref() }.capacity() >= 1024);
    ///
    /// // SAFETY: The pointer came from the pool, is released once and not used afterwards.
    /// unsafe { pool.release(buffer) };
    /// ```
    pub fn acquire_with(&self, f: impl FnOnce() -> T) -> Result<NonNull<T>> {
        let slot = self.take_slot()?;

        let slot = scopeguard::guard(slot, |slot| {
            // SAFETY: We took the slot from this pool above and never wrote into it.
            unsafe { self.return_slot(slot) };
        });

        let value = f();

        let value_ptr = Slot::value_ptr(ScopeGuard::into_inner(slot));

        // SAFETY: The slot is detached from the free list and tagged as allocated, so nobody
        // else can reach it. The storage is valid for writes and aligned for `T`.
        unsafe {
            value_ptr.write(value);
        }

        Ok(value_ptr)
    }

    /// Reserves a free slot without initializing it and returns a pointer to its storage.
    ///
    /// Use this for raw storage that the caller initializes (or never needs to initialize),
    /// and hand the pointer back via [`release_uninit()`][1], which does not drop anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationExhausted`] if the pool needed to grow but the heap could
    /// not supply the memory.
    ///
    /// [1]: Self::release_uninit
    pub fn acquire_uninit(&self) -> Result<NonNull<MaybeUninit<T>>> {
        let slot = self.take_slot()?;

        Ok(Slot::value_ptr(slot).cast())
    }

    /// Drops the value at `ptr` in place and returns its slot to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`acquire()`][1] or [`acquire_with()`][2] of this pool
    /// (or by [`acquire_uninit()`][3], after the caller initialized the value) and must not
    /// have been released since. No references to the value may exist and the pointer must
    /// not be used after this call.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point to a slot of this pool or if that slot is not on loan.
    /// This detects repeated release of the same pointer and release of pointers that were
    /// never handed out by this pool.
    ///
    /// [1]: Self::acquire
    /// [2]: Self::acquire_with
    /// [3]: Self::acquire_uninit
    pub unsafe fn release(&self, ptr: NonNull<T>) {
        let slot = Slot::from_value_ptr(ptr);

        if !mem::needs_drop::<T>() {
            // SAFETY: Forwarding guarantees from caller, there is nothing to drop.
            unsafe { self.release_slot(slot, "release") };
            return;
        }

        {
            let core = self.core.lock();
            let ownership = core.ownership(slot);

            if !matches!(ownership, Ownership::Loaned) {
                drop(core);
                report_violation::<T>("release", slot, ownership);
            }

            // From here on, another release of the same pointer fails the ownership check.
            // SAFETY: The slot is in one of our chunks and we hold the lock.
            unsafe { Slot::set_state(slot, SlotState::RELEASING) };
        }

        // The slot is neither loaned nor free while we drop the value, so no other thread can
        // receive it before we are done. Even if the drop panics, the slot goes back.
        let _return_slot = scopeguard::guard(slot, |slot| {
            // SAFETY: We retagged the slot above and nobody else can touch it now.
            unsafe { self.return_slot(slot) };
        });

        // SAFETY: The caller guarantees the value is initialized and not otherwise in use.
        unsafe {
            ptr.drop_in_place();
        }
    }

    /// Returns the slot at `ptr` to the pool without dropping anything.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by an acquire method of this pool and must not have been
    /// released since. No references into the slot may exist and the pointer must not be used
    /// after this call. Any value stored in the slot is abandoned without being dropped.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point to a slot of this pool or if that slot is not on loan.
    pub unsafe fn release_uninit(&self, ptr: NonNull<MaybeUninit<T>>) {
        // SAFETY: Forwarding guarantees from caller.
        unsafe { self.release_slot(Slot::from_value_ptr(ptr.cast()), "release_uninit") };
    }

    fn take_slot(&self) -> Result<NonNull<Slot<T>>> {
        let mut core = self.core.lock();

        if core.free.is_empty() {
            core.grow(self.grow_count)?;
        }

        Ok(core
            .free
            .pop_front()
            .expect("the free list cannot be empty right after growing"))
    }

    /// Validates the slot and links it back into the free list in one critical section.
    ///
    /// # Safety
    ///
    /// The caller must not use the slot after this call.
    unsafe fn release_slot(&self, slot: NonNull<Slot<T>>, operation: &str) {
        let mut core = self.core.lock();

        let ownership = core.ownership(slot);

        if matches!(ownership, Ownership::Loaned) {
            // SAFETY: We verified the slot belongs to one of our chunks and is not linked.
            unsafe { core.free.push_back(slot) };
            return;
        }

        drop(core);
        report_violation::<T>(operation, slot, ownership);
    }

    /// Links a slot that `release()` retagged as releasing back into the free list.
    ///
    /// # Safety
    ///
    /// The slot must be a slot of this pool tagged as releasing by this caller, and the caller
    /// must not touch it again.
    unsafe fn return_slot(&self, slot: NonNull<Slot<T>>) {
        let mut core = self.core.lock();

        // SAFETY: Forwarding guarantees from caller, the slot is in one of our chunks.
        let state = unsafe { Slot::state(slot) };

        assert_eq!(
            state,
            SlotState::RELEASING,
            "slot {slot:p} changed state while its value was being dropped in the pool of {}",
            type_name::<T>()
        );

        // SAFETY: Forwarding guarantees from caller, the slot is not linked.
        unsafe { core.free.push_back(slot) };
    }
}

impl<T, L: RawMutexApi> fmt::Debug for SlotPool<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();

        f.debug_struct("SlotPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("lock_type", &format_args!("{}", type_name::<L>()))
            .field("initial_count", &self.initial_count)
            .field("grow_count", &self.grow_count)
            .field("drop_policy", &self.drop_policy)
            .field("chunks", &core.chunks.len())
            .field("capacity", &core.capacity)
            .field("available", &core.free.len())
            .finish_non_exhaustive()
    }
}

impl<T, L: RawMutexApi> Drop for SlotPool<T, L> {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        let loaned = core.len();

        // Loaned values are abandoned. Their destructors are the caller's business.
        core.free.clear();
        core.chunks.clear();
        core.capacity = 0;

        if loaned > 0 {
            debug!(
                item_type = type_name::<T>(),
                loaned, "dropped a pool with slots still on loan"
            );
        }

        // We do this check at the end so we clean up the memory first. If we are already
        // panicking, we do not want to panic again because that would obscure the original.
        if self.drop_policy == DropPolicy::MustNotHaveItems && !thread::panicking() {
            assert!(
                loaned == 0,
                "dropped a pool of {} with {loaned} slots still on loan with a policy that says it must be empty when dropped",
                type_name::<T>()
            );
        }
    }
}

/// The state behind the pool's lock.
struct PoolCore<T> {
    /// Every chunk ever allocated, in allocation order. Only ever appended to.
    chunks: Vec<Chunk<T>>,

    free: FreeList<T>,

    /// Total slots across `chunks`, kept to avoid summing on every query.
    capacity: usize,
}

// SAFETY: The core owns the chunks and the free list only links slots inside those chunks.
// Nothing in here is tied to a particular thread as long as the stored values are not.
unsafe impl<T: Send> Send for PoolCore<T> {}

/// What a pointer handed to the pool on release turns out to be.
#[derive(Debug)]
enum Ownership {
    /// The start of one of our slots, currently on loan.
    Loaned,

    /// The start of one of our slots but in some other state, meaning a double release or a
    /// stomped tag.
    NotLoaned(SlotState),

    /// Not the start of any of our slots.
    Foreign,
}

impl<T> PoolCore<T> {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            free: FreeList::new(),
            capacity: 0,
        }
    }

    fn len(&self) -> usize {
        self.capacity
            .checked_sub(self.free.len())
            .expect("the free list cannot be longer than the total capacity")
    }

    /// Allocates one chunk of `slot_count` slots and links all of them into the free list.
    fn grow(&mut self, slot_count: NonZero<usize>) -> Result<()> {
        let Some(chunk) = Chunk::try_new(slot_count) else {
            warn!(
                item_type = type_name::<T>(),
                slot_count = slot_count.get(),
                "heap could not supply a new chunk"
            );

            return Err(Error::AllocationExhausted {
                slot_count: slot_count.get(),
                item_type: type_name::<T>(),
            });
        };

        self.chunks.push(chunk);

        let chunk = self
            .chunks
            .last()
            .expect("we just pushed a chunk so there must be a last one");

        for slot in chunk.slots() {
            // SAFETY: The chunk is owned by us and lives until the pool is dropped, at which
            // point the free list is cleared first. Fresh slots are unlinked.
            unsafe { self.free.push_back(slot) };
        }

        self.capacity = self
            .capacity
            .checked_add(slot_count.get())
            .expect("a pool cannot hold more slots than fit in virtual memory");

        debug!(
            item_type = type_name::<T>(),
            slot_count = slot_count.get(),
            capacity = self.capacity,
            chunks = self.chunks.len(),
            "pool allocated a chunk"
        );

        if cfg!(debug_assertions) {
            self.integrity_check();
        }

        Ok(())
    }

    /// Classifies a pointer. The state tag is only read once the address is known to be the
    /// start of a slot in one of our chunks, so any pointer may be passed.
    fn ownership(&self, slot: NonNull<Slot<T>>) -> Ownership {
        if !self
            .chunks
            .iter()
            .any(|chunk| chunk.index_of(slot).is_some())
        {
            return Ownership::Foreign;
        }

        // SAFETY: We just verified that this is the start of a slot in one of our chunks.
        match unsafe { Slot::state(slot) } {
            SlotState::ALLOCATED => Ownership::Loaned,
            other => Ownership::NotLoaned(other),
        }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    fn integrity_check(&self) {
        let total_slots: usize = self
            .chunks
            .iter()
            .map(|chunk| chunk.slot_count().get())
            .sum();

        assert_eq!(
            total_slots,
            self.capacity,
            "capacity does not match the chunks in pool of {}",
            type_name::<T>()
        );

        let mut free_tagged: usize = 0;

        for slot in self.chunks.iter().flat_map(Chunk::slots) {
            // SAFETY: The slot is inside one of our chunks.
            match unsafe { Slot::state(slot) } {
                SlotState::FREE => {
                    free_tagged = free_tagged
                        .checked_add(1)
                        .expect("guarded by capacity not overflowing");
                }
                SlotState::ALLOCATED | SlotState::RELEASING => {}
                other => panic!(
                    "slot {slot:p} has garbled state {other:?} in pool of {}",
                    type_name::<T>()
                ),
            }
        }

        let mut linked: usize = 0;

        for slot in self.free.iter() {
            assert!(
                self.chunks.iter().any(|chunk| chunk.index_of(slot).is_some()),
                "free list links {slot:p} which is outside every chunk of pool of {}",
                type_name::<T>()
            );

            // SAFETY: We just verified that the slot is inside one of our chunks.
            let state = unsafe { Slot::state(slot) };

            assert_eq!(
                state,
                SlotState::FREE,
                "free list links {slot:p} which is not tagged free in pool of {}",
                type_name::<T>()
            );

            linked = linked
                .checked_add(1)
                .expect("guarded by capacity not overflowing");
        }

        assert_eq!(
            linked,
            self.free.len(),
            "free list length is out of sync in pool of {}",
            type_name::<T>()
        );

        assert_eq!(
            free_tagged,
            linked,
            "slots tagged free and slots in the free list differ in pool of {}",
            type_name::<T>()
        );
    }
}

fn resolve_counts(
    initial_count: usize,
    grow_count: usize,
) -> Result<(NonZero<usize>, NonZero<usize>)> {
    match (NonZero::new(initial_count), NonZero::new(grow_count)) {
        (Some(initial), Some(grow)) => Ok((initial, grow)),
        (Some(only), None) | (None, Some(only)) => Ok((only, only)),
        (None, None) => Err(Error::ZeroCapacity),
    }
}

#[cold]
fn report_violation<T>(operation: &str, slot: NonNull<Slot<T>>, ownership: Ownership) -> ! {
    match ownership {
        Ownership::Foreign => panic!(
            "{operation}({slot:p}) was given a pointer that does not belong to any chunk of the pool of {}",
            type_name::<T>()
        ),
        Ownership::NotLoaned(state) => panic!(
            "{operation}({slot:p}) was given a slot that is not on loan (state {state:?}) in the pool of {}; it was released twice or the memory is corrupted",
            type_name::<T>()
        ),
        Ownership::Loaned => unreachable!("a loaned slot is not a violation"),
    }
}
