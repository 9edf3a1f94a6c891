//! Fixed-capacity memory a thread runs in.

use super::record::ExecutionRecord;
use super::TaskOutcome;
use crate::config::{MINIMAL_STACK_SIZE, STACK_GUARD_WORDS};
use crate::inplace_fn::{InplaceFn, WORD};
use crate::kernel::{Kernel, Priority, StackWord};
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;

/// Stack words, with the guard words at the low end a descending stack
/// overflows into.
#[repr(C)]
struct StackArea<const STACK: usize> {
    guard: [StackWord; STACK_GUARD_WORDS],
    words: [StackWord; STACK],
}

/// Stack, control block and closure memory for one thread at a time.
///
/// `STACK` is the usable stack in words, `FUNC` the capacity in bytes of the
/// bound closure. Storage is meant to be a `static`; a [`Thread`](super::Thread)
/// borrows it for as long as its task is registered, after which the same
/// storage can be bound again.
///
/// ```ignore
/// static WORKER: InplaceStorage<MyKernel, 256, 32> = InplaceStorage::new();
/// ```
pub struct InplaceStorage<K: Kernel, const STACK: usize = MINIMAL_STACK_SIZE, const FUNC: usize = WORD> {
    record: ExecutionRecord<K>,
    body: UnsafeCell<InplaceFn<(), FUNC>>,
    stack: UnsafeCell<StackArea<STACK>>,
}

// Safety: `body` and `stack` are only written while the record's claim is
// held and no task uses them; afterwards they belong to the task.
unsafe impl<K: Kernel, const STACK: usize, const FUNC: usize> Sync for InplaceStorage<K, STACK, FUNC> {}

impl<K: Kernel, const STACK: usize, const FUNC: usize> InplaceStorage<K, STACK, FUNC> {
    pub const fn new() -> Self {
        Self {
            record: ExecutionRecord::new(),
            body: UnsafeCell::new(InplaceFn::empty()),
            stack: UnsafeCell::new(StackArea { guard: [0; STACK_GUARD_WORDS], words: [0; STACK] }),
        }
    }

    /// Whether a task is currently registered on this storage.
    pub fn is_alive(&self) -> bool {
        self.record.is_alive()
    }

    /// Length of the stack span handed to the kernel, guard words included.
    pub const fn stack_words(&self) -> usize {
        STACK_GUARD_WORDS + STACK
    }

    pub(crate) fn record(&'static self) -> &'static ExecutionRecord<K> {
        &self.record
    }

    fn stack_span(&self) -> NonNull<[StackWord]> {
        // Safety: UnsafeCell::get never returns null.
        let base = unsafe { NonNull::new_unchecked(self.stack.get().cast::<StackWord>()) };
        NonNull::slice_from_raw_parts(base, self.stack_words())
    }

    /// Claim the record and install `f` as the body of its next activation.
    /// Returns the lease of that activation.
    ///
    /// Binding storage that still has a live task is a fatal assertion; the
    /// body slot is left untouched in that case.
    pub(crate) fn bind<F, R>(&'static self, priority: Priority, f: F) -> u32
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutcome,
    {
        let Some(lease) = self.record.claim() else {
            crate::assert::assert_failed(
                file!(),
                line!(),
                format_args!("inplace storage bound while its thread is alive"),
            )
        };

        let slot = BodySlot(self.body.get());
        // Safety: the claim is ours and no task is registered yet.
        unsafe {
            (*slot.0).set(move |()| f().report::<K>());
            self.record.prepare(self.stack_span(), priority, move |()| slot.run());
        }
        lease
    }
}

impl<K: Kernel, const STACK: usize, const FUNC: usize> Default for InplaceStorage<K, STACK, FUNC> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kernel, const STACK: usize, const FUNC: usize> fmt::Debug for InplaceStorage<K, STACK, FUNC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InplaceStorage")
            .field("stack_words", &self.stack_words())
            .field("closure_bytes", &FUNC)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Pointer to a storage's body slot, moved into the record's entry closure.
struct BodySlot<const FUNC: usize>(*mut InplaceFn<(), FUNC>);

// Safety: the slot lives in 'static storage and is only used by the task.
unsafe impl<const FUNC: usize> Send for BodySlot<FUNC> {}

impl<const FUNC: usize> BodySlot<FUNC> {
    fn run(self) {
        // Safety: only the task of the activation that filled the slot runs it.
        unsafe { (*self.0).call(()) };
    }
}
