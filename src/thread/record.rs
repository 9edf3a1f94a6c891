//! Per-thread execution record and the task trampoline.

use crate::inplace_fn::{InplaceFn, WORD};
use crate::kernel::{critical_section, Kernel, Priority, StackWord, TaskHandle};
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use portable_atomic::{AtomicU32, Ordering};

const ALIVE: u32 = 1;

/// Durable state of one thread slot. Lives inside an
/// [`InplaceStorage`](super::InplaceStorage) and is never moved.
///
/// `state` packs the liveness flag (bit 0) with an activation counter (the
/// upper bits). A lease is the state word a registration was created with, so
/// a handle whose task was killed can never mistake a later activation of the
/// same storage for its own.
///
/// Everything except `state` is written only while a claim is held and the
/// task does not exist yet; afterwards it is read-only.
pub(crate) struct ExecutionRecord<K: Kernel> {
    control_block: UnsafeCell<K::ControlBlock>,
    stack: UnsafeCell<Option<NonNull<[StackWord]>>>,
    entry: UnsafeCell<InplaceFn<(), WORD>>,
    state: AtomicU32,
    priority: AtomicU32,
}

// Safety: see the write discipline above; `state` is atomic and every
// transition of it happens inside a kernel critical section.
unsafe impl<K: Kernel> Sync for ExecutionRecord<K> {}
unsafe impl<K: Kernel> Send for ExecutionRecord<K> {}

impl<K: Kernel> ExecutionRecord<K> {
    pub(crate) const fn new() -> Self {
        Self {
            control_block: UnsafeCell::new(K::CONTROL_BLOCK_INIT),
            stack: UnsafeCell::new(None),
            entry: UnsafeCell::new(InplaceFn::empty()),
            state: AtomicU32::new(0),
            priority: AtomicU32::new(1),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state.load(Ordering::Acquire) & ALIVE != 0
    }

    /// Native handle of the live task, if it is the activation `lease` names.
    pub(crate) fn leased_handle(&self, lease: u32) -> Option<TaskHandle> {
        if self.state.load(Ordering::Acquire) == lease {
            Some(self.control_block_handle())
        } else {
            None
        }
    }

    fn control_block_handle(&self) -> TaskHandle {
        TaskHandle::of(&self.control_block)
    }

    /// Start a new activation. Returns its lease, or `None` if a task is
    /// still registered on this record.
    pub(crate) fn claim(&self) -> Option<u32> {
        critical_section::<K, _>(|| {
            let current = self.state.load(Ordering::Acquire);
            if current & ALIVE != 0 {
                return None;
            }
            let lease = (current & !ALIVE).wrapping_add(2) | ALIVE;
            self.state.store(lease, Ordering::Release);
            Some(lease)
        })
    }

    /// Reset the control block and install everything the task needs.
    ///
    /// # Safety
    ///
    /// The caller holds a fresh claim and has not registered the task yet.
    pub(crate) unsafe fn prepare<F>(&self, stack: NonNull<[StackWord]>, priority: Priority, entry: F)
    where
        F: FnOnce(()) + Send + 'static,
    {
        // Safety: nothing else touches these cells while the claim is unregistered.
        unsafe {
            ptr::write(self.control_block.get(), K::CONTROL_BLOCK_INIT);
            *self.stack.get() = Some(stack);
            (*self.entry.get()).set(entry);
        }
        self.priority.store(priority, Ordering::Relaxed);
    }

    /// Register the prepared task with the kernel.
    ///
    /// # Safety
    ///
    /// `self` must live for `'static` and have been prepared under the current claim.
    pub(crate) unsafe fn start(&'static self, name: &str) -> TaskHandle {
        // Safety: prepared by the caller; written before registration only.
        let stack = unsafe { *self.stack.get() };
        let Some(stack) = stack else {
            crate::assert::assert_failed(file!(), line!(), format_args!("thread record started without a stack"))
        };
        let priority = self.priority.load(Ordering::Relaxed);
        // Safety: the record is 'static, so the context pointer, stack and
        // control block outlive the task; the control block was just reset.
        let handle = unsafe {
            K::task_create(
                run_thread::<K>,
                name,
                stack,
                self as *const Self as *mut (),
                priority,
                NonNull::new_unchecked(self.control_block.get()),
            )
        };
        let expected = self.control_block_handle();
        crate::kernel_assert!(
            handle == Some(expected),
            "kernel registered task {:?} as {:?}, expected {:?}",
            name,
            handle,
            expected
        );
        tracing::debug!(task = name, priority, "thread registered");
        expected
    }

    /// End the activation `lease` names: delete its task and clear `alive`.
    /// Returns `false` if that activation was no longer alive.
    pub(crate) fn revoke(&self, lease: u32) -> bool {
        critical_section::<K, _>(|| {
            let Some(handle) = self.leased_handle(lease) else {
                return false;
            };
            // cleared first: deleting the calling task does not return
            self.state.store(lease & !ALIVE, Ordering::Release);
            tracing::debug!(task = ?handle, "thread killed");
            // Safety: the lease was current and alive, so the task is registered.
            unsafe { K::task_delete(handle) };
            true
        })
    }
}

/// Trampoline registered with the kernel for every thread.
///
/// Runs the record's entry once, then parks the task: returning from a task
/// function is not allowed, and the registration stays in place until the
/// owning handle tears it down.
///
/// # Safety
///
/// `ctx` must point to a `'static` [`ExecutionRecord<K>`] prepared under the
/// claim the task was registered with.
pub(crate) unsafe fn run_thread<K: Kernel>(ctx: *mut ()) -> ! {
    // Safety: guaranteed by the caller.
    let record = unsafe { &*(ctx as *const ExecutionRecord<K>) };
    // Safety: the entry belongs to this activation and only this task calls it.
    unsafe { (*record.entry.get()).call(()) };

    // thread is still attached to its handle, cleanup happens in kill / drop
    loop {
        K::suspend_current();
    }
}
