//! Kernel port: the interface this crate consumes from the scheduler.
//!
//! The scheduler engine (context switching, tick accounting, priority
//! inheritance) lives outside this crate. A port implements [`Kernel`] with
//! associated functions only, mirroring a C kernel API where every call acts
//! on global scheduler state.

use crate::config::{KernelConfig, MAX_TASK_NAME_LEN};
use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// Task priority; larger values are more urgent.
pub type Priority = u32;

/// Kernel tick count. Wraps around.
pub type Tick = u32;

/// One word of task stack.
pub type StackWord = usize;

/// Entry point registered with the kernel. Never returns.
pub type TaskEntry = unsafe fn(*mut ()) -> !;

/// Native identity of a registered task: the address of its control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(NonNull<()>);

impl TaskHandle {
    /// The handle a task created on `control_block` must have.
    pub fn of<T>(control_block: &T) -> Self {
        Self(NonNull::from(control_block).cast())
    }

    pub fn as_ptr(self) -> *mut () {
        self.0.as_ptr()
    }

    /// Reinterpret the handle as a pointer to the control block type.
    pub fn cast<T>(self) -> NonNull<T> {
        self.0.cast()
    }
}

// Safety: a handle is an identity token; dereferencing it is the kernel's business.
unsafe impl Send for TaskHandle {}
unsafe impl Sync for TaskHandle {}

/// Task name as stored by the kernel, truncated to [`MAX_TASK_NAME_LEN`] bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskName {
    bytes: [u8; MAX_TASK_NAME_LEN],
    len: u8,
}

impl TaskName {
    pub const EMPTY: Self = Self { bytes: [0; MAX_TASK_NAME_LEN], len: 0 };

    /// Copy `name`, cutting it at the last character boundary that fits.
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(MAX_TASK_NAME_LEN);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; MAX_TASK_NAME_LEN];
        bytes[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self { bytes, len: len as u8 }
    }

    pub fn as_str(&self) -> &str {
        // Only ever built from a `&str` cut at a char boundary.
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// Scheduler port.
///
/// Handles passed as `Option<TaskHandle>` address the calling task when `None`.
///
/// # Safety
///
/// Implementations must uphold that a handle returned by `task_create` equals
/// [`TaskHandle::of`] the control block it was given, and that the control
/// block, stack and context stay untouched by the kernel after `task_delete`.
pub unsafe trait Kernel: Sized + 'static {
    /// Per-task control block the kernel keeps inside caller-provided memory.
    type ControlBlock: Send + 'static;

    /// Zero value a control block is reset to before every registration.
    const CONTROL_BLOCK_INIT: Self::ControlBlock;

    /// Configuration the kernel was built with.
    fn config() -> KernelConfig;

    /// Register a task that runs `entry(context)` on `stack`.
    ///
    /// # Safety
    ///
    /// - `stack`, `context` and `control_block` must stay valid and unused by
    ///   anyone else until the task is deleted
    /// - `control_block` must hold [`Kernel::CONTROL_BLOCK_INIT`]
    unsafe fn task_create(
        entry: TaskEntry,
        name: &str,
        stack: NonNull<[StackWord]>,
        context: *mut (),
        priority: Priority,
        control_block: NonNull<Self::ControlBlock>,
    ) -> Option<TaskHandle>;

    /// Remove a task from scheduling. Deleting the calling task does not return.
    ///
    /// # Safety
    ///
    /// `task` must be a live handle returned by `task_create`.
    unsafe fn task_delete(task: TaskHandle);

    /// Suspend the calling task until something resumes it.
    fn suspend_current();

    /// Live priority, including any inheritance boost.
    fn priority_get(task: Option<TaskHandle>) -> Priority;

    /// Change a task's base priority; may switch before returning.
    fn priority_set(task: Option<TaskHandle>, priority: Priority);

    /// Handle of the calling task, `None` before the scheduler starts.
    fn current_task() -> Option<TaskHandle>;

    fn task_name(task: Option<TaskHandle>) -> TaskName;

    fn tick_count() -> Tick;

    /// Block the calling task for `ticks` ticks.
    fn delay(ticks: Tick);

    /// Block until `*previous_wake + increment`, then advance `*previous_wake`
    /// by `increment`. Returns `false` when that time had already passed.
    fn delay_until(previous_wake: &mut Tick, increment: Tick) -> bool;

    /// Number of tasks the kernel knows about, housekeeping included.
    fn task_count() -> usize;

    /// Mask interrupts up to the syscall ceiling. Nests.
    fn enter_critical();

    fn exit_critical();

    fn yield_now();

    /// Fewest free stack words the task has had since it started.
    fn stack_high_water_mark(task: Option<TaskHandle>) -> usize;
}

/// RAII critical section: entered on construction, exited on drop.
///
/// Keep the guarded region short; it masks preemption for its duration.
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalSection<K: Kernel> {
    _kernel: PhantomData<K>,
    // Must be exited on the task that entered it.
    _not_send: PhantomData<*const ()>,
}

impl<K: Kernel> CriticalSection<K> {
    pub fn enter() -> Self {
        K::enter_critical();
        Self { _kernel: PhantomData, _not_send: PhantomData }
    }
}

impl<K: Kernel> Drop for CriticalSection<K> {
    fn drop(&mut self) {
        K::exit_critical();
    }
}

/// Run `f` inside a critical section.
pub fn critical_section<K: Kernel, R>(f: impl FnOnce() -> R) -> R {
    let _cs = CriticalSection::<K>::enter();
    f()
}
