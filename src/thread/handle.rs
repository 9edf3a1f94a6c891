//! The owning thread handle.

use super::record::ExecutionRecord;
use super::{InplaceStorage, TaskOutcome, ThreadId};
use crate::erased_ptr::ErasedPtr;
use crate::errors::{ThreadError, ThreadResult};
use crate::kernel::{Kernel, Priority, TaskHandle};
use core::fmt;
use core::ptr::NonNull;

/// Owning handle of a kernel task.
///
/// A `Thread` owns the *registration* of a task, never its memory, which
/// stays with the [`InplaceStorage`] it was bound to. Handles are move-only.
/// Dropping or overwriting a joinable handle kills its task; killing does not
/// wait for the task to reach any particular point.
#[must_use = "dropping a Thread kills its task"]
pub struct Thread<K: Kernel> {
    record: ErasedPtr<ExecutionRecord<K>>,
    lease: u32,
}

impl<K: Kernel> Thread<K> {
    /// A handle that owns nothing and is not joinable.
    pub const fn empty() -> Self {
        Self { record: ErasedPtr::null(), lease: 0 }
    }

    /// Bind `f` to `storage` and start it as a new kernel task.
    ///
    /// # Arguments
    ///
    /// * `name` - Task name shown by kernel diagnostics; truncated by the kernel
    /// * `priority` - Base priority, below [`Thread::max_priority`]
    /// * `storage` - Memory the task runs in; must not have a live task
    /// * `f` - Thread body; its captures must fit in `FUNC` bytes
    ///
    /// Violated preconditions are fatal kernel assertions, as is a kernel
    /// that registers the task under any handle other than the storage's
    /// control block.
    pub fn new<F, const STACK: usize, const FUNC: usize>(
        name: &str,
        priority: Priority,
        storage: &'static InplaceStorage<K, STACK, FUNC>,
        f: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(name, priority, storage, f)
    }

    /// Like [`Thread::new`] for a body that can fail. An `Err` is logged
    /// with the task's name, then the task parks like any finished body.
    pub fn new_fallible<F, E, const STACK: usize, const FUNC: usize>(
        name: &str,
        priority: Priority,
        storage: &'static InplaceStorage<K, STACK, FUNC>,
        f: F,
    ) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: fmt::Debug,
    {
        Self::spawn(name, priority, storage, f)
    }

    fn spawn<F, R, const STACK: usize, const FUNC: usize>(
        name: &str,
        priority: Priority,
        storage: &'static InplaceStorage<K, STACK, FUNC>,
        f: F,
    ) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: TaskOutcome,
    {
        crate::kernel_assert!(
            priority < Self::max_priority(),
            "priority {} out of range for task {:?}",
            priority,
            name
        );

        let lease = storage.bind(priority, f);
        let record = storage.record();
        // Safety: the storage is 'static and was just bound under `lease`.
        unsafe { record.start(name) };

        let record = ErasedPtr::new(NonNull::from(record), move |record: NonNull<ExecutionRecord<K>>| {
            // Safety: records live in 'static storage.
            unsafe { record.as_ref() }.revoke(lease);
        });
        Self { record, lease }
    }

    fn record(&self) -> Option<&'static ExecutionRecord<K>> {
        // Safety: records live in 'static storage.
        self.record.get().map(|record| unsafe { &*record.as_ptr() })
    }

    /// Whether this handle owns a live task. A task whose body has finished
    /// stays joinable until it is killed.
    pub fn joinable(&self) -> bool {
        self.native_handle().is_some()
    }

    /// Identity of the task, or [`ThreadId::NULL`] if not joinable.
    pub fn id(&self) -> ThreadId {
        ThreadId::from_native(self.native_handle())
    }

    pub fn native_handle(&self) -> Option<TaskHandle> {
        self.record()?.leased_handle(self.lease)
    }

    /// Remove the task from the kernel immediately.
    ///
    /// The storage is not reclaimed and may be bound again afterwards.
    ///
    /// # Errors
    ///
    /// [`ThreadError::NoSuchProcess`] for an empty handle,
    /// [`ThreadError::InvalidArgument`] when the task was already killed.
    pub fn kill(&mut self) -> ThreadResult<()> {
        let record = self.record().ok_or(ThreadError::NoSuchProcess)?;
        if record.revoke(self.lease) {
            Ok(())
        } else {
            Err(ThreadError::InvalidArgument)
        }
    }

    /// Change the task's base priority. May switch tasks before returning.
    ///
    /// # Errors
    ///
    /// Same as [`Thread::kill`].
    pub fn set_priority(&self, priority: Priority) -> ThreadResult<()> {
        crate::kernel_assert!(
            priority < Self::max_priority(),
            "priority {} out of range",
            priority
        );
        let record = self.record().ok_or(ThreadError::NoSuchProcess)?;
        let task = record.leased_handle(self.lease).ok_or(ThreadError::InvalidArgument)?;
        K::priority_set(Some(task), priority);
        Ok(())
    }

    /// Live priority of the task, inheritance boosts included.
    pub fn priority(&self) -> Option<Priority> {
        self.native_handle().map(|task| K::priority_get(Some(task)))
    }

    /// Exclusive upper bound for task priorities.
    pub fn max_priority() -> Priority {
        K::config().max_priorities
    }

    /// The kernel schedules a single core.
    pub const fn hardware_concurrency() -> usize {
        1
    }

    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(self, other);
    }
}

impl<K: Kernel> Default for Thread<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: Kernel> fmt::Debug for Thread<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("joinable", &self.joinable())
            .finish()
    }
}
