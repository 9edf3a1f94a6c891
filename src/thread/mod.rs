//! Threads: inplace storage, the owning handle and task identities.

use crate::kernel::{Kernel, TaskHandle};
use core::fmt;

pub mod handle;
mod record;
pub mod storage;

pub use handle::Thread;
pub use storage::InplaceStorage;

/// Identity of a kernel task.
///
/// Ids are totally ordered so they can key ordered maps and sets. The null id
/// belongs to no task and sorts before every other id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ThreadId(Option<TaskHandle>);

impl ThreadId {
    /// The id of no task.
    pub const NULL: Self = Self(None);

    pub const fn from_native(handle: Option<TaskHandle>) -> Self {
        Self(handle)
    }

    pub const fn is_null(self) -> bool {
        self.0.is_none()
    }

    /// Kernel handle behind this id.
    pub const fn native_handle(self) -> Option<TaskHandle> {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(handle) => write!(f, "ThreadId({:p})", handle.as_ptr()),
            None => f.write_str("ThreadId(null)"),
        }
    }
}

/// What a thread body may return.
///
/// A body has nobody to return to, so its outcome is reported on the
/// diagnostic channel, tagged with the task's name, and the task parks.
pub trait TaskOutcome {
    fn report<K: Kernel>(self);
}

impl TaskOutcome for () {
    fn report<K: Kernel>(self) {}
}

impl<E: fmt::Debug> TaskOutcome for Result<(), E> {
    fn report<K: Kernel>(self) {
        if let Err(error) = self {
            tracing::error!(task = %K::task_name(None), ?error, "thread body failed");
        }
    }
}
