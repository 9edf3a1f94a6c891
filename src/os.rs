//! Kernel-wide queries.

use crate::kernel::Kernel;

/// Number of tasks created by user code.
///
/// The kernel's own housekeeping tasks (idle, and the timer service when
/// timers are enabled) are not counted.
pub fn number_of_threads<K: Kernel>() -> usize {
    K::task_count().saturating_sub(K::config().housekeeping_tasks())
}
