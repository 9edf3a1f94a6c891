//! Operations on the calling task.

use crate::kernel::{Kernel, Priority, TaskHandle, Tick};
use crate::thread::ThreadId;
use crate::time::{Duration, Instant};
use core::marker::PhantomData;

/// Offer the CPU to other ready tasks of equal or higher priority.
pub fn yield_now<K: Kernel>() {
    K::yield_now();
}

/// Identity of the calling task.
pub fn id<K: Kernel>() -> ThreadId {
    ThreadId::from_native(K::current_task())
}

pub fn native_handle<K: Kernel>() -> Option<TaskHandle> {
    K::current_task()
}

/// Block for at least `duration`, rounded up to whole kernel ticks.
pub fn sleep_for<K: Kernel>(duration: Duration) {
    let ticks = duration.to_ticks(K::config().tick_rate_hz);
    if ticks > 0 {
        K::delay(ticks);
    }
}

/// Block until `deadline`. Returns at once if it has already passed.
pub fn sleep_until<K: Kernel>(deadline: Instant) {
    let now = Instant::now::<K>();
    if deadline.is_after(now) {
        K::delay(deadline.ticks_since(now));
    }
}

/// Live priority of the calling task.
pub fn priority<K: Kernel>() -> Priority {
    K::priority_get(None)
}

/// Fewest free stack words the calling task has had so far.
pub fn stack_high_water<K: Kernel>() -> usize {
    K::stack_high_water_mark(None)
}

/// Fixed-rate sleeper.
///
/// Wake times are multiples of the period from the anchor taken at
/// construction, never from the actual wake time, so jitter does not add up
/// over many periods. A missed deadline does not move the anchor either.
///
/// ```ignore
/// let mut ticker = PeriodicSleep::<MyKernel>::new();
/// loop {
///     sample_sensor();
///     ticker.sleep(Duration::from_millis(10));
/// }
/// ```
#[derive(Debug)]
pub struct PeriodicSleep<K: Kernel> {
    last_wake: Tick,
    _kernel: PhantomData<K>,
}

impl<K: Kernel> PeriodicSleep<K> {
    /// Anchor at the current tick.
    pub fn new() -> Self {
        Self { last_wake: K::tick_count(), _kernel: PhantomData }
    }

    /// Sleep until one `period` after the previous wake time.
    ///
    /// Returns `false` without blocking when that time has already passed.
    pub fn sleep(&mut self, period: Duration) -> bool {
        let increment = period.to_ticks(K::config().tick_rate_hz);
        K::delay_until(&mut self.last_wake, increment)
    }

    /// The wake time the next period is measured from.
    pub fn last_wake(&self) -> Instant {
        Instant::from_ticks(self.last_wake)
    }
}

impl<K: Kernel> Default for PeriodicSleep<K> {
    fn default() -> Self {
        Self::new()
    }
}
