//! Kernel configuration.
//!
//! Compile-time values are selected with Cargo features the way a kernel
//! configuration header would be; [`KernelConfig`] collects the values a
//! kernel port reports at run time.

use crate::kernel::{Priority, StackWord};

/// Tick interrupt frequency in Hz.
pub const TICK_RATE_HZ: u32 = 1000; // 1 kHz = 1ms ticks

/// Number of distinct task priorities; valid priorities are `0..MAX_PRIORITIES`.
pub const MAX_PRIORITIES: Priority = 32;

/// Smallest stack, in words, a task may be given.
pub const MINIMAL_STACK_SIZE: usize = if cfg!(feature = "std-shim") { 16384 } else { 128 };

/// Longest task name kept by the kernel, in bytes.
pub const MAX_TASK_NAME_LEN: usize = 16;

/// How stack overflows are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOverflowCheck {
    /// No checking
    Off,
    /// Verify the lowest stack word on every switch
    Checksum,
    /// Verify a run of guard words below the usable stack on every switch
    GuardWord,
}

/// Overflow detection selected by features; `stack-guard` wins over `stack-checksum`.
pub const STACK_OVERFLOW_CHECK: StackOverflowCheck = if cfg!(feature = "stack-guard") {
    StackOverflowCheck::GuardWord
} else if cfg!(feature = "stack-checksum") {
    StackOverflowCheck::Checksum
} else {
    StackOverflowCheck::Off
};

/// Size of the overflow guard below a stack in `GuardWord` mode.
pub const STACK_GUARD_BYTES: usize = 16;

/// Guard words added below every inplace stack.
pub const STACK_GUARD_WORDS: usize = match STACK_OVERFLOW_CHECK {
    StackOverflowCheck::GuardWord => STACK_GUARD_BYTES / core::mem::size_of::<StackWord>(),
    _ => 0,
};

/// Value every stack word holds until the task touches it.
pub const STACK_FILL_WORD: StackWord = StackWord::from_ne_bytes([0xa5; core::mem::size_of::<StackWord>()]);

/// Whether the kernel runs a timer-service task.
pub const USE_TIMERS: bool = cfg!(feature = "timers");

/// Whether equal-priority tasks share the CPU on every tick.
pub const USE_TIME_SLICING: bool = cfg!(feature = "time-slicing");

/// Run-time view of the kernel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub tick_rate_hz: u32,
    pub max_priorities: Priority,
    pub minimal_stack_size: usize,
    pub stack_overflow_check: StackOverflowCheck,
    pub use_timers: bool,
    pub use_time_slicing: bool,
}

impl KernelConfig {
    /// Configuration assembled from the compile-time constants.
    pub const DEFAULT: Self = Self {
        tick_rate_hz: TICK_RATE_HZ,
        max_priorities: MAX_PRIORITIES,
        minimal_stack_size: MINIMAL_STACK_SIZE,
        stack_overflow_check: STACK_OVERFLOW_CHECK,
        use_timers: USE_TIMERS,
        use_time_slicing: USE_TIME_SLICING,
    };

    pub const fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    pub const fn with_timers(mut self, enabled: bool) -> Self {
        self.use_timers = enabled;
        self
    }

    pub const fn with_time_slicing(mut self, enabled: bool) -> Self {
        self.use_time_slicing = enabled;
        self
    }

    pub const fn with_stack_overflow_check(mut self, check: StackOverflowCheck) -> Self {
        self.stack_overflow_check = check;
        self
    }

    /// Tasks the kernel creates for itself: idle, plus the timer service.
    pub const fn housekeeping_tasks(&self) -> usize {
        if self.use_timers {
            2
        } else {
            1
        }
    }

    /// Highest priority a task may be given.
    pub const fn highest_priority(&self) -> Priority {
        self.max_priorities - 1
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
