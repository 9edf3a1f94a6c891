//! Assertion hook for fatal precondition violations.
//!
//! Violations such as binding a closure to storage that is still alive have
//! no recovery path. They are routed through a single process-wide hook that
//! the host wires to log-and-halt, log-and-reset, or (the default) a panic.

use core::fmt;
use spin::RwLock;

/// Details of a failed kernel assertion.
#[derive(Debug, Clone, Copy)]
pub struct AssertInfo<'a> {
    pub file: &'static str,
    pub line: u32,
    pub message: fmt::Arguments<'a>,
}

impl fmt::Display for AssertInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

/// A hook never returns; the system cannot continue past a failed assertion.
pub type AssertHook = fn(&AssertInfo<'_>) -> !;

static ASSERT_HOOK: RwLock<AssertHook> = RwLock::new(default_hook);

fn default_hook(info: &AssertInfo<'_>) -> ! {
    panic!("kernel assertion failed at {}", info)
}

/// Install `hook` and return the previous one.
pub fn set_assert_hook(hook: AssertHook) -> AssertHook {
    core::mem::replace(&mut *ASSERT_HOOK.write(), hook)
}

/// Report a failed assertion. Use [`kernel_assert!`](crate::kernel_assert).
#[cold]
#[inline(never)]
pub fn assert_failed(file: &'static str, line: u32, message: fmt::Arguments<'_>) -> ! {
    let info = AssertInfo { file, line, message };
    tracing::error!(file, line, "kernel assertion failed: {}", info.message);
    let hook = *ASSERT_HOOK.read();
    hook(&info)
}

/// Report a stack overflow detected by a kernel port in task `name`.
#[cold]
pub fn stack_overflow(name: &str) -> ! {
    assert_failed(file!(), line!(), format_args!("stack overflow in task {:?}", name))
}

/// Check a kernel precondition, calling the assertion hook when it fails.
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr $(,)?) => {
        $crate::kernel_assert!($cond, "{}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::assert::assert_failed(file!(), line!(), format_args!($($arg)+))
        }
    };
}
