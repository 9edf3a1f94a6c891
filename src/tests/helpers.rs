//! Test helper utilities and common functionality.

use crate::sim::SimKernel;
use crate::this_thread;
use crate::time::Duration;
use core::fmt::{self, Write};
use portable_atomic::{AtomicUsize, Ordering};
use std::string::String;
use std::sync::{Mutex, Once};
use std::vec::Vec;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Metadata, Subscriber};

/// Kernel every in-crate test runs against.
pub(crate) type K = SimKernel;

/// Sleep the calling simulated task.
pub(crate) fn sleep_ms(ms: u64) {
    this_thread::sleep_for::<K>(Duration::from_millis(ms));
}

/// Thread body that bumps `counter` forever, yielding after every step.
pub(crate) fn count_and_yield(counter: &'static AtomicUsize) -> impl FnOnce() + Send + 'static {
    move || loop {
        counter.fetch_add(1, Ordering::SeqCst);
        this_thread::yield_now::<K>();
    }
}

pub(crate) fn load(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Subscriber that keeps every event as a `level field=value ...` line.
struct EventLog;

struct LineWriter<'a>(&'a mut String);

impl Visit for LineWriter<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let _ = write!(self.0, " {}={:?}", field.name(), value);
    }
}

impl Subscriber for EventLog {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _: &Id, _: &Record<'_>) {}

    fn record_follows_from(&self, _: &Id, _: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let mut line = String::new();
        let _ = write!(line, "{}", event.metadata().level());
        event.record(&mut LineWriter(&mut line));
        let mut events = EVENTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        events.push(line);
    }

    fn enter(&self, _: &Id) {}

    fn exit(&self, _: &Id) {}
}

/// Route all diagnostics of this test binary into the in-memory log.
pub(crate) fn capture_events() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = tracing::subscriber::set_global_default(EventLog);
    });
}

/// Whether some captured event contains every fragment.
pub(crate) fn logged(fragments: &[&str]) -> bool {
    let events = EVENTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    events.iter().any(|line| fragments.iter().all(|fragment| line.contains(fragment)))
}

/// Poll `$condition` from the calling simulated task, sleeping a tick
/// between checks, and fail after `$timeout_ms`.
#[macro_export]
macro_rules! assert_eventually {
    ($condition:expr, $timeout_ms:expr) => {{
        let start = $crate::time::Instant::now::<$crate::sim::SimKernel>();
        let timeout = $crate::time::Duration::from_millis($timeout_ms)
            .to_ticks($crate::config::TICK_RATE_HZ);

        while !$condition {
            if $crate::time::Instant::now::<$crate::sim::SimKernel>().ticks_since(start) > timeout {
                panic!("Condition never became true within {}ms", $timeout_ms);
            }
            $crate::this_thread::sleep_for::<$crate::sim::SimKernel>($crate::time::Duration::from_millis(1));
        }
    }};
}

/// Assert that a handle is joinable and reports `$priority`.
#[macro_export]
macro_rules! assert_running {
    ($thread:expr, $priority:expr) => {
        assert!($thread.joinable(), "thread {:?} is not joinable", $thread);
        assert_eq!($thread.priority(), Some($priority), "thread {:?} has the wrong priority", $thread);
    };
}
