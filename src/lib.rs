#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Move-only thread handles for a preemptive, priority-based RTOS kernel.
//!
//! This library gives embedded code a `std::thread`-like object without a
//! heap: every thread borrows its stack, control block and closure storage
//! from an [`InplaceStorage`] that is usually a `static`.
//!
//! # Features
//!
//! - `std-shim`: Enable the host simulator kernel ([`sim`]) for testing
//! - `timers`: The kernel runs a timer-service housekeeping task (default)
//! - `stack-guard`: Pad stacks with guard words checked on switch (default)
//! - `stack-checksum`: Cheaper overflow check on the lowest stack word
//! - `time-slicing`: Rotate equal-priority tasks on every tick
//!
//! # Quick Start
//!
//! ```ignore
//! use inplace_threads::{this_thread, time::Duration, InplaceStorage, Thread};
//! use inplace_threads::sim::SimKernel;
//!
//! static BLINKY: InplaceStorage<SimKernel, 512, 16> = InplaceStorage::new();
//!
//! fn start() -> Thread<SimKernel> {
//!     Thread::new("blinky", 3, &BLINKY, || loop {
//!         toggle_led();
//!         this_thread::sleep_for::<SimKernel>(Duration::from_millis(500));
//!     })
//! }
//! ```
//!
//! # Architecture
//!
//! - [`kernel::Kernel`] is the port to the scheduler engine
//! - [`InplaceStorage`] owns the memory, [`Thread`] owns the registration
//! - [`ErasedPtr`] carries the handle's teardown action without allocating
//! - [`this_thread`] and [`os`] operate on whichever task is running

// Core modules
pub mod assert;
pub mod config;
pub mod erased_ptr;
pub mod errors;
pub mod inplace_fn;
pub mod kernel;
pub mod os;
pub mod this_thread;
pub mod thread;
pub mod time;

#[cfg(any(test, feature = "std-shim"))]
pub mod sim;

#[cfg(any(test, feature = "std-shim"))]
extern crate std;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API
// ============================================================================

// Kernel port
pub use kernel::{CriticalSection, Kernel, Priority, TaskHandle, TaskName, Tick};

// Threads
pub use thread::{InplaceStorage, TaskOutcome, Thread, ThreadId};

// Ownership helpers
pub use erased_ptr::ErasedPtr;
pub use inplace_fn::InplaceFn;

// Configuration
pub use config::KernelConfig;

// Errors
pub use errors::{ThreadError, ThreadResult};
