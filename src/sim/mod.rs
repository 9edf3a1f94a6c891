//! Host simulator of the kernel port.
//!
//! Every task runs on its own host thread, but only one of them executes at
//! a time: the others wait on a condition variable for the scheduler to hand
//! them the CPU. Scheduling decisions are taken at kernel calls, so a task is
//! preempted the next time it yields, sleeps, reads the tick counter, creates
//! or deletes a task, changes a priority or leaves a critical section.
//!
//! Each [`Simulator`] is an independent kernel. Host threads find theirs
//! through a thread-local binding, which lets tests run side by side.
//!
//! ```
//! use inplace_threads::{os, sim, this_thread, InplaceStorage, Thread};
//! use inplace_threads::sim::SimKernel;
//!
//! static WORKER: InplaceStorage<SimKernel, 256> = InplaceStorage::new();
//!
//! sim::run(|| {
//!     let before = os::number_of_threads::<SimKernel>();
//!     let mut worker = Thread::new("worker", 3, &WORKER, || loop {
//!         this_thread::yield_now::<SimKernel>();
//!     });
//!     assert_eq!(os::number_of_threads::<SimKernel>(), before + 1);
//!     worker.kill().unwrap();
//! });
//! ```

mod scheduler;

use crate::assert;
use crate::config::KernelConfig;
use crate::kernel::{Kernel, Priority, StackWord, TaskEntry, TaskHandle, TaskName, Tick};
use portable_atomic::{AtomicUsize, Ordering};
use scheduler::{SchedState, StackSpan, TaskState, IDLE, INITIAL_FRAME_WORDS};
use std::boxed::Box;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::string::String;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use std::vec::Vec;

/// Control block of a simulated task: the slot it occupies, plus one.
#[derive(Debug)]
pub struct SimControlBlock {
    task: AtomicUsize,
}

/// Kernel port backed by the simulator of the calling host thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimKernel;

/// Unwinds task threads when their simulator shuts down.
struct SimShutdown;

std::thread_local! {
    static BINDING: RefCell<Option<(Arc<Shared>, usize)>> = const { RefCell::new(None) };
}

/// A simulated kernel instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simulator {
    config: KernelConfig,
}

impl Simulator {
    pub const fn new(config: KernelConfig) -> Self {
        Self { config }
    }

    /// Boot the kernel and run `main` as its main task, at the highest
    /// priority, on the calling thread.
    ///
    /// Returns what `main` returns; a panic in `main` is re-raised after the
    /// simulator has shut down. All other tasks are torn down when `main`
    /// finishes.
    pub fn run<F, R>(self, main: F) -> R
    where
        F: FnOnce() -> R,
    {
        let shared = Arc::new(Shared::new(self.config));
        let main_task = shared.main_task;
        let previous = BINDING.with(|binding| binding.replace(Some((shared.clone(), main_task))));
        tracing::debug!(tick_rate_hz = self.config.tick_rate_hz, "simulator started");

        let result = panic::catch_unwind(AssertUnwindSafe(main));

        BINDING.with(|binding| *binding.borrow_mut() = previous);
        shared.shutdown();
        match result {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Run `main` on a simulator with the default configuration.
pub fn run<R>(main: impl FnOnce() -> R) -> R {
    Simulator::new(KernelConfig::DEFAULT).run(main)
}

struct Shared {
    state: Mutex<SchedState>,
    turn: Condvar,
    epoch: Instant,
    tick_period: Duration,
    main_task: usize,
    // memory of the main task, which has no inplace storage
    _main_control_block: Box<SimControlBlock>,
    _main_stack: Box<[StackWord]>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn new(config: KernelConfig) -> Self {
        let mut state = SchedState::new(config);
        let mut main_stack = std::vec![0; config.minimal_stack_size].into_boxed_slice();
        let span = StackSpan::new(std::ptr::NonNull::from(&mut main_stack[..]));
        // Safety: the main stack is owned by this simulator and used by nobody.
        unsafe { span.prepare([0; INITIAL_FRAME_WORDS]) };

        let main_task = state.add_task("main", config.highest_priority(), Some(span));
        let main_control_block = Box::new(SimControlBlock { task: AtomicUsize::new(main_task + 1) });
        state.tasks[main_task].handle = Some(TaskHandle::of(&*main_control_block));
        state.current = main_task;

        let tick_nanos = 1_000_000_000 / u64::from(config.tick_rate_hz.max(1));
        Self {
            state: Mutex::new(state),
            turn: Condvar::new(),
            epoch: Instant::now(),
            tick_period: Duration::from_nanos(tick_nanos.max(1)),
            main_task,
            _main_control_block: main_control_block,
            _main_stack: main_stack,
            threads: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedState> {
        // A poisoned lock only means some task panicked; the state is consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Absolute ticks since boot.
    fn now(&self, config: &KernelConfig) -> u64 {
        let nanos = self.epoch.elapsed().as_nanos();
        (nanos * u128::from(config.tick_rate_hz) / 1_000_000_000) as u64
    }

    /// Slot of the task registered on `handle`, if it is alive.
    fn lookup(state: &SchedState, handle: TaskHandle) -> Option<usize> {
        // Safety: handles passed to the kernel address control blocks it registered.
        let hint = unsafe { handle.cast::<SimControlBlock>().as_ref() }.task.load(Ordering::Acquire);
        state.lookup(handle, hint.checked_sub(1)?)
    }

    fn resolve(state: &SchedState, task: Option<TaskHandle>, me: usize) -> Option<usize> {
        match task {
            None => Some(me),
            Some(handle) => Self::lookup(state, handle),
        }
    }

    /// Hand the CPU to whichever task should run and come back once `me`
    /// is picked again.
    fn reschedule(&self, me: usize, mut state: MutexGuard<'_, SchedState>) {
        if std::thread::panicking() {
            return;
        }
        let now = self.now(&state.config);
        state.wake_sleepers(now);
        if state.critical_nesting > 0 {
            if state.pick() != me {
                state.yield_pending = true;
            }
            return;
        }
        state.yield_pending = false;

        if state.config.use_time_slicing && state.tasks[me].state == TaskState::Ready && now > state.slice_start {
            state.rotate(me);
            state.slice_start = now;
        }

        let next = state.pick();
        if next != me {
            if let Some(name) = state.stack_overflowed(me) {
                drop(state);
                assert::stack_overflow(name.as_str());
            }
            state.current = next;
            state.slice_start = now;
            self.turn.notify_all();
        }
        self.wait_for_turn(me, state);
    }

    /// Block until `me` is the running task. Unwinds with [`SimShutdown`]
    /// when the simulator shuts down first.
    fn wait_for_turn(&self, me: usize, mut state: MutexGuard<'_, SchedState>) {
        loop {
            if state.shutdown {
                drop(state);
                if std::thread::panicking() {
                    return;
                }
                panic::resume_unwind(Box::new(SimShutdown));
            }

            let now = self.now(&state.config);
            state.wake_sleepers(now);
            if state.current == IDLE {
                let next = state.pick();
                if next != IDLE {
                    state.current = next;
                    state.slice_start = now;
                    self.turn.notify_all();
                }
            }
            if state.current == me && state.tasks[me].state == TaskState::Ready {
                return;
            }

            state = match self.turn.wait_timeout(state, self.tick_period) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Take `me` out of scheduling for good and wait for shutdown.
    fn park(&self, me: usize) {
        let mut state = self.lock();
        state.set_state(me, TaskState::Suspended);
        state.critical_nesting = 0;
        state.yield_pending = false;
        if state.current == me {
            state.current = state.pick();
            self.turn.notify_all();
        }
        while !state.shutdown {
            state = self.turn.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        self: &Arc<Self>,
        me: usize,
        entry: TaskEntry,
        name: &str,
        stack: StackSpan,
        context: *mut (),
        priority: Priority,
        control_block: &SimControlBlock,
    ) -> Option<TaskHandle> {
        let mut state = self.lock();
        let effective = state.clamp_priority(priority);
        if effective != priority {
            tracing::warn!(task = name, priority, effective, "priority clamped");
        }

        // Safety: the caller hands the stack over to the kernel.
        unsafe { stack.prepare([entry as usize, context as usize, 0, 0]) };
        let task = state.add_task(name, effective, Some(stack));
        let handle = TaskHandle::of(control_block);
        control_block.task.store(task + 1, Ordering::Release);
        state.tasks[task].handle = Some(handle);

        let shared = self.clone();
        let context = SendContext(context);
        let spawned = std::thread::Builder::new()
            .name(String::from(state.tasks[task].name.as_str()))
            .spawn(move || shared.task_root(task, entry, context));
        match spawned {
            Ok(thread) => self.threads.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(thread),
            Err(error) => {
                tracing::error!(task = name, %error, "failed to spawn host thread");
                state.set_state(task, TaskState::Deleted);
                state.tasks[task].handle = None;
                return None;
            }
        }

        self.reschedule(me, state);
        Some(handle)
    }

    fn task_root(self: Arc<Self>, me: usize, entry: TaskEntry, context: SendContext) {
        BINDING.with(|binding| *binding.borrow_mut() = Some((self.clone(), me)));
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.wait_for_turn(me, self.lock());
            let context = context.into_inner();
            // Safety: the entry and context were registered together.
            unsafe { entry(context) }
        }));

        if let Err(payload) = result {
            if payload.is::<SimShutdown>() {
                return;
            }
            let name = self.lock().tasks[me].name;
            tracing::error!(task = %name, "thread panicked: {}", panic_message(&*payload));
            self.park(me);
        }
    }

    fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutdown = true;
            self.turn.notify_all();
        }
        let threads = core::mem::take(&mut *self.threads.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        for thread in threads {
            let _ = thread.join();
        }
        tracing::debug!("simulator stopped");
    }
}

struct SendContext(*mut ());

// Safety: the context belongs to the task it is handed to.
unsafe impl Send for SendContext {}

impl SendContext {
    fn into_inner(self) -> *mut () {
        self.0
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Run `f` with the simulator and task slot of the calling host thread.
fn with_sim<R>(f: impl FnOnce(&Arc<Shared>, usize) -> R) -> R {
    let binding = BINDING.with(|binding| binding.borrow().clone());
    match binding {
        Some((shared, me)) => f(&shared, me),
        None => assert::assert_failed(file!(), line!(), format_args!("kernel call from outside the simulator")),
    }
}

fn unknown_task(task: Option<TaskHandle>) -> ! {
    assert::assert_failed(file!(), line!(), format_args!("unknown task {:?}", task))
}

// Safety: task handles are the addresses of the control blocks handed to
// `task_create`, and deleted tasks never touch their memory again.
unsafe impl Kernel for SimKernel {
    type ControlBlock = SimControlBlock;

    #[allow(clippy::declare_interior_mutable_const)]
    const CONTROL_BLOCK_INIT: SimControlBlock = SimControlBlock { task: AtomicUsize::new(0) };

    fn config() -> KernelConfig {
        BINDING
            .with(|binding| binding.borrow().as_ref().map(|(shared, _)| shared.lock().config))
            .unwrap_or(KernelConfig::DEFAULT)
    }

    unsafe fn task_create(
        entry: TaskEntry,
        name: &str,
        stack: core::ptr::NonNull<[StackWord]>,
        context: *mut (),
        priority: Priority,
        control_block: core::ptr::NonNull<SimControlBlock>,
    ) -> Option<TaskHandle> {
        with_sim(|sim, me| {
            // Safety: the control block stays valid while the task exists.
            let control_block = unsafe { control_block.as_ref() };
            sim.create(me, entry, name, StackSpan::new(stack), context, priority, control_block)
        })
    }

    unsafe fn task_delete(task: TaskHandle) {
        with_sim(|sim, me| {
            let mut state = sim.lock();
            let Some(index) = Shared::lookup(&state, task) else {
                drop(state);
                unknown_task(Some(task))
            };
            state.set_state(index, TaskState::Deleted);
            state.tasks[index].handle = None;
            if index == me {
                state.critical_nesting = 0;
            }
            sim.reschedule(me, state);
        })
    }

    fn suspend_current() {
        with_sim(|sim, me| {
            let mut state = sim.lock();
            state.set_state(me, TaskState::Suspended);
            sim.reschedule(me, state);
        })
    }

    fn priority_get(task: Option<TaskHandle>) -> Priority {
        with_sim(|sim, me| {
            let state = sim.lock();
            match Shared::resolve(&state, task, me) {
                Some(index) => state.tasks[index].priority,
                None => {
                    drop(state);
                    unknown_task(task)
                }
            }
        })
    }

    fn priority_set(task: Option<TaskHandle>, priority: Priority) {
        with_sim(|sim, me| {
            let mut state = sim.lock();
            let Some(index) = Shared::resolve(&state, task, me) else {
                drop(state);
                unknown_task(task)
            };
            let effective = state.clamp_priority(priority);
            if effective != priority {
                tracing::warn!(task = %state.tasks[index].name, priority, effective, "priority clamped");
            }
            state.tasks[index].priority = effective;
            sim.reschedule(me, state);
        })
    }

    fn current_task() -> Option<TaskHandle> {
        with_sim(|sim, me| sim.lock().tasks[me].handle)
    }

    fn task_name(task: Option<TaskHandle>) -> TaskName {
        with_sim(|sim, me| {
            let state = sim.lock();
            Shared::resolve(&state, task, me).map_or(TaskName::EMPTY, |index| state.tasks[index].name)
        })
    }

    fn tick_count() -> Tick {
        with_sim(|sim, me| {
            let state = sim.lock();
            let now = sim.now(&state.config);
            sim.reschedule(me, state);
            now as Tick
        })
    }

    fn delay(ticks: Tick) {
        with_sim(|sim, me| {
            let mut state = sim.lock();
            if state.critical_nesting > 0 {
                drop(state);
                assert::assert_failed(file!(), line!(), format_args!("delay inside a critical section"));
            }
            if ticks == 0 {
                state.rotate(me);
            } else {
                let wake = sim.now(&state.config) + u64::from(ticks);
                state.set_state(me, TaskState::Delayed { wake });
            }
            sim.reschedule(me, state);
        })
    }

    fn delay_until(previous_wake: &mut Tick, increment: Tick) -> bool {
        with_sim(|sim, me| {
            let mut state = sim.lock();
            if state.critical_nesting > 0 {
                drop(state);
                assert::assert_failed(file!(), line!(), format_args!("delay inside a critical section"));
            }
            let now = sim.now(&state.config);
            let tick = now as Tick;
            let should_delay = scheduler::should_delay(tick, *previous_wake, increment);
            *previous_wake = previous_wake.wrapping_add(increment);
            if should_delay {
                let wake = now + u64::from(previous_wake.wrapping_sub(tick));
                state.set_state(me, TaskState::Delayed { wake });
            } else {
                state.rotate(me);
            }
            sim.reschedule(me, state);
            should_delay
        })
    }

    fn task_count() -> usize {
        with_sim(|sim, _| sim.lock().task_count())
    }

    fn enter_critical() {
        with_sim(|sim, _| sim.lock().critical_nesting += 1)
    }

    fn exit_critical() {
        with_sim(|sim, me| {
            let mut state = sim.lock();
            state.critical_nesting = state.critical_nesting.saturating_sub(1);
            if state.critical_nesting == 0 && state.yield_pending {
                sim.reschedule(me, state);
            }
        })
    }

    fn yield_now() {
        with_sim(|sim, me| {
            let mut state = sim.lock();
            state.rotate(me);
            sim.reschedule(me, state);
        })
    }

    fn stack_high_water_mark(task: Option<TaskHandle>) -> usize {
        with_sim(|sim, me| {
            let state = sim.lock();
            match Shared::resolve(&state, task, me) {
                Some(index) => state.high_water(index),
                None => {
                    drop(state);
                    unknown_task(task)
                }
            }
        })
    }
}
