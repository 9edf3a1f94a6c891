//! Scheduler bookkeeping of the simulator: task table and pick rule.

use crate::config::{KernelConfig, StackOverflowCheck, STACK_FILL_WORD, STACK_GUARD_BYTES};
use crate::kernel::{Priority, StackWord, TaskHandle, TaskName, Tick};
use core::ptr::NonNull;
use std::vec::Vec;

/// Slot of the idle task; runs when nothing else is ready.
pub(crate) const IDLE: usize = 0;

/// Words the simulated port writes at the top of a fresh stack.
pub(crate) const INITIAL_FRAME_WORDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Ready,
    Delayed { wake: u64 },
    Suspended,
    Deleted,
}

/// Stack memory a task was registered with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StackSpan(NonNull<[StackWord]>);

// Safety: the span is only read or written under the scheduler lock.
unsafe impl Send for StackSpan {}

impl StackSpan {
    pub(crate) fn new(span: NonNull<[StackWord]>) -> Self {
        Self(span)
    }

    fn base(&self) -> *mut StackWord {
        self.0.as_ptr().cast()
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn word(&self, index: usize) -> StackWord {
        // Safety: in bounds, and the memory outlives the registration.
        unsafe { self.base().add(index).read_volatile() }
    }

    /// Fill with the fill pattern and lay down the initial frame at the top.
    ///
    /// # Safety
    ///
    /// The span must be writable and unused by anybody else.
    pub(crate) unsafe fn prepare(&self, frame: [StackWord; INITIAL_FRAME_WORDS]) {
        let base = self.base();
        for index in 0..self.len() {
            // Safety: in bounds per the caller's contract.
            unsafe { base.add(index).write_volatile(STACK_FILL_WORD) };
        }
        let top = self.len().saturating_sub(INITIAL_FRAME_WORDS);
        for (offset, word) in frame.iter().take(self.len()).enumerate() {
            // Safety: `top + offset < len`.
            unsafe { base.add(top + offset).write_volatile(*word) };
        }
    }

    /// Untouched words at the low end, guard words excluded.
    fn high_water(&self, guard_words: usize) -> usize {
        let untouched = (0..self.len()).take_while(|&index| self.word(index) == STACK_FILL_WORD).count();
        untouched.saturating_sub(guard_words)
    }

    fn overflowed(&self, check: StackOverflowCheck) -> bool {
        match check {
            StackOverflowCheck::Off => false,
            StackOverflowCheck::Checksum => self.len() > 0 && self.word(0) != STACK_FILL_WORD,
            StackOverflowCheck::GuardWord => {
                (0..guard_words(check).min(self.len())).any(|index| self.word(index) != STACK_FILL_WORD)
            }
        }
    }
}

/// Words at the bottom of a stack that belong to the overflow guard.
pub(crate) fn guard_words(check: StackOverflowCheck) -> usize {
    match check {
        StackOverflowCheck::GuardWord => STACK_GUARD_BYTES / core::mem::size_of::<StackWord>(),
        _ => 0,
    }
}

#[derive(Debug)]
pub(crate) struct TaskSlot {
    pub(crate) name: TaskName,
    pub(crate) handle: Option<TaskHandle>,
    pub(crate) priority: Priority,
    pub(crate) state: TaskState,
    pub(crate) ready_seq: u64,
    pub(crate) stack: Option<StackSpan>,
    pub(crate) housekeeping: bool,
}

impl TaskSlot {
    /// A kernel-owned task that never runs user code.
    pub(crate) fn housekeeping(name: &str, priority: Priority, state: TaskState) -> Self {
        Self {
            name: TaskName::new(name),
            handle: None,
            priority,
            state,
            ready_seq: 0,
            stack: None,
            housekeeping: true,
        }
    }
}

pub(crate) struct SchedState {
    pub(crate) config: KernelConfig,
    pub(crate) tasks: Vec<TaskSlot>,
    /// Slot whose host thread may execute.
    pub(crate) current: usize,
    /// Nesting depth of the running task's critical sections.
    pub(crate) critical_nesting: u32,
    /// A switch was requested while inside a critical section.
    pub(crate) yield_pending: bool,
    pub(crate) shutdown: bool,
    pub(crate) slice_start: u64,
    next_seq: u64,
}

impl SchedState {
    pub(crate) fn new(config: KernelConfig) -> Self {
        let mut tasks = Vec::new();
        tasks.push(TaskSlot::housekeeping("IDLE", 0, TaskState::Ready));
        if config.use_timers {
            tasks.push(TaskSlot::housekeeping("Tmr Svc", config.highest_priority(), TaskState::Suspended));
        }
        Self {
            config,
            tasks,
            current: IDLE,
            critical_nesting: 0,
            yield_pending: false,
            shutdown: false,
            slice_start: 0,
            next_seq: 1,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Add a ready task and return its slot.
    pub(crate) fn add_task(&mut self, name: &str, priority: Priority, stack: Option<StackSpan>) -> usize {
        let ready_seq = self.next_seq();
        self.tasks.push(TaskSlot {
            name: TaskName::new(name),
            handle: None,
            priority,
            state: TaskState::Ready,
            ready_seq,
            stack,
            housekeeping: false,
        });
        self.tasks.len() - 1
    }

    /// Priority the kernel will actually use for a requested `priority`.
    pub(crate) fn clamp_priority(&self, priority: Priority) -> Priority {
        priority.min(self.config.highest_priority())
    }

    /// Send `task` to the back of its priority level.
    pub(crate) fn rotate(&mut self, task: usize) {
        let seq = self.next_seq();
        self.tasks[task].ready_seq = seq;
    }

    pub(crate) fn set_state(&mut self, task: usize, state: TaskState) {
        let slot = &mut self.tasks[task];
        if slot.state == TaskState::Deleted {
            return;
        }
        slot.state = state;
        if state == TaskState::Ready {
            self.rotate(task);
        }
    }

    /// Make every delayed task whose wake tick has come ready.
    pub(crate) fn wake_sleepers(&mut self, now: u64) {
        for index in 0..self.tasks.len() {
            if let TaskState::Delayed { wake } = self.tasks[index].state {
                if wake <= now {
                    self.set_state(index, TaskState::Ready);
                }
            }
        }
    }

    /// Highest-priority ready task, longest-waiting first among equals.
    pub(crate) fn pick(&self) -> usize {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.state == TaskState::Ready && !task.housekeeping)
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.ready_seq.cmp(&a.ready_seq)))
            .map_or(IDLE, |(index, _)| index)
    }

    pub(crate) fn lookup(&self, handle: TaskHandle, index_hint: usize) -> Option<usize> {
        let slot = self.tasks.get(index_hint)?;
        (slot.handle == Some(handle) && slot.state != TaskState::Deleted).then_some(index_hint)
    }

    /// Tasks the kernel knows about, housekeeping included.
    pub(crate) fn task_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.state != TaskState::Deleted).count()
    }

    pub(crate) fn high_water(&self, task: usize) -> usize {
        let guard = guard_words(self.config.stack_overflow_check);
        self.tasks[task].stack.map_or(0, |stack| stack.high_water(guard))
    }

    /// Name of `task` if its stack guard has been overwritten.
    pub(crate) fn stack_overflowed(&self, task: usize) -> Option<TaskName> {
        let slot = &self.tasks[task];
        let stack = slot.stack?;
        stack.overflowed(self.config.stack_overflow_check).then_some(slot.name)
    }
}

/// Whether a task that last woke at `previous` must block to wake again
/// `increment` ticks later, given the counter reads `now`. Handles the tick
/// counter wrapping between the two.
pub(crate) fn should_delay(now: Tick, previous: Tick, increment: Tick) -> bool {
    let wake = previous.wrapping_add(increment);
    if now < previous {
        // the counter wrapped since `previous`
        wake < previous && wake > now
    } else {
        wake < previous || wake > now
    }
}
