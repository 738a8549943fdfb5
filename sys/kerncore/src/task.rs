// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task control blocks.

use abi::{MutexId, Priority, SemId, StateSet};
use alloc::boxed::Box;

/// Pattern written into every word of a freshly allocated stack, so that a
/// debugger can estimate the high-water mark later.
pub const STACK_FILL: u32 = 0x5afe_57ac;

/// Internal representation of a task.
///
/// The fields of this struct are private to this crate so that the scheduler
/// can maintain its invariants -- above all, that a task's [`StateSet`] and
/// its membership in the various collections never disagree outside a
/// critical section.
///
/// The control block owns its stack. Both are freed together when the idle
/// task reaps the slot after deletion.
#[repr(C)] // so the location of stack_top is predictable
#[derive(Debug, PartialEq)]
pub struct Task {
    /// Current top of this task's stack, as a machine address. The context
    /// switch trampoline stores the saved-register frame pointer here on the
    /// way out and reads it back on the way in.
    // NOTE: it is critical that this field appear first!
    pub(crate) stack_top: usize,

    /// Backing storage for the stack. Never accessed by the core after
    /// creation; the port and the hardware own its contents.
    pub(crate) stack: Box<[u32]>,

    /// Scheduling priority. Fixed for the life of the task: priority
    /// inheritance is expressed inside the ready structure, not here.
    pub(crate) priority: Priority,

    /// Which states this task currently occupies.
    pub(crate) state: StateSet,

    /// Round-robin budget, in ticks, for the list ready structure.
    pub(crate) time_slice: u32,

    /// The IPC primitive this task is blocked on, if any. Kept so that
    /// deleting a blocked task can pull its entry out of the primitive's
    /// waiter set instead of leaving it dangling.
    pub(crate) blocker: Option<Blocker>,
}

/// Back-reference from a blocked task to the primitive holding it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Blocker {
    Sem(SemId),
    Mutex(MutexId),
}

impl Task {
    /// Returns this task's priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the set of states this task currently occupies.
    pub fn state(&self) -> StateSet {
        self.state
    }

    /// Returns the configured round-robin budget.
    pub fn time_slice(&self) -> u32 {
        self.time_slice
    }

    /// Returns the stack-top address as last recorded by the switch
    /// trampoline (or fabricated at creation).
    pub fn stack_top(&self) -> usize {
        self.stack_top
    }

    /// Words of stack still carrying the fill pattern, counted from the
    /// bottom. A rough high-water mark for diagnostics.
    pub fn stack_headroom(&self) -> usize {
        self.stack.iter().take_while(|&&w| w == STACK_FILL).count()
    }
}
