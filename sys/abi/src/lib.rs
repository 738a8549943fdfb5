// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared type vocabulary for the kernel.
//!
//! These definitions are used by the scheduler core, the port layer, and any
//! host-side tooling that wants to talk about tasks, so they live in their own
//! dependency-light crate.

#![no_std]

use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of distinct task priorities.
///
/// The bitmap ready structure records one priority per bit of a `u32`, so this
/// cannot exceed 32 without changing the mask type.
pub const MAX_PRIORITY: usize = 32;

/// Indicates the scheduling priority of a task.
///
/// Priorities are small numbers starting from zero. Numerically *higher*
/// priorities are more important: priority 0 is the idle task, and the
/// runnable task with the largest priority number runs.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`,
/// to keep us from confusing ourselves on whether `>` means numerically
/// greater / less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// The idle task's priority. A scheduler always keeps exactly one task
    /// here so that selection never comes up empty.
    pub const IDLE: Self = Priority(0);

    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities directly.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }

    /// Index of this priority into per-priority tables.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// Names a particular incarnation of a task.
///
/// A `TaskId` combines two fields, a task index and a generation number. The
/// generation number of an index is incremented when the idle task reaps a
/// deleted task that used it, so that a handle held past deletion is detected
/// as stale instead of quietly naming whatever task reuses the slot.
///
/// The task index is in the lower `TaskId::INDEX_BITS` bits, the generation in
/// the remaining top bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u16);

impl TaskId {
    /// Number of bits in a `TaskId` used to represent task index, rather than
    /// generation number.
    pub const INDEX_BITS: u32 = 10;

    /// Derived mask of the index bits portion.
    pub const INDEX_MASK: u16 = (1 << Self::INDEX_BITS) - 1;

    /// Fabricates a `TaskId` for a known index and generation number.
    pub const fn for_index_and_gen(index: usize, gen: Generation) -> Self {
        TaskId(
            (index as u16 & Self::INDEX_MASK)
                | (gen.0 as u16) << Self::INDEX_BITS,
        )
    }

    /// Extracts the index part of this ID.
    pub fn index(&self) -> usize {
        usize::from(self.0 & Self::INDEX_MASK)
    }

    /// Extracts the generation part of this ID.
    pub fn generation(&self) -> Generation {
        Generation((self.0 >> Self::INDEX_BITS) as u8)
    }
}

/// Type used to track generation numbers.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Generation(u8);

impl Generation {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        const MASK: u16 = 0xFFFF << TaskId::INDEX_BITS >> TaskId::INDEX_BITS;
        Generation(self.0.wrapping_add(1) & MASK as u8)
    }
}

impl From<u8> for Generation {
    fn from(x: u8) -> Self {
        Self(x)
    }
}

/// The five scheduling states a task can occupy.
///
/// These index per-state bookkeeping tables, so the discriminants are
/// explicit. A task can be in more than one state at a time -- see
/// [`StateSet`] -- which is why operations deal in state *sets* rather than a
/// single tag.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaskState {
    /// Eligible to run.
    Ready = 0,
    /// Parked until a wake tick arrives.
    Delay = 1,
    /// Waiting on an IPC primitive.
    Block = 2,
    /// Explicitly suspended; ignored by the scheduler until resumed.
    Suspend = 3,
    /// Deleted, storage not yet reclaimed by the idle task.
    Dead = 4,
}

impl TaskState {
    pub const COUNT: usize = 5;

    pub fn index(self) -> usize {
        self as usize
    }
}

bitflags::bitflags! {
    /// Set of [`TaskState`]s a task currently occupies.
    ///
    /// Most states are mutually exclusive, but a task blocked on an IPC
    /// primitive with a timeout is in `BLOCK | DELAY`, and a task whose
    /// timeout has fired but which has not yet resumed is briefly in
    /// `BLOCK | READY`. `READY` never coexists with `SUSPEND` or `DEAD`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct StateSet: u8 {
        const READY = 1 << TaskState::Ready as u8;
        const DELAY = 1 << TaskState::Delay as u8;
        const BLOCK = 1 << TaskState::Block as u8;
        const SUSPEND = 1 << TaskState::Suspend as u8;
        const DEAD = 1 << TaskState::Dead as u8;
    }
}

impl From<TaskState> for StateSet {
    fn from(s: TaskState) -> Self {
        StateSet::from_bits_truncate(1 << s as u8)
    }
}

/// Record describing a task to be created.
///
/// The entry point and its argument are not part of this record: they only
/// matter to the port layer, which consumes them while fabricating the initial
/// stack frame.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct TaskDesc {
    /// Stack size, in 32-bit words.
    pub stack_words: usize,
    /// Scheduling priority.
    pub priority: Priority,
    /// Number of ticks this task keeps the CPU before the round-robin cursor
    /// moves on to a peer of equal priority. Ignored by the bitmap ready
    /// structure, which permits one task per priority.
    pub time_slice: u32,
}

/// Handle to a counting semaphore.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SemId(pub u16);

/// Handle to a mutex.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MutexId(pub u16);

/// Handle to a readers/writers lock.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RwLockId(pub u16);

/// Why task creation failed.
///
/// Creation is all-or-nothing: on error, neither the control block nor the
/// stack remains allocated.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CreateError {
    /// The heap could not supply the requested stack (or grow the task
    /// table).
    OutOfMemory,
    /// The bitmap ready structure holds at most one task per priority, and
    /// the requested priority is occupied.
    PriorityInUse,
}

/// Why an operation on a task handle failed.
///
/// Task handles are generation-checked, so going through a stale one is
/// reported rather than trapped. IPC handles are capabilities with no
/// generation; misusing one is a programming error and trips a kernel
/// assertion instead.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskError {
    /// The handle's index is out of range, names an empty slot, or carries a
    /// stale generation.
    BadHandle,
}
