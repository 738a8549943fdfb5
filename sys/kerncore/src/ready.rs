// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ready structures: the data structures that hold runnable tasks and answer
//! "who runs next?"
//!
//! Two interchangeable implementations are provided behind the
//! [`ReadyStructure`] trait:
//!
//! - [`ReadyTable`]: a priority bitmap plus a one-task-per-priority slot
//!   array. Selection is a single count-leading-zeros. There is no
//!   round-robin because ties cannot exist.
//! - [`ReadyList`]: a queue per priority with a rotating cursor and a
//!   per-slice countdown, permitting any number of tasks at the same
//!   priority.
//!
//! Each variant also fixes the representation of two satellite structures
//! that want to be keyed the same way the ready set is keyed: the waiter sets
//! of IPC primitives ([`WaitSet`]) and the wake-tick bookkeeping of delayed
//! tasks ([`DelayQueue`]). The scheduler is generic over the whole bundle.

use abi::{Priority, TaskId, MAX_PRIORITY};
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::uassert;

/// Error from [`ReadyStructure::attach`]: the variant cannot register another
/// task at the requested priority.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PriorityInUse;

/// A set of runnable tasks, plus the priority-loan mechanism the mutex uses
/// for inheritance.
///
/// Registration (`attach`/`detach`) tracks every live task; readiness
/// (`add`/`remove`) tracks the subset eligible to run. A task must be
/// attached before it can be made ready and must be detached only after it
/// has been removed from every other collection.
pub trait ReadyStructure: Default {
    /// Waiter-set representation used by IPC primitives under this variant.
    type Waiters: WaitSet;
    /// Delay-queue representation used by the scheduler under this variant.
    type Delay: DelayQueue;

    /// Registers a live task. The table variant refuses a second task at an
    /// occupied priority.
    fn attach(
        &mut self,
        id: TaskId,
        prio: Priority,
    ) -> Result<(), PriorityInUse>;

    /// Unregisters a task that is no longer in any collection.
    fn detach(&mut self, id: TaskId, prio: Priority);

    /// Makes an attached task eligible to run. `time_slice` is the
    /// round-robin budget to charge it with; the table variant ignores it.
    fn add(&mut self, id: TaskId, prio: Priority, time_slice: u32);

    /// Makes a task ineligible to run. Tolerates tasks that are not
    /// currently ready. Cancels any outstanding priority loan to `id`.
    fn remove(&mut self, id: TaskId, prio: Priority);

    /// The task that should run now, with the priority it is running at.
    /// `None` only before the idle task exists.
    fn highest_ready(&self) -> Option<(TaskId, Priority)>;

    /// Is `id` currently eligible to run (including via a loan)?
    fn contains(&self, id: TaskId, prio: Priority) -> bool;

    /// Charges one tick of time slice to the front of the top priority
    /// queue, rotating the cursor when the budget is spent. No-op for the
    /// table variant.
    fn rotate_on_tick(&mut self);

    /// Lends `at` to `owner` (registered and ready at `base`): the owner is
    /// pulled from its own priority and scheduled as if it were ready at
    /// `at`, so a lock holder can get ahead of the middle priorities. Only
    /// one loan can be outstanding at a time; re-lending to the same owner
    /// moves it.
    fn lend(&mut self, owner: TaskId, base: Priority, at: Priority);

    /// Ends a loan, re-entering `owner` at its own priority. No-op if the
    /// loan was already cancelled by `remove`.
    fn restore(&mut self, owner: TaskId, base: Priority, time_slice: u32);
}

/// Priority-ordered set of blocked tasks hanging off an IPC primitive.
///
/// Wake order is strictly by priority; the list variant breaks ties in
/// arrival order.
pub trait WaitSet: Default {
    fn insert(&mut self, prio: Priority, id: TaskId);
    fn remove(&mut self, prio: Priority, id: TaskId);
    fn contains(&self, prio: Priority, id: TaskId) -> bool;
    fn peek_highest(&self) -> Option<(Priority, TaskId)>;
    fn take_highest(&mut self) -> Option<(Priority, TaskId)>;
    fn is_empty(&self) -> bool;
}

/// Wake-tick bookkeeping for delayed tasks.
///
/// The scheduler keeps two of these -- one for wake times in the current
/// tick epoch and one for times past the wrap -- and swaps them when the
/// tick base rolls over. Comparisons inside a single queue are therefore
/// plain unsigned comparisons.
pub trait DelayQueue: Default {
    fn insert(&mut self, wake: u32, prio: Priority, id: TaskId);
    fn remove(&mut self, prio: Priority, id: TaskId);
    fn contains(&self, prio: Priority, id: TaskId) -> bool;
    /// Takes one task whose wake tick has arrived, or `None` if none is due.
    fn pop_due(&mut self, now: u32) -> Option<(TaskId, Priority)>;
    fn is_empty(&self) -> bool;
}

/// One bit per priority.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PrioMask(u32);

impl PrioMask {
    pub fn set(&mut self, prio: Priority) {
        self.0 |= 1 << prio.index();
    }

    pub fn clear(&mut self, prio: Priority) {
        self.0 &= !(1 << prio.index());
    }

    pub fn contains(&self, prio: Priority) -> bool {
        self.0 & (1 << prio.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Position of the most significant set bit.
    pub fn highest(&self) -> Option<Priority> {
        if self.0 == 0 {
            None
        } else {
            Some(Priority((31 - self.0.leading_zeros()) as u8))
        }
    }
}

/// Outstanding priority loan.
#[derive(Copy, Clone, Debug)]
struct Loan {
    owner: TaskId,
    at: Priority,
}

/// Bitmap ready structure: at most one task per priority, `O(1)` selection.
#[derive(Debug)]
pub struct ReadyTable {
    /// Bit *p* set iff the task of priority *p* is ready.
    ready: PrioMask,
    /// Live task registered at each priority, ready or not.
    slots: [Option<TaskId>; MAX_PRIORITY],
    /// Priority loan, if one is outstanding. While set, selection behaves as
    /// if `loan.owner` were ready at `loan.at`; its own ready bit is kept
    /// clear.
    loan: Option<Loan>,
}

impl Default for ReadyTable {
    fn default() -> Self {
        Self {
            ready: PrioMask::default(),
            slots: [None; MAX_PRIORITY],
            loan: None,
        }
    }
}

impl ReadyTable {
    fn slot(&self, prio: Priority) -> Option<TaskId> {
        self.slots[prio.index()]
    }
}

impl ReadyStructure for ReadyTable {
    type Waiters = TableWaiters;
    type Delay = DelayTable;

    fn attach(
        &mut self,
        id: TaskId,
        prio: Priority,
    ) -> Result<(), PriorityInUse> {
        if self.slots[prio.index()].is_some() {
            return Err(PriorityInUse);
        }
        self.slots[prio.index()] = Some(id);
        Ok(())
    }

    fn detach(&mut self, id: TaskId, prio: Priority) {
        uassert!(self.slots[prio.index()] == Some(id));
        uassert!(!self.ready.contains(prio));
        self.slots[prio.index()] = None;
    }

    fn add(&mut self, id: TaskId, prio: Priority, _time_slice: u32) {
        uassert!(self.slots[prio.index()] == Some(id));
        self.ready.set(prio);
    }

    fn remove(&mut self, id: TaskId, prio: Priority) {
        if self.slots[prio.index()] == Some(id) {
            self.ready.clear(prio);
        }
        if let Some(l) = self.loan {
            if l.owner == id {
                self.loan = None;
            }
        }
    }

    fn highest_ready(&self) -> Option<(TaskId, Priority)> {
        let bit = self.ready.highest();
        match (self.loan, bit) {
            // A real ready task at or above the lent priority beats the
            // borrower; this is what lets a waiter that just timed out (and
            // so woke at the very priority it was lending) run its cleanup.
            (Some(l), Some(p)) if !l.at.is_more_important_than(p) => {
                Some((self.slot(p)?, p))
            }
            (Some(l), _) => Some((l.owner, l.at)),
            (None, Some(p)) => Some((self.slot(p)?, p)),
            (None, None) => None,
        }
    }

    fn contains(&self, id: TaskId, prio: Priority) -> bool {
        if let Some(l) = self.loan {
            if l.owner == id {
                return true;
            }
        }
        self.slots[prio.index()] == Some(id) && self.ready.contains(prio)
    }

    fn rotate_on_tick(&mut self) {
        // Single occupancy: nothing to rotate.
    }

    fn lend(&mut self, owner: TaskId, base: Priority, at: Priority) {
        if let Some(l) = self.loan {
            uassert!(l.owner == owner);
        }
        self.ready.clear(base);
        self.loan = Some(Loan { owner, at });
    }

    fn restore(&mut self, owner: TaskId, base: Priority, _time_slice: u32) {
        if let Some(l) = self.loan {
            if l.owner == owner {
                self.loan = None;
                self.ready.set(base);
            }
        }
    }
}

/// Waiter set for the table variant: a priority bitmap plus the identity of
/// the (single) task registered at each priority.
#[derive(Debug)]
pub struct TableWaiters {
    mask: PrioMask,
    ids: [TaskId; MAX_PRIORITY],
}

impl Default for TableWaiters {
    fn default() -> Self {
        Self {
            mask: PrioMask::default(),
            ids: [TaskId(0); MAX_PRIORITY],
        }
    }
}

impl WaitSet for TableWaiters {
    fn insert(&mut self, prio: Priority, id: TaskId) {
        uassert!(!self.mask.contains(prio));
        self.mask.set(prio);
        self.ids[prio.index()] = id;
    }

    fn remove(&mut self, prio: Priority, id: TaskId) {
        if self.mask.contains(prio) && self.ids[prio.index()] == id {
            self.mask.clear(prio);
        }
    }

    fn contains(&self, prio: Priority, id: TaskId) -> bool {
        self.mask.contains(prio) && self.ids[prio.index()] == id
    }

    fn peek_highest(&self) -> Option<(Priority, TaskId)> {
        let p = self.mask.highest()?;
        Some((p, self.ids[p.index()]))
    }

    fn take_highest(&mut self) -> Option<(Priority, TaskId)> {
        let hit = self.peek_highest()?;
        self.mask.clear(hit.0);
        Some(hit)
    }

    fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }
}

/// Delay bookkeeping for the table variant: one wake slot per priority.
#[derive(Debug)]
pub struct DelayTable {
    slots: [Option<DelaySlot>; MAX_PRIORITY],
}

#[derive(Copy, Clone, Debug)]
struct DelaySlot {
    wake: u32,
    id: TaskId,
}

impl Default for DelayTable {
    fn default() -> Self {
        Self {
            slots: [None; MAX_PRIORITY],
        }
    }
}

impl DelayQueue for DelayTable {
    fn insert(&mut self, wake: u32, prio: Priority, id: TaskId) {
        uassert!(self.slots[prio.index()].is_none());
        self.slots[prio.index()] = Some(DelaySlot { wake, id });
    }

    fn remove(&mut self, prio: Priority, id: TaskId) {
        if let Some(s) = self.slots[prio.index()] {
            if s.id == id {
                self.slots[prio.index()] = None;
            }
        }
    }

    fn contains(&self, prio: Priority, id: TaskId) -> bool {
        matches!(self.slots[prio.index()], Some(s) if s.id == id)
    }

    fn pop_due(&mut self, now: u32) -> Option<(TaskId, Priority)> {
        // Highest priority wakes first.
        for p in (0..MAX_PRIORITY).rev() {
            if let Some(s) = self.slots[p] {
                if now >= s.wake {
                    self.slots[p] = None;
                    return Some((s.id, Priority(p as u8)));
                }
            }
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }
}

/// List ready structure: a queue per priority with round-robin time slicing.
#[derive(Debug)]
pub struct ReadyList {
    queues: [PrioQueue; MAX_PRIORITY],
    loan: Option<Loan>,
}

#[derive(Debug, Default)]
struct PrioQueue {
    /// Ready tasks at this priority. The front is the round-robin cursor:
    /// the task that runs when this is the top non-empty priority.
    tasks: VecDeque<Entry>,
    /// Ticks left before the cursor advances past the current front.
    slice_left: u32,
}

#[derive(Copy, Clone, Debug)]
struct Entry {
    id: TaskId,
    time_slice: u32,
}

impl Default for ReadyList {
    fn default() -> Self {
        Self {
            queues: core::array::from_fn(|_| PrioQueue::default()),
            loan: None,
        }
    }
}

impl ReadyList {
    fn top_queue(&self) -> Option<usize> {
        (0..MAX_PRIORITY).rev().find(|&p| !self.queues[p].tasks.is_empty())
    }

    /// Removes `id` from the queue at `prio`, fixing up the slice countdown
    /// if the cursor pointed at it. Returns the removed entry.
    fn unlink(&mut self, id: TaskId, prio: Priority) -> Option<Entry> {
        let q = &mut self.queues[prio.index()];
        let pos = q.tasks.iter().position(|e| e.id == id)?;
        let entry = q.tasks.remove(pos)?;
        if pos == 0 {
            q.slice_left =
                q.tasks.front().map(|e| e.time_slice).unwrap_or(0);
        }
        Some(entry)
    }
}

impl ReadyStructure for ReadyList {
    type Waiters = ListWaiters;
    type Delay = DelayList;

    fn attach(
        &mut self,
        _id: TaskId,
        _prio: Priority,
    ) -> Result<(), PriorityInUse> {
        // Any number of tasks may share a priority.
        Ok(())
    }

    fn detach(&mut self, id: TaskId, prio: Priority) {
        uassert!(!self.contains(id, prio));
    }

    fn add(&mut self, id: TaskId, prio: Priority, time_slice: u32) {
        uassert!(!self.contains(id, prio));
        let q = &mut self.queues[prio.index()];
        if q.tasks.is_empty() {
            q.slice_left = time_slice;
        }
        q.tasks.push_back(Entry { id, time_slice });
    }

    fn remove(&mut self, id: TaskId, prio: Priority) {
        if let Some(l) = self.loan {
            if l.owner == id {
                self.loan = None;
                self.unlink(id, l.at);
                return;
            }
        }
        self.unlink(id, prio);
    }

    fn highest_ready(&self) -> Option<(TaskId, Priority)> {
        let p = self.top_queue()?;
        let e = self.queues[p].tasks.front()?;
        Some((e.id, Priority(p as u8)))
    }

    fn contains(&self, id: TaskId, prio: Priority) -> bool {
        if let Some(l) = self.loan {
            if l.owner == id {
                return self.queues[l.at.index()]
                    .tasks
                    .iter()
                    .any(|e| e.id == id);
            }
        }
        self.queues[prio.index()].tasks.iter().any(|e| e.id == id)
    }

    fn rotate_on_tick(&mut self) {
        let Some(p) = self.top_queue() else { return };
        let q = &mut self.queues[p];
        if q.slice_left > 0 {
            q.slice_left -= 1;
        } else if let Some(front) = q.tasks.pop_front() {
            q.tasks.push_back(front);
            q.slice_left = q.tasks.front().map(|e| e.time_slice).unwrap_or(0);
        }
    }

    fn lend(&mut self, owner: TaskId, base: Priority, at: Priority) {
        if let Some(l) = self.loan {
            uassert!(l.owner == owner);
            self.loan = None;
            if let Some(e) = self.unlink(owner, l.at) {
                self.place_loaned(e, at);
            }
            self.loan = Some(Loan { owner, at });
            return;
        }
        if let Some(e) = self.unlink(owner, base) {
            self.place_loaned(e, at);
            self.loan = Some(Loan { owner, at });
        }
    }

    fn restore(&mut self, owner: TaskId, base: Priority, time_slice: u32) {
        if let Some(l) = self.loan {
            if l.owner == owner {
                self.loan = None;
                if self.unlink(owner, l.at).is_some() {
                    self.add(owner, base, time_slice);
                }
            }
        }
    }
}

impl ReadyList {
    /// Puts a loaned entry at the cursor of the elevated priority so the
    /// owner runs next within it.
    fn place_loaned(&mut self, e: Entry, at: Priority) {
        let q = &mut self.queues[at.index()];
        q.slice_left = e.time_slice;
        q.tasks.push_front(e);
    }
}

/// Waiter set for the list variant: priority-ordered, arrival order within a
/// priority.
#[derive(Debug, Default)]
pub struct ListWaiters(Vec<(Priority, TaskId)>);

impl WaitSet for ListWaiters {
    fn insert(&mut self, prio: Priority, id: TaskId) {
        uassert!(!self.contains(prio, id));
        let pos = self
            .0
            .iter()
            .position(|&(p, _)| prio.is_more_important_than(p))
            .unwrap_or(self.0.len());
        self.0.insert(pos, (prio, id));
    }

    fn remove(&mut self, prio: Priority, id: TaskId) {
        self.0.retain(|&e| e != (prio, id));
    }

    fn contains(&self, prio: Priority, id: TaskId) -> bool {
        self.0.contains(&(prio, id))
    }

    fn peek_highest(&self) -> Option<(Priority, TaskId)> {
        self.0.first().copied()
    }

    fn take_highest(&mut self) -> Option<(Priority, TaskId)> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Delay bookkeeping for the list variant: kept sorted by wake tick, earliest
/// first, arrival order among equals.
#[derive(Debug, Default)]
pub struct DelayList(Vec<DelayEntry>);

#[derive(Copy, Clone, Debug)]
struct DelayEntry {
    wake: u32,
    prio: Priority,
    id: TaskId,
}

impl DelayQueue for DelayList {
    fn insert(&mut self, wake: u32, prio: Priority, id: TaskId) {
        uassert!(!self.contains(prio, id));
        let pos = self
            .0
            .iter()
            .position(|e| e.wake > wake)
            .unwrap_or(self.0.len());
        self.0.insert(pos, DelayEntry { wake, prio, id });
    }

    fn remove(&mut self, _prio: Priority, id: TaskId) {
        self.0.retain(|e| e.id != id);
    }

    fn contains(&self, _prio: Priority, id: TaskId) -> bool {
        self.0.iter().any(|e| e.id == id)
    }

    fn pop_due(&mut self, now: u32) -> Option<(TaskId, Priority)> {
        let first = self.0.first()?;
        if now >= first.wake {
            let e = self.0.remove(0);
            Some((e.id, e.prio))
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
