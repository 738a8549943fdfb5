// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Counting semaphores.
//!
//! A blocking take spans a context switch, so it cannot be a single kernel
//! call. It is split in two: [`Kernel::sem_take_begin`] runs in the caller's
//! critical section and either settles the matter or enrolls the caller as a
//! waiter; the port then waits out the reschedule, and
//! [`Kernel::sem_take_finish`] inspects how the task came back -- still
//! marked Block means the timeout fired, anything else means a releaser
//! handed over the permit. The composition lives in [`crate::ipc`].
//!
//! Release uses direct hand-off: when a waiter is woken, the permit moves to
//! it without ever passing through `value`, so a third task can never slip
//! in and steal it between the release and the waiter's resumption. `value`
//! is only incremented when nobody is waiting.

use abi::{SemId, StateSet};

use crate::ipc::TakeBegin;
use crate::ready::{ReadyStructure, WaitSet};
use crate::sched::Kernel;
use crate::task::Blocker;
use crate::uassert;

/// Semaphore state. Waiter representation follows the ready-structure
/// variant.
#[derive(Debug)]
pub(crate) struct Sem<W> {
    pub(crate) value: u32,
    pub(crate) waiters: W,
}

impl<R: ReadyStructure> Kernel<R> {
    /// Creates a counting semaphore holding `initial` permits.
    pub fn sem_create(&mut self, initial: u32) -> SemId {
        let sem = Sem {
            value: initial,
            waiters: R::Waiters::default(),
        };
        let index = match self.sems.iter().position(|s| s.is_none()) {
            Some(i) => {
                self.sems[i] = Some(sem);
                i
            }
            None => {
                self.sems.push(Some(sem));
                self.sems.len() - 1
            }
        };
        SemId(index as u16)
    }

    /// Destroys a semaphore. Destroying one that still has waiters is a
    /// caller error and trips an assertion.
    pub fn sem_delete(&mut self, id: SemId) {
        let s = self.sem_mut(id);
        uassert!(s.waiters.is_empty());
        self.sems[id.0 as usize] = None;
    }

    /// Current permit count. Mostly interesting to tests and diagnostics.
    pub fn sem_value(&self, id: SemId) -> u32 {
        match self.sems[id.0 as usize].as_ref() {
            Some(s) => s.value,
            None => panic!("bad semaphore handle"),
        }
    }

    pub(crate) fn sem_mut(&mut self, id: SemId) -> &mut Sem<R::Waiters> {
        match self.sems.get_mut(id.0 as usize).and_then(|s| s.as_mut()) {
            Some(s) => s,
            None => panic!("bad semaphore handle"),
        }
    }

    /// First half of a take. Fast path decrements; `ticks == 0` is try-take;
    /// otherwise the caller is enrolled as a waiter and parked with a
    /// timeout.
    pub fn sem_take_begin(&mut self, id: SemId, ticks: u32) -> TakeBegin {
        let s = self.sem_mut(id);
        if s.value > 0 {
            s.value -= 1;
            return TakeBegin::Acquired;
        }
        if ticks == 0 {
            return TakeBegin::Failed;
        }
        let caller = self.current();
        let t = self.task_mut(caller);
        let prio = t.priority();
        t.state.insert(StateSet::BLOCK);
        t.blocker = Some(Blocker::Sem(id));
        self.sem_mut(id).waiters.insert(prio, caller);
        self.delay_current(caller, ticks);
        TakeBegin::Blocked
    }

    /// Second half of a take, run after the caller has been rescheduled.
    /// Returns whether the permit was obtained.
    pub fn sem_take_finish(&mut self, id: SemId) -> bool {
        let caller = self.current();
        let t = self.task_mut(caller);
        if t.state.contains(StateSet::BLOCK) {
            // The wait timed out: nobody handed us the permit. Withdraw.
            let prio = t.priority;
            t.state.remove(StateSet::BLOCK);
            t.blocker = None;
            self.sem_mut(id).waiters.remove(prio, caller);
            false
        } else {
            // A releaser picked us: the permit came with the wake-up.
            true
        }
    }

    /// Releases a permit. If anyone is waiting, the highest-priority waiter
    /// is woken and receives the permit directly (possibly preempting the
    /// caller); otherwise the count goes up. Callable from interrupt
    /// handlers that run at or below the kernel's interrupt priority.
    pub fn sem_release(&mut self, id: SemId) -> bool {
        if let Some((_prio, waiter)) = self.sem_mut(id).waiters.take_highest()
        {
            self.unblock(waiter);
        } else {
            let s = self.sem_mut(id);
            s.value += 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ready::ReadyTable;
    use abi::{Priority, TaskDesc, TaskId};

    fn spawn(k: &mut Kernel<ReadyTable>, prio: u8) -> TaskId {
        k.task_create(
            TaskDesc {
                stack_words: 8,
                priority: Priority(prio),
                time_slice: 0,
            },
            |_| 0,
        )
        .unwrap()
    }

    fn booted() -> (Kernel<ReadyTable>, TaskId) {
        let mut k = Kernel::new();
        let idle = spawn(&mut k, 0);
        (k, idle)
    }

    #[test]
    fn fast_path_and_try_take() {
        let (mut k, _) = booted();
        spawn(&mut k, 3);
        k.start();
        k.switch_context();
        let s = k.sem_create(2);

        assert_eq!(k.sem_take_begin(s, 0), TakeBegin::Acquired);
        assert_eq!(k.sem_take_begin(s, 0), TakeBegin::Acquired);
        assert_eq!(k.sem_take_begin(s, 0), TakeBegin::Failed);
        assert_eq!(k.sem_value(s), 0);
        k.sem_release(s);
        assert_eq!(k.sem_value(s), 1);
        k.validate();
    }

    #[test]
    fn timeout_leaves_no_trace() {
        let (mut k, idle) = booted();
        let a = spawn(&mut k, 3);
        k.start();
        k.switch_context();
        let s = k.sem_create(0);

        assert_eq!(k.sem_take_begin(s, 50), TakeBegin::Blocked);
        assert_eq!(k.switch_context(), idle);
        k.validate();

        // Tick 1..=49: still asleep.
        for _ in 0..49 {
            k.check_ticks();
            assert_eq!(k.switch_context(), idle);
        }
        // Tick 50: timeout fires, the waiter runs again...
        k.check_ticks();
        assert_eq!(k.switch_context(), a);
        // ...and reports failure, withdrawing from the waiter set.
        assert!(!k.sem_take_finish(s));
        assert_eq!(k.sem_value(s), 0);
        k.validate();

        // A later release finds no waiters and just increments.
        k.sem_release(s);
        assert_eq!(k.sem_value(s), 1);
        k.validate();
    }

    #[test]
    fn release_hands_off_to_highest_waiter() {
        let (mut k, _) = booted();
        let lo = spawn(&mut k, 2);
        let hi = spawn(&mut k, 4);
        let s = k.sem_create(0);
        k.start();

        // hi runs first and blocks.
        assert_eq!(k.switch_context(), hi);
        assert_eq!(k.sem_take_begin(s, 100), TakeBegin::Blocked);
        // then lo blocks too.
        assert_eq!(k.switch_context(), lo);
        assert_eq!(k.sem_take_begin(s, 100), TakeBegin::Blocked);
        k.validate();

        // Release from elsewhere wakes hi -- the more important waiter --
        // and the permit never becomes visible in the count.
        k.sem_release(s);
        assert_eq!(k.sem_value(s), 0);
        assert_eq!(k.switch_context(), hi);
        assert!(k.sem_take_finish(s));
        k.validate();

        // lo is still parked.
        assert!(k.task(lo).unwrap().state().contains(StateSet::BLOCK));
        k.sem_release(s);
        k.switch_context();
        k.validate();
    }

    #[test]
    fn release_after_timeout_wake_still_succeeds() {
        // The window where a timeout has made the waiter Ready but it has
        // not yet run its finish half: a release in that window must count
        // as success, not double-wake.
        let (mut k, _) = booted();
        let a = spawn(&mut k, 3);
        k.start();
        k.switch_context();
        let s = k.sem_create(0);

        assert_eq!(k.sem_take_begin(s, 1), TakeBegin::Blocked);
        k.switch_context();
        k.check_ticks(); // timeout: a is Ready but still Block
        k.sem_release(s); // still in the waiter set, so this hands off
        assert_eq!(k.switch_context(), a);
        assert!(k.sem_take_finish(s));
        assert_eq!(k.sem_value(s), 0);
        k.validate();
    }

    #[test]
    fn deleting_blocked_task_clears_waiter_entry() {
        let (mut k, idle) = booted();
        let a = spawn(&mut k, 3);
        k.start();
        k.switch_context();
        let s = k.sem_create(0);

        assert_eq!(k.sem_take_begin(s, 100), TakeBegin::Blocked);
        assert_eq!(k.switch_context(), idle);
        k.task_delete(a).unwrap();
        k.validate();

        // No dangling waiter: release increments instead of waking a ghost.
        k.sem_release(s);
        assert_eq!(k.sem_value(s), 1);
        assert!(k.reap_one());
        k.validate();
        k.sem_delete(s);
    }
}
