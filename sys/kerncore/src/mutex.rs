// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mutexes: binary semaphore semantics plus owner tracking and priority
//! inheritance.
//!
//! The blocking protocol is the same two-phase begin/finish split as the
//! semaphore's (see [`crate::sem`]); unlock hands the lock directly to the
//! highest-priority waiter, making it the new owner before it even runs.
//!
//! Inheritance: when a waiter outranks the owner, the owner is lent the
//! waiter's priority through the ready structure, so it can get ahead of the
//! middle priorities and reach its unlock. The mutex remembers the loan and
//! ends it on unlock -- or re-lends at the next-highest waiter's priority if
//! the lending waiter gives up first.
//!
//! Mutexes are not recursive. Re-acquiring a held mutex, or unlocking one
//! from a task that does not own it, trips an assertion.

use abi::{MutexId, Priority, StateSet};

use crate::ipc::TakeBegin;
use crate::ready::{ReadyStructure, WaitSet};
use crate::sched::Kernel;
use crate::task::Blocker;
use crate::uassert;

/// Mutex state. Waiter representation follows the ready-structure variant.
#[derive(Debug)]
pub(crate) struct Mutex<W> {
    pub(crate) locked: bool,
    pub(crate) owner: Option<abi::TaskId>,
    pub(crate) waiters: W,
    /// Priority currently lent to the owner, if inheritance is in effect.
    pub(crate) lent_at: Option<Priority>,
}

impl<R: ReadyStructure> Kernel<R> {
    pub fn mutex_create(&mut self) -> MutexId {
        let m = Mutex {
            locked: false,
            owner: None,
            waiters: R::Waiters::default(),
            lent_at: None,
        };
        let index = match self.mutexes.iter().position(|s| s.is_none()) {
            Some(i) => {
                self.mutexes[i] = Some(m);
                i
            }
            None => {
                self.mutexes.push(Some(m));
                self.mutexes.len() - 1
            }
        };
        MutexId(index as u16)
    }

    /// Destroys a mutex. It must be unlocked and have no waiters.
    pub fn mutex_delete(&mut self, id: MutexId) {
        let m = self.mutex_mut(id);
        uassert!(!m.locked && m.waiters.is_empty());
        self.mutexes[id.0 as usize] = None;
    }

    pub(crate) fn mutex_mut(&mut self, id: MutexId) -> &mut Mutex<R::Waiters> {
        match self.mutexes.get_mut(id.0 as usize).and_then(|m| m.as_mut()) {
            Some(m) => m,
            None => panic!("bad mutex handle"),
        }
    }

    /// First half of a lock. On the blocking path this is also where
    /// priority inheritance kicks in.
    pub fn mutex_lock_begin(&mut self, id: MutexId, ticks: u32) -> TakeBegin {
        let caller = self.current();
        let m = self.mutex_mut(id);
        if !m.locked {
            m.locked = true;
            m.owner = Some(caller);
            return TakeBegin::Acquired;
        }
        // Not recursive; a second acquire by the owner would sleep forever.
        uassert!(m.owner != Some(caller));
        if ticks == 0 {
            return TakeBegin::Failed;
        }

        let t = self.task_mut(caller);
        let prio = t.priority();
        t.state.insert(StateSet::BLOCK);
        t.blocker = Some(Blocker::Mutex(id));
        let m = self.mutex_mut(id);
        m.waiters.insert(prio, caller);

        // If the owner is less important than us, lend it our priority so it
        // can finish its critical section.
        let owner = match m.owner {
            Some(o) => o,
            None => panic!("locked mutex with no owner"),
        };
        let lent = m.lent_at;
        let owner_effective = lent.unwrap_or(self.task_ref(owner).priority());
        if prio.is_more_important_than(owner_effective) {
            self.mutex_mut(id).lent_at = Some(prio);
            self.priority_lend(owner, prio);
        }

        self.delay_current(caller, ticks);
        TakeBegin::Blocked
    }

    /// Second half of a lock, run after the caller has been rescheduled.
    pub fn mutex_lock_finish(&mut self, id: MutexId) -> bool {
        let caller = self.current();
        let t = self.task_mut(caller);
        if t.state.contains(StateSet::BLOCK) {
            // Timed out. Withdraw, and stop borrowing this waiter's
            // priority if it was the one being lent.
            let prio = t.priority;
            t.state.remove(StateSet::BLOCK);
            t.blocker = None;
            let m = self.mutex_mut(id);
            m.waiters.remove(prio, caller);
            if m.lent_at == Some(prio) {
                self.relend_after_withdrawal(id);
            }
            false
        } else {
            // Unlock already made us the owner.
            true
        }
    }

    /// Recomputes the loan after the lending waiter withdrew: either lend at
    /// the next-highest waiter's priority or end the loan.
    fn relend_after_withdrawal(&mut self, id: MutexId) {
        let m = self.mutex_mut(id);
        let owner = match m.owner {
            Some(o) => o,
            None => panic!("locked mutex with no owner"),
        };
        let next = m.waiters.peek_highest();
        let base = self.task_ref(owner).priority();
        match next {
            Some((wp, _)) if wp.is_more_important_than(base) => {
                self.mutex_mut(id).lent_at = Some(wp);
                self.priority_lend(owner, wp);
            }
            _ => {
                self.mutex_mut(id).lent_at = None;
                self.priority_restore(owner);
            }
        }
    }

    /// Unlocks. Any lent priority is returned first; then the lock is
    /// handed to the highest-priority waiter (which may preempt the caller)
    /// or simply released.
    pub fn mutex_unlock(&mut self, id: MutexId) -> bool {
        let caller = self.current();
        let m = self.mutex_mut(id);
        uassert!(m.locked);
        uassert!(m.owner == Some(caller));

        if m.lent_at.take().is_some() {
            self.priority_restore(caller);
        }

        let m = self.mutex_mut(id);
        if let Some((_prio, waiter)) = m.waiters.take_highest() {
            m.owner = Some(waiter);
            self.unblock(waiter);
        } else {
            m.locked = false;
            m.owner = None;
        }
        true
    }
}
