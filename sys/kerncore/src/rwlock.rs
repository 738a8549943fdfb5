// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Readers/writers lock state.
//!
//! The lock composes four semaphores -- `read` and `write` as event
//! channels, `w_guard` for writer mutual exclusion, `c_guard` protecting the
//! counters -- plus the four counters themselves. The policy favors
//! writers: once a writer is waiting, new readers queue up on `read` until a
//! writer burst fully drains, and `write_release` then re-admits every
//! queued reader at once.
//!
//! Only the counter arithmetic lives here; the blocking sequences that
//! string the semaphore operations together are in [`crate::ipc`], next to
//! the other compositions, because each step is its own critical section.

use abi::{RwLockId, SemId};

use crate::ready::ReadyStructure;
use crate::sched::Kernel;
use crate::uassert;

#[derive(Debug)]
pub(crate) struct RwLock {
    pub(crate) read: SemId,
    pub(crate) write: SemId,
    pub(crate) w_guard: SemId,
    pub(crate) c_guard: SemId,
    /// Readers that have asked for the lock and not yet released it.
    pub(crate) active_readers: u32,
    /// Readers holding a `read` ticket (granted or queued for them).
    pub(crate) reading_readers: u32,
    /// Writers that have asked for the lock and not yet released it.
    pub(crate) active_writers: u32,
    /// Writers holding a `write` ticket.
    pub(crate) writing_writers: u32,
}

/// The semaphore handles backing one rw-lock, copied out so compositions can
/// operate without re-borrowing the kernel.
#[derive(Copy, Clone, Debug)]
pub struct RwSems {
    pub read: SemId,
    pub write: SemId,
    pub w_guard: SemId,
    pub c_guard: SemId,
}

impl<R: ReadyStructure> Kernel<R> {
    pub fn rwlock_create(&mut self) -> RwLockId {
        let lock = RwLock {
            read: self.sem_create(0),
            write: self.sem_create(0),
            w_guard: self.sem_create(1),
            c_guard: self.sem_create(1),
            active_readers: 0,
            reading_readers: 0,
            active_writers: 0,
            writing_writers: 0,
        };
        let index = match self.rwlocks.iter().position(|s| s.is_none()) {
            Some(i) => {
                self.rwlocks[i] = Some(lock);
                i
            }
            None => {
                self.rwlocks.push(Some(lock));
                self.rwlocks.len() - 1
            }
        };
        RwLockId(index as u16)
    }

    /// Destroys an idle rw-lock and its semaphores.
    pub fn rwlock_delete(&mut self, id: RwLockId) {
        let l = self.rwlock_mut(id);
        uassert!(l.active_readers == 0 && l.active_writers == 0);
        let sems = [l.read, l.write, l.w_guard, l.c_guard];
        self.rwlocks[id.0 as usize] = None;
        for s in sems {
            self.sem_delete(s);
        }
    }

    pub(crate) fn rwlock_mut(&mut self, id: RwLockId) -> &mut RwLock {
        match self.rwlocks.get_mut(id.0 as usize).and_then(|l| l.as_mut()) {
            Some(l) => l,
            None => panic!("bad rwlock handle"),
        }
    }

    pub fn rwlock_sems(&mut self, id: RwLockId) -> RwSems {
        let l = self.rwlock_mut(id);
        RwSems {
            read: l.read,
            write: l.write,
            w_guard: l.w_guard,
            c_guard: l.c_guard,
        }
    }

    /// Counter step of `read_acquire` (caller holds `c_guard`): registers
    /// the reader and says whether a `read` ticket should be released now.
    pub fn rw_reader_arrive(&mut self, id: RwLockId) -> Option<SemId> {
        let l = self.rwlock_mut(id);
        l.active_readers += 1;
        if l.active_writers == 0 {
            l.reading_readers += 1;
            Some(l.read)
        } else {
            None
        }
    }

    /// Counter step of `read_release` (caller holds `c_guard`): checks the
    /// reader out and, when the last one leaves, returns how many `write`
    /// tickets to release so the queued writers can drain.
    pub fn rw_reader_leave(&mut self, id: RwLockId) -> (SemId, u32) {
        let l = self.rwlock_mut(id);
        uassert!(l.reading_readers > 0 && l.active_readers > 0);
        l.reading_readers -= 1;
        l.active_readers -= 1;
        let mut releases = 0;
        if l.reading_readers == 0 {
            releases = l.active_writers - l.writing_writers;
            l.writing_writers = l.active_writers;
        }
        (l.write, releases)
    }

    /// Counter step of `write_acquire` (caller holds `c_guard`).
    pub fn rw_writer_arrive(&mut self, id: RwLockId) -> Option<SemId> {
        let l = self.rwlock_mut(id);
        l.active_writers += 1;
        if l.reading_readers == 0 {
            l.writing_writers += 1;
            Some(l.write)
        } else {
            None
        }
    }

    /// Counter step of `write_release` (caller holds `c_guard`): checks the
    /// writer out and, when the last one leaves, returns how many `read`
    /// tickets to release so every queued reader resumes together.
    pub fn rw_writer_leave(&mut self, id: RwLockId) -> (SemId, u32) {
        let l = self.rwlock_mut(id);
        uassert!(l.writing_writers > 0 && l.active_writers > 0);
        l.writing_writers -= 1;
        l.active_writers -= 1;
        let mut releases = 0;
        if l.active_writers == 0 {
            releases = l.active_readers - l.reading_readers;
            l.reading_readers = l.active_readers;
        }
        (l.read, releases)
    }

    /// Snapshot of the four counters, for tests and diagnostics:
    /// `(active_readers, reading_readers, active_writers, writing_writers)`.
    pub fn rw_counters(&self, id: RwLockId) -> (u32, u32, u32, u32) {
        match self.rwlocks[id.0 as usize].as_ref() {
            Some(l) => (
                l.active_readers,
                l.reading_readers,
                l.active_writers,
                l.writing_writers,
            ),
            None => panic!("bad rwlock handle"),
        }
    }
}
