// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Blocking IPC compositions.
//!
//! The kernel methods in [`crate::sem`] and [`crate::mutex`] are halves: the
//! part before the context switch and the part after. Stringing them
//! together requires two things only a port can provide -- critical
//! sections around kernel access, and a way to wait until the calling task
//! has been switched out and back in. The [`Port`] trait captures exactly
//! that, and the functions here implement the complete blocking operations
//! over it, so the ARM port and the host simulator share one protocol.

use abi::{MutexId, RwLockId, SemId};

use crate::ready::ReadyStructure;
use crate::sched::Kernel;

/// Outcome of the first half of a blocking take/lock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TakeBegin {
    /// Fast path: the permit or lock was free.
    Acquired,
    /// `ticks == 0` and the fast path missed.
    Failed,
    /// Caller is enrolled as a waiter and no longer ready; wait out the
    /// reschedule and run the finish half.
    Blocked,
}

/// Tick count used for "wait as long as it takes": one full trip of the
/// tick base, the longest timeout the delay bookkeeping can express.
pub const FOREVER_TICKS: u32 = u32::MAX;

/// What a port must supply for the blocking compositions to run.
pub trait Port {
    type Ready: ReadyStructure;

    /// Runs `f` with the kernel, inside a critical section. On the way out
    /// the port converts a pending switch flag into its context switch
    /// mechanism.
    fn with<T>(&self, f: impl FnOnce(&mut Kernel<Self::Ready>) -> T) -> T;

    /// Number of context switches performed so far. Sampled before a
    /// blocking enroll; monotonic (mod 2^32).
    fn switch_epoch(&self) -> u32;

    /// Parks the caller until it has been switched out and selected again.
    /// `since` is the epoch sampled before the enrolling critical section.
    fn wait_for_reschedule(&self, since: u32);
}

/// Takes a permit, waiting up to `ticks`. `ticks == 0` is try-take.
pub fn sem_take<P: Port>(port: &P, sem: SemId, ticks: u32) -> bool {
    let since = port.switch_epoch();
    match port.with(|k| k.sem_take_begin(sem, ticks)) {
        TakeBegin::Acquired => true,
        TakeBegin::Failed => false,
        TakeBegin::Blocked => {
            port.wait_for_reschedule(since);
            port.with(|k| k.sem_take_finish(sem))
        }
    }
}

/// Takes a permit, waiting indefinitely.
pub fn sem_take_blocking<P: Port>(port: &P, sem: SemId) {
    while !sem_take(port, sem, FOREVER_TICKS) {}
}

/// Releases a permit, waking the highest-priority waiter if there is one.
pub fn sem_release<P: Port>(port: &P, sem: SemId) -> bool {
    port.with(|k| k.sem_release(sem))
}

/// Locks a mutex, waiting up to `ticks`. `ticks == 0` is try-lock.
pub fn mutex_lock<P: Port>(port: &P, mutex: MutexId, ticks: u32) -> bool {
    let since = port.switch_epoch();
    match port.with(|k| k.mutex_lock_begin(mutex, ticks)) {
        TakeBegin::Acquired => true,
        TakeBegin::Failed => false,
        TakeBegin::Blocked => {
            port.wait_for_reschedule(since);
            port.with(|k| k.mutex_lock_finish(mutex))
        }
    }
}

/// Unlocks a mutex owned by the calling task.
pub fn mutex_unlock<P: Port>(port: &P, mutex: MutexId) -> bool {
    port.with(|k| k.mutex_unlock(mutex))
}

/// Parks the calling task for `ticks`; zero yields.
pub fn task_delay<P: Port>(port: &P, ticks: u32) {
    let since = port.switch_epoch();
    port.with(|k| k.task_delay(ticks));
    if ticks > 0 {
        port.wait_for_reschedule(since);
    }
}

/// Enters a readers/writers lock for reading. Blocks while a writer burst
/// is draining.
pub fn rwlock_read_acquire<P: Port>(port: &P, lock: RwLockId) {
    let sems = port.with(|k| k.rwlock_sems(lock));
    sem_take_blocking(port, sems.c_guard);
    let ticket = port.with(|k| k.rw_reader_arrive(lock));
    if let Some(read) = ticket {
        sem_release(port, read);
    }
    sem_release(port, sems.c_guard);
    // Without the counter guard: immediate if the ticket above was ours,
    // otherwise parked until a write_release re-admits readers.
    sem_take_blocking(port, sems.read);
}

/// Leaves the read side; the last reader out lets queued writers drain.
pub fn rwlock_read_release<P: Port>(port: &P, lock: RwLockId) {
    let sems = port.with(|k| k.rwlock_sems(lock));
    sem_take_blocking(port, sems.c_guard);
    let (write, owed) = port.with(|k| k.rw_reader_leave(lock));
    for _ in 0..owed {
        sem_release(port, write);
    }
    sem_release(port, sems.c_guard);
}

/// Enters the lock for writing: waits for readers to drain, then for the
/// writer-exclusion guard.
pub fn rwlock_write_acquire<P: Port>(port: &P, lock: RwLockId) {
    let sems = port.with(|k| k.rwlock_sems(lock));
    sem_take_blocking(port, sems.c_guard);
    let ticket = port.with(|k| k.rw_writer_arrive(lock));
    if let Some(write) = ticket {
        sem_release(port, write);
    }
    sem_release(port, sems.c_guard);
    sem_take_blocking(port, sems.write);
    sem_take_blocking(port, sems.w_guard);
}

/// Leaves the write side; the last writer out re-admits every queued
/// reader at once.
pub fn rwlock_write_release<P: Port>(port: &P, lock: RwLockId) {
    let sems = port.with(|k| k.rwlock_sems(lock));
    sem_release(port, sems.w_guard);
    sem_take_blocking(port, sems.c_guard);
    let (read, owed) = port.with(|k| k.rw_writer_leave(lock));
    for _ in 0..owed {
        sem_release(port, read);
    }
    sem_release(port, sems.c_guard);
}
