// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The runtime API, as seen by task code.
//!
//! Thin wrappers binding the core's operations to the one global kernel
//! behind its critical sections. Fallible operations report with `Result`
//! or `bool`; misuse (bad IPC handles, re-locking a held mutex, unlocking
//! someone else's) trips kernel assertions instead, per the failure rules
//! in [`crate::fail`].
//!
//! Blocking calls -- `sem_take`, `mutex_lock`, the rw-lock operations,
//! `task_delay` -- must come from task context. Interrupt handlers at or
//! below the kernel's priority band may use `sem_release`.

use abi::{
    CreateError, MutexId, Priority, RwLockId, SemId, TaskDesc, TaskError,
    TaskId,
};
use kerncore::ipc;

use crate::arch::{self, with_kernel, ArmPort, TaskEntry};

static PORT: ArmPort = ArmPort;

/// Creates a task and makes it ready. If it outranks the caller it starts
/// running before this returns.
pub fn task_create(
    entry: TaskEntry,
    stack_words: usize,
    arg: usize,
    priority: Priority,
) -> Result<TaskId, CreateError> {
    with_kernel(|k| {
        k.task_create(
            TaskDesc {
                stack_words,
                priority,
                time_slice: 0,
            },
            |stack| arch::init_stack(stack, entry, arg),
        )
    })
}

/// Removes a task from scheduling; the idle task reclaims its storage. A
/// task may delete itself, in which case this call does not return.
pub fn task_delete(id: TaskId) -> Result<(), TaskError> {
    with_kernel(|k| k.task_delete(id))
}

/// Sleeps for `ticks`. Zero yields without sleeping.
pub fn task_delay(ticks: u32) {
    ipc::task_delay(&PORT, ticks)
}

pub fn task_suspend(id: TaskId) -> Result<(), TaskError> {
    with_kernel(|k| k.task_suspend(id))
}

pub fn task_resume(id: TaskId) -> Result<(), TaskError> {
    with_kernel(|k| k.task_resume(id))
}

/// Freezes tick-driven wake-ups without masking interrupts.
pub fn scheduler_suspend() {
    with_kernel(|k| k.scheduler_suspend())
}

pub fn scheduler_resume() {
    with_kernel(|k| k.scheduler_resume())
}

/// Kernel time in ticks.
pub fn now() -> u32 {
    with_kernel(|k| k.now())
}

pub fn sem_create(initial: u32) -> SemId {
    with_kernel(|k| k.sem_create(initial))
}

pub fn sem_delete(id: SemId) {
    with_kernel(|k| k.sem_delete(id))
}

/// Takes a permit, waiting up to `ticks`; zero is try-take. Returns whether
/// the permit was obtained.
pub fn sem_take(id: SemId, ticks: u32) -> bool {
    ipc::sem_take(&PORT, id, ticks)
}

/// Releases a permit, waking the highest-priority waiter. Usable from
/// interrupt handlers inside the kernel's priority band.
pub fn sem_release(id: SemId) -> bool {
    ipc::sem_release(&PORT, id)
}

pub fn mutex_create() -> MutexId {
    with_kernel(|k| k.mutex_create())
}

pub fn mutex_delete(id: MutexId) {
    with_kernel(|k| k.mutex_delete(id))
}

/// Locks, waiting up to `ticks`; zero is try-lock. Not recursive.
pub fn mutex_lock(id: MutexId, ticks: u32) -> bool {
    ipc::mutex_lock(&PORT, id, ticks)
}

pub fn mutex_unlock(id: MutexId) -> bool {
    ipc::mutex_unlock(&PORT, id)
}

pub fn rwlock_create() -> RwLockId {
    with_kernel(|k| k.rwlock_create())
}

pub fn rwlock_delete(id: RwLockId) {
    with_kernel(|k| k.rwlock_delete(id))
}

pub fn rwlock_read_acquire(id: RwLockId) {
    ipc::rwlock_read_acquire(&PORT, id)
}

pub fn rwlock_read_release(id: RwLockId) {
    ipc::rwlock_read_release(&PORT, id)
}

pub fn rwlock_write_acquire(id: RwLockId) {
    ipc::rwlock_write_acquire(&PORT, id)
}

pub fn rwlock_write_release(id: RwLockId) {
    ipc::rwlock_write_release(&PORT, id)
}
