// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread-backed simulator port for development hosts.
//!
//! Each simulated task is an OS thread that is only allowed to execute
//! while the kernel says it is the current task; everywhere else it parks
//! on a condvar. Kernel operations stand in for the critical sections of
//! the real port: each one runs under a host mutex, performs any pending
//! context switch on the way out (the moment the switch interrupt would
//! fire), and then re-gates the calling thread. Preemption therefore lands
//! at operation boundaries, which is deterministic enough to assert
//! scheduling properties against.
//!
//! Ticks do not advance on their own; the test drives them with
//! [`Sim::tick`] or [`Sim::run_until`], standing in for the timer
//! interrupt.
//!
//! Every `Sim` is fully isolated -- its own kernel, its own threads -- so a
//! test can run several schedulers side by side.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use abi::{MutexId, Priority, RwLockId, SemId, TaskDesc, TaskId};
use kerncore::ipc::{self, Port};
use kerncore::ready::ReadyStructure;
use kerncore::Kernel;

struct Shared<R: ReadyStructure> {
    kernel: Mutex<Kernel<R>>,
    cv: Condvar,
    epoch: AtomicU32,
    stopping: AtomicBool,
}

impl<R: ReadyStructure> Shared<R> {
    /// The tail of every simulated critical section: performs the switch a
    /// pended context switch interrupt would perform.
    fn finish_section(&self, k: &mut Kernel<R>) {
        if k.take_switch_pending() {
            if k.try_current().is_some() {
                let _ = k.switch_context();
            }
            self.epoch.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// One simulated scheduler and its task threads.
pub struct Sim<R: ReadyStructure> {
    shared: Arc<Shared<R>>,
}

/// A task's connection to its simulator: the [`Port`] the blocking IPC
/// compositions run over.
pub struct SimPort<R: ReadyStructure> {
    shared: Arc<Shared<R>>,
    me: TaskId,
}

impl<R: ReadyStructure> SimPort<R> {
    fn stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Relaxed)
    }

    /// Parks until this task is current again (or the simulator stops).
    /// This is the simulator's stand-in for "the hardware switched us out
    /// and will resume us here."
    fn gate(&self) {
        let mut k = self.shared.kernel.lock().unwrap();
        while !self.stopping() && k.try_current() != Some(self.me) {
            k = self.shared.cv.wait(k).unwrap();
        }
    }
}

impl<R: ReadyStructure> Port for SimPort<R> {
    type Ready = R;

    fn with<T>(&self, f: impl FnOnce(&mut Kernel<R>) -> T) -> T {
        let mut k = self.shared.kernel.lock().unwrap();
        let out = f(&mut k);
        self.shared.finish_section(&mut k);
        drop(k);
        self.shared.cv.notify_all();
        self.gate();
        out
    }

    fn switch_epoch(&self) -> u32 {
        self.shared.epoch.load(Ordering::Relaxed)
    }

    fn wait_for_reschedule(&self, _since: u32) {
        // `with` already re-gated us, which is the simulator's equivalent
        // of having been switched back in.
        self.gate();
    }
}

/// Handle passed to a task body; all blocking operations go through it.
pub struct TaskCtx<R: ReadyStructure> {
    port: SimPort<R>,
}

impl<R: ReadyStructure> TaskCtx<R> {
    pub fn id(&self) -> TaskId {
        self.port.me
    }

    /// Scheduling checkpoint for compute loops: parks while descheduled,
    /// and reports whether the simulator is still running. Spin bodies
    /// should call this every iteration.
    pub fn poll(&self) -> bool {
        if self.port.stopping() {
            return false;
        }
        self.port.gate();
        thread::yield_now();
        !self.port.stopping()
    }

    pub fn now(&self) -> u32 {
        self.port.with(|k| k.now())
    }

    pub fn delay(&self, ticks: u32) {
        ipc::task_delay(&self.port, ticks)
    }

    pub fn sem_take(&self, sem: SemId, ticks: u32) -> bool {
        ipc::sem_take(&self.port, sem, ticks)
    }

    pub fn sem_release(&self, sem: SemId) -> bool {
        ipc::sem_release(&self.port, sem)
    }

    pub fn mutex_lock(&self, mutex: MutexId, ticks: u32) -> bool {
        ipc::mutex_lock(&self.port, mutex, ticks)
    }

    pub fn mutex_unlock(&self, mutex: MutexId) -> bool {
        ipc::mutex_unlock(&self.port, mutex)
    }

    pub fn rwlock_read_acquire(&self, lock: RwLockId) {
        ipc::rwlock_read_acquire(&self.port, lock)
    }

    pub fn rwlock_read_release(&self, lock: RwLockId) {
        ipc::rwlock_read_release(&self.port, lock)
    }

    pub fn rwlock_write_acquire(&self, lock: RwLockId) {
        ipc::rwlock_write_acquire(&self.port, lock)
    }

    pub fn rwlock_write_release(&self, lock: RwLockId) {
        ipc::rwlock_write_release(&self.port, lock)
    }
}

impl<R: ReadyStructure> Sim<R> {
    /// Starts scheduling: the highest-priority task's thread comes alive.
    pub fn start(&self) {
        let mut k = self.shared.kernel.lock().unwrap();
        let _ = k.start();
        drop(k);
        self.shared.cv.notify_all();
    }

    /// One timer interrupt.
    pub fn tick(&self) {
        let mut k = self.shared.kernel.lock().unwrap();
        k.check_ticks();
        self.shared.finish_section(&mut k);
        drop(k);
        self.shared.cv.notify_all();
    }

    /// Direct kernel access for test orchestration (suspend, resume,
    /// validation, state inspection). Runs the pending switch like any
    /// critical section, but does not gate: the caller is the test, not a
    /// task.
    pub fn with_kernel<T>(&self, f: impl FnOnce(&mut Kernel<R>) -> T) -> T {
        let mut k = self.shared.kernel.lock().unwrap();
        let out = f(&mut k);
        self.shared.finish_section(&mut k);
        drop(k);
        self.shared.cv.notify_all();
        out
    }

    /// Drives ticks until `pred` holds, with a real-time pause between
    /// ticks so task threads get to run. Returns whether it held within
    /// `max_ticks`.
    #[must_use]
    pub fn run_until(
        &self,
        max_ticks: u32,
        mut pred: impl FnMut(&mut Kernel<R>) -> bool,
    ) -> bool {
        for _ in 0..max_ticks {
            if self.with_kernel(&mut pred) {
                return true;
            }
            self.tick();
            thread::sleep(Duration::from_micros(300));
        }
        self.with_kernel(&mut pred)
    }

    /// Lets task threads run without advancing time.
    pub fn settle(&self) {
        for _ in 0..10 {
            thread::sleep(Duration::from_micros(300));
            self.shared.cv.notify_all();
        }
    }

    /// Stops the simulator; parked task threads unwind.
    pub fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::Relaxed);
        self.shared.cv.notify_all();
    }
}

impl<R> Sim<R>
where
    R: ReadyStructure + Send + 'static,
    R::Waiters: Send,
    R::Delay: Send,
{
    /// Builds a simulator with its idle task already in place, mirroring
    /// what `scheduler_init` does on hardware.
    pub fn new() -> Self {
        let sim = Sim {
            shared: Arc::new(Shared {
                kernel: Mutex::new(Kernel::new()),
                cv: Condvar::new(),
                epoch: AtomicU32::new(0),
                stopping: AtomicBool::new(false),
            }),
        };
        sim.spawn(Priority::IDLE, 0, |ctx| {
            while ctx.poll() {
                ctx.port.with(|k| {
                    let _ = k.reap_one();
                });
            }
        });
        sim
    }

    /// Creates a task and the thread that animates it. The body starts
    /// executing only once the scheduler selects the task; a body that
    /// returns deletes its task.
    pub fn spawn<F>(
        &self,
        priority: Priority,
        time_slice: u32,
        body: F,
    ) -> TaskId
    where
        F: FnOnce(&TaskCtx<R>) + Send + 'static,
    {
        let created = self.with_kernel(|k| {
            k.task_create(
                TaskDesc {
                    // Stacks are real on hardware only; the simulator's
                    // tasks live on host threads.
                    stack_words: 4,
                    priority,
                    time_slice,
                },
                |_| 0,
            )
        });
        let id = match created {
            Ok(id) => id,
            Err(e) => panic!("simulated task creation failed: {:?}", e),
        };
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            let ctx = TaskCtx {
                port: SimPort { shared, me: id },
            };
            ctx.port.gate();
            if ctx.port.stopping() {
                return;
            }
            body(&ctx);
            // Falling off the entry point: the task removes itself and the
            // idle task reclaims the slot.
            if !ctx.port.stopping() {
                let mut k = ctx.port.shared.kernel.lock().unwrap();
                if k.task(id).is_ok() {
                    let _ = k.task_delete(id);
                }
                ctx.port.shared.finish_section(&mut k);
                drop(k);
                ctx.port.shared.cv.notify_all();
            }
        });
        id
    }
}

impl<R> Default for Sim<R>
where
    R: ReadyStructure + Send + 'static,
    R::Waiters: Send,
    R::Delay: Send,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ReadyStructure> Drop for Sim<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
