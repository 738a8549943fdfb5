// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scheduling and IPC scenarios, driven through the simulator
//! port. Tasks are real threads running the real blocking protocols; the
//! test thread plays the timer interrupt.

#![cfg(not(target_arch = "arm"))]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use abi::{Priority, StateSet};
use kern::sim::Sim;
use kerncore::ipc::FOREVER_TICKS;
use kerncore::ready::{ReadyList, ReadyStructure, ReadyTable};

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

fn flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

/// Two spinning tasks at different priorities: only the higher one makes
/// progress.
fn preemption_starves_lower<R>()
where
    R: ReadyStructure + Send + 'static,
    R::Waiters: Send,
    R::Delay: Send,
{
    let sim = Sim::<R>::new();
    let c_low = counter();
    let c_high = counter();
    {
        let c = Arc::clone(&c_low);
        sim.spawn(Priority(1), 1, move |ctx| {
            while ctx.poll() {
                c.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    {
        let c = Arc::clone(&c_high);
        sim.spawn(Priority(2), 1, move |ctx| {
            while ctx.poll() {
                c.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    sim.start();
    assert!(sim.run_until(500, |_| c_high.load(Ordering::Relaxed) > 1000));
    assert_eq!(c_low.load(Ordering::Relaxed), 0);
    sim.with_kernel(|k| k.validate());
}

#[test]
fn preemption_starves_lower_on_table() {
    preemption_starves_lower::<ReadyTable>();
}

#[test]
fn preemption_starves_lower_on_list() {
    preemption_starves_lower::<ReadyList>();
}

/// Three tasks and a mutex: the low-priority lock holder inherits the
/// blocked high task's priority and runs ahead of the middle spinner until
/// it unlocks.
#[test]
fn priority_inversion_is_bounded() {
    let sim = Sim::<ReadyTable>::new();
    let m = sim.with_kernel(|k| k.mutex_create());
    let go = sim.with_kernel(|k| k.sem_create(0));

    let lo_ctr = counter();
    let mid_ctr = counter();
    let unlock_now = flag();
    let hi_locked = flag();

    let lo = {
        let ctr = Arc::clone(&lo_ctr);
        let unlock = Arc::clone(&unlock_now);
        sim.spawn(Priority(1), 1, move |ctx| {
            assert!(ctx.mutex_lock(m, 0));
            while ctx.poll() {
                ctr.fetch_add(1, Ordering::Relaxed);
                if unlock.load(Ordering::Relaxed) {
                    break;
                }
            }
            ctx.mutex_unlock(m);
        })
    };
    let mid = {
        let ctr = Arc::clone(&mid_ctr);
        sim.spawn(Priority(2), 1, move |ctx| {
            while ctx.poll() {
                ctr.fetch_add(1, Ordering::Relaxed);
            }
        })
    };
    let hi = {
        let locked = Arc::clone(&hi_locked);
        sim.spawn(Priority(3), 1, move |ctx| {
            ctx.sem_take(go, FOREVER_TICKS);
            assert!(ctx.mutex_lock(m, 100_000));
            locked.store(true, Ordering::Relaxed);
            ctx.mutex_unlock(m);
        })
    };

    // Keep the middle priority out of the way until the lock is held.
    sim.with_kernel(|k| k.task_suspend(mid).unwrap());
    sim.start();

    // lo takes the lock once hi parks on the `go` semaphore.
    assert!(sim.run_until(100, |_| lo_ctr.load(Ordering::Relaxed) > 0));

    // hi contends and blocks, lending its priority to lo.
    sim.with_kernel(|k| {
        k.sem_release(go);
    });
    assert!(sim.run_until(100, |k| {
        k.task(hi).map(|t| t.state().contains(StateSet::BLOCK)) == Ok(true)
    }));

    // Now admit the middle spinner: inheritance must keep it off the CPU.
    sim.with_kernel(|k| k.task_resume(mid).unwrap());
    let lo_before = lo_ctr.load(Ordering::Relaxed);
    let _ = sim.run_until(20, |_| false);
    assert_eq!(mid_ctr.load(Ordering::Relaxed), 0);
    assert!(lo_ctr.load(Ordering::Relaxed) > lo_before);
    assert!(!hi_locked.load(Ordering::Relaxed));

    // Unlock: hi gets the mutex, finishes, and only then does mid run.
    unlock_now.store(true, Ordering::Relaxed);
    assert!(sim.run_until(100, |_| hi_locked.load(Ordering::Relaxed)));
    assert!(sim.run_until(100, |_| mid_ctr.load(Ordering::Relaxed) > 0));
    sim.with_kernel(|k| k.validate());
    let _ = lo;
}

/// Producer/consumer through a counting semaphore: ten releases with
/// yields, ten takes, no permit lost and none invented.
#[test]
fn producer_consumer_balances() {
    let sim = Sim::<ReadyTable>::new();
    let sem = sim.with_kernel(|k| k.sem_create(0));
    let produced = counter();
    let consumed = counter();
    let trouble = flag();

    {
        let produced = Arc::clone(&produced);
        sim.spawn(Priority(3), 1, move |ctx| {
            for _ in 0..10 {
                ctx.sem_release(sem);
                produced.fetch_add(1, Ordering::Relaxed);
                ctx.delay(1);
            }
        });
    }
    {
        let consumed = Arc::clone(&consumed);
        let trouble = Arc::clone(&trouble);
        sim.spawn(Priority(4), 1, move |ctx| {
            for _ in 0..10 {
                if ctx.sem_take(sem, 1000) {
                    consumed.fetch_add(1, Ordering::Relaxed);
                } else {
                    trouble.store(true, Ordering::Relaxed);
                    return;
                }
            }
        });
    }
    sim.start();
    assert!(sim.run_until(500, |k| {
        produced.load(Ordering::Relaxed) == 10
            && consumed.load(Ordering::Relaxed) == 10
            && k.sem_value(sem) == 0
    }));
    assert!(!trouble.load(Ordering::Relaxed));
    sim.with_kernel(|k| k.validate());
}

/// Readers/writers lock: readers share, a waiting writer blocks new
/// readers, the writer runs alone, and queued readers re-enter together
/// after it leaves.
#[test]
fn rwlock_writer_priority_policy() {
    let sim = Sim::<ReadyTable>::new();
    let lock = sim.with_kernel(|k| k.rwlock_create());

    let in_read = counter();
    let in_write = counter();
    let readers_seen_by_writer = Arc::new(AtomicU32::new(u32::MAX));
    let w_go = sim.with_kernel(|k| k.sem_create(0));
    let w_hold = sim.with_kernel(|k| k.sem_create(0));
    let r3_go = sim.with_kernel(|k| k.sem_create(0));
    let r3_hold = sim.with_kernel(|k| k.sem_create(0));
    let r1_hold = sim.with_kernel(|k| k.sem_create(0));
    let r2_hold = sim.with_kernel(|k| k.sem_create(0));

    let spawn_reader = |prio: u8, go: Option<abi::SemId>, hold: abi::SemId| {
        let in_read = Arc::clone(&in_read);
        sim.spawn(Priority(prio), 1, move |ctx| {
            if let Some(go) = go {
                ctx.sem_take(go, FOREVER_TICKS);
            }
            ctx.rwlock_read_acquire(lock);
            in_read.fetch_add(1, Ordering::Relaxed);
            ctx.sem_take(hold, FOREVER_TICKS);
            in_read.fetch_sub(1, Ordering::Relaxed);
            ctx.rwlock_read_release(lock);
        })
    };
    spawn_reader(2, None, r1_hold);
    spawn_reader(3, None, r2_hold);
    spawn_reader(1, Some(r3_go), r3_hold);
    drop(spawn_reader);

    {
        let in_read = Arc::clone(&in_read);
        let in_write = Arc::clone(&in_write);
        let seen = Arc::clone(&readers_seen_by_writer);
        sim.spawn(Priority(4), 1, move |ctx| {
            ctx.sem_take(w_go, FOREVER_TICKS);
            ctx.rwlock_write_acquire(lock);
            seen.store(in_read.load(Ordering::Relaxed), Ordering::Relaxed);
            in_write.fetch_add(1, Ordering::Relaxed);
            ctx.sem_take(w_hold, FOREVER_TICKS);
            in_write.fetch_sub(1, Ordering::Relaxed);
            ctx.rwlock_write_release(lock);
        });
    }

    sim.start();

    // Both ungated readers get in concurrently.
    assert!(sim.run_until(200, |_| in_read.load(Ordering::Relaxed) == 2));

    // The writer arrives and queues up behind them.
    sim.with_kernel(|k| {
        k.sem_release(w_go);
    });
    assert!(sim.run_until(200, |k| k.rw_counters(lock).2 == 1));

    // A new reader now has to wait: it registers but gets no ticket.
    sim.with_kernel(|k| {
        k.sem_release(r3_go);
    });
    assert!(sim.run_until(200, |k| k.rw_counters(lock).0 == 3));
    assert_eq!(in_read.load(Ordering::Relaxed), 2);
    assert_eq!(in_write.load(Ordering::Relaxed), 0);

    // The incumbents leave; the writer enters alone.
    sim.with_kernel(|k| {
        k.sem_release(r1_hold);
        k.sem_release(r2_hold);
    });
    assert!(sim.run_until(200, |_| in_write.load(Ordering::Relaxed) == 1));
    assert_eq!(readers_seen_by_writer.load(Ordering::Relaxed), 0);
    assert_eq!(in_read.load(Ordering::Relaxed), 0);

    // The writer leaves; the queued reader resumes.
    sim.with_kernel(|k| {
        k.sem_release(w_hold);
    });
    assert!(sim.run_until(200, |_| in_read.load(Ordering::Relaxed) == 1));
    sim.with_kernel(|k| {
        k.sem_release(r3_hold);
    });
    assert!(sim.run_until(200, |k| {
        let (ar, rr, aw, ww) = k.rw_counters(lock);
        ar == 0 && rr == 0 && aw == 0 && ww == 0
    }));
    sim.with_kernel(|k| k.validate());
}

/// A delay issued just before the tick counter wraps fires exactly on
/// time, on the far side of the wrap.
#[test]
fn delay_across_wrap_fires_on_time() {
    let sim = Sim::<ReadyTable>::new();
    sim.with_kernel(|k| k.set_now(0xFFFF_FFB0));
    let t = {
        sim.spawn(Priority(3), 1, move |ctx| {
            ctx.delay(100);
        })
    };
    sim.start();
    assert!(sim.run_until(300, |k| match k.task(t) {
        Ok(task) => task.state().contains(StateSet::READY),
        // Already ran to completion and was deleted: also proof of waking.
        Err(_) => true,
    }));
    sim.with_kernel(|k| {
        assert_eq!(k.now(), 0xFFFF_FFB0u32.wrapping_add(100));
    });
}

/// Polls a host-side condition without advancing kernel time.
fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..2000 {
        if cond() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_micros(500));
    }
    false
}

/// A take that times out comes back on its deadline tick and leaves the
/// semaphore clean.
#[test]
fn sem_timeout_is_tight_and_clean() {
    let sim = Sim::<ReadyTable>::new();
    let sem = sim.with_kernel(|k| k.sem_create(0));
    let outcome = counter(); // 0 = pending, 1 = timed out, 2 = got permit
    let when = counter();

    let t = {
        let outcome = Arc::clone(&outcome);
        let when = Arc::clone(&when);
        sim.spawn(Priority(3), 1, move |ctx| {
            let ok = ctx.sem_take(sem, 50);
            when.store(ctx.now(), Ordering::Relaxed);
            outcome.store(if ok { 2 } else { 1 }, Ordering::Relaxed);
        })
    };
    sim.start();
    assert!(eventually(|| sim.with_kernel(|k| {
        k.task(t).map(|x| x.state().contains(StateSet::BLOCK)) == Ok(true)
    })));

    // Ticks 1..=49: no sign of life.
    for _ in 0..49 {
        sim.tick();
    }
    sim.settle();
    assert_eq!(outcome.load(Ordering::Relaxed), 0);

    // Tick 50 is the deadline, to the tick.
    sim.tick();
    assert!(eventually(|| outcome.load(Ordering::Relaxed) != 0));
    assert_eq!(outcome.load(Ordering::Relaxed), 1);
    assert_eq!(when.load(Ordering::Relaxed), 50);

    // No waiter left behind: a release must simply bank a permit.
    sim.with_kernel(|k| {
        k.sem_release(sem);
        assert_eq!(k.sem_value(sem), 1);
        k.validate();
    });
}

/// Two schedulers in one process stay fully isolated.
#[test]
fn independent_schedulers_coexist() {
    let a = Sim::<ReadyTable>::new();
    let b = Sim::<ReadyList>::new();
    let ca = counter();
    let cb = counter();
    {
        let c = Arc::clone(&ca);
        a.spawn(Priority(2), 1, move |ctx| {
            while ctx.poll() {
                c.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    {
        let c = Arc::clone(&cb);
        b.spawn(Priority(2), 1, move |ctx| {
            while ctx.poll() {
                c.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    a.start();
    b.start();
    assert!(a.run_until(200, |_| ca.load(Ordering::Relaxed) > 100));
    assert!(b.run_until(200, |_| cb.load(Ordering::Relaxed) > 100));
    a.with_kernel(|k| k.validate());
    b.with_kernel(|k| k.validate());
}
