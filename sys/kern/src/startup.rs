// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! The embedding application does its clock and memory setup (including
//! installing the global allocator), then calls [`scheduler_init`], creates
//! its tasks through [`crate::api`], and finally calls [`scheduler_start`],
//! which does not return.

use abi::Priority;

use crate::api;
use crate::arch;

/// Stack for the idle task, in words. It calls into the reaper and nothing
/// else, but it also absorbs interrupt frames like any other task stack.
const IDLE_STACK_WORDS: usize = 64;

/// Builds the kernel instance and creates the idle task, so that the
/// selection invariant -- a ready task always exists -- holds from the
/// first tick.
///
/// Call once, with interrupts still at boot configuration.
pub fn scheduler_init() {
    klog!("kernel: init");
    arch::install_kernel(kerncore::Kernel::new());
    match api::task_create(idle_main, IDLE_STACK_WORDS, 0, Priority::IDLE) {
        Ok(_) => (),
        Err(e) => panic!("idle task creation failed: {:?}", e),
    }
}

/// Selects the highest-priority task and launches it. `tick_divisor` is CPU
/// cycles per kernel tick (`CpuHz / TickRateHz`).
pub fn scheduler_start(tick_divisor: u32) -> ! {
    klog!("kernel: start");
    let first = arch::with_kernel(|k| {
        let _ = k.start();
        k.current_task_ptr()
    });
    arch::start_first_task(tick_divisor, first)
}

/// The idle task: runs when nothing else is ready, reclaiming the storage
/// of deleted tasks.
extern "C" fn idle_main(_arg: usize) {
    loop {
        arch::with_kernel(|k| {
            let _ = k.reap_one();
        });
    }
}
