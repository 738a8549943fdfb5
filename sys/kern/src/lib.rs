// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel proper: the part that owns the one real scheduler instance and
//! wires it to a machine.
//!
//! The scheduling and IPC logic itself lives in `kerncore` and is written
//! against a plain value; this crate supplies everything that cannot be a
//! plain value:
//!
//! - the port layer for ARMv7-M (critical sections over the interrupt
//!   priority mask, stack frame fabrication, the pendable-interrupt context
//!   switch, first-task launch);
//! - the global kernel instance and the public runtime API over it;
//! - failure recording for when an invariant check pulls the cord;
//! - on non-ARM hosts, a thread-backed simulator port, so the full blocking
//!   protocols can be exercised end to end by ordinary tests.
//!
//! The embedding application supplies the heap: task control blocks and
//! stacks are allocated through the global allocator, which must be
//! installed before `scheduler_init` runs.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        pub mod api;
        pub mod fail;
        pub mod startup;
    } else {
        pub mod sim;
    }
}
