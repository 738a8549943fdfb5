// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-independent scheduler and IPC core.
//!
//! This crate holds the part of the kernel that can be reasoned about -- and
//! tested -- without a target in sight: the ready structures, the delay
//! bookkeeping, task lifecycle, and the state machines behind semaphores,
//! mutexes, and the readers/writers lock. All of it hangs off a [`Kernel`]
//! value rather than globals, so tests can instantiate as many isolated
//! schedulers as they like. The port layer (in the `kern` crate) owns exactly
//! one `Kernel`, wraps access to it in critical sections, and turns its
//! pending-switch flag into a software interrupt.
//!
//! # Design principles
//!
//! 1. A strong preference for safe code; the only raw pointer in this crate
//!    is the stack-top word the context switch trampoline updates.
//! 2. A preference for simple and clear algorithms over fast and clever
//!    algorithms. Priority selection is a count-leading-zeros or a short
//!    scan; nothing here is proportional to more than the number of
//!    priorities.
//! 3. Structural invariants are checked eagerly with `uassert!`; a kernel
//!    that has corrupted its own bookkeeping has no business continuing.

// Allow std-y things to be used in test. Note that this attribute is a bit of
// a trap for the programmer, because rust-analyzer by default seems to build
// things with test set. This means it's easy to introduce code incompatible
// with no_std without your editor hassling you about it. Beware.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// Asserts a kernel structural invariant.
///
/// This is deliberately not `assert!`: the formatting machinery of the
/// standard macro costs flash, and there is nothing useful to format -- if
/// one of these fires, you want a debugger, not a string.
#[macro_export]
macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("kernel invariant violated");
        }
    };
}

pub mod ipc;
pub mod mutex;
pub mod ready;
pub mod rwlock;
pub mod sched;
pub mod sem;
pub mod task;

pub use sched::Kernel;
