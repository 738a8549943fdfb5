// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel fault recording.
//!
//! Programming errors -- a tripped `uassert!`, a task stack sized below the
//! exception frame, IPC misuse -- are not recoverable. When one is detected
//! the kernel fills in a [`FaultRecord`] and parks the CPU with interrupts
//! masked, so the tick cannot drive the scheduler back into whatever state
//! just failed.
//!
//! The record is the debugger interface: `kern::fail::FAULT_RECORD` is a
//! `repr(C)` struct whose `state` word reads [`FAULT_MAGIC`] once the rest
//! of the record is valid. `task` holds the address of the control block
//! that was current when things went wrong (zero before the first launch),
//! and `text[..len]` is the panic message as UTF-8, truncated to fit. Any
//! other `state` value means the kernel either never failed or never wrote
//! the record completely.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

/// Value of [`FaultRecord::state`] once a fault has been fully recorded.
pub const FAULT_MAGIC: u32 = 0x4641_554C; // "FAUL"

const FAULT_TEXT_LEN: usize = 96;

/// One-shot description of the failure that stopped the kernel.
#[repr(C)]
pub struct FaultRecord {
    /// [`FAULT_MAGIC`] once the fields below are valid.
    pub state: u32,
    /// Address of the task control block that was current at the fault.
    pub task: usize,
    /// Number of valid bytes in `text`.
    pub len: u32,
    /// Failure description, UTF-8, truncated to fit.
    pub text: [u8; FAULT_TEXT_LEN],
}

#[used]
static mut FAULT_RECORD: FaultRecord = FaultRecord {
    state: 0,
    task: 0,
    len: 0,
    text: [0; FAULT_TEXT_LEN],
};

/// First-faulter-wins claim on the record. A panic raised while recording a
/// panic parks immediately rather than clobbering the original evidence.
static FAULT_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Masks interrupts and stops. Nothing schedules over the corpse.
fn park() -> ! {
    cortex_m::interrupt::disable();
    loop {
        cortex_m::asm::wfi();
    }
}

/// Records the reason for an unrecoverable failure and stops the kernel.
pub fn die(reason: core::fmt::Arguments<'_>) -> ! {
    if FAULT_CLAIMED.swap(true, Ordering::SeqCst) {
        park();
    }
    // Safety: the claim above admits exactly one writer, and readers are
    // debuggers that look only after the CPU has parked.
    let record = unsafe { &mut *core::ptr::addr_of_mut!(FAULT_RECORD) };
    record.task = crate::arch::current_task_addr();
    let mut text = TextCursor {
        text: &mut record.text,
        len: 0,
    };
    text.write_fmt(reason).ok();
    record.len = text.len as u32;
    // The magic goes in last so a partial record never reads as valid.
    record.state = FAULT_MAGIC;
    park()
}

struct TextCursor<'a> {
    text: &'a mut [u8; FAULT_TEXT_LEN],
    len: usize,
}

impl Write for TextCursor<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &b in s.as_bytes() {
            if self.len == self.text.len() {
                break;
            }
            self.text[self.len] = b;
            self.len += 1;
        }
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(format_args!("{}", info))
}
