// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Port layer for ARMv7-M.
//!
//! # Interrupt layout
//!
//! Three exception handlers belong to the kernel, all configured at the
//! lowest hardware priority so they can never preempt a device ISR:
//!
//! - `SVCall` is used exactly once, to drop out of the boot path into the
//!   first task.
//! - `SysTick` drives tick accounting. It calls into the scheduler under the
//!   interrupt mask and, if the selection changed, pends a context switch.
//! - `PendSV` performs the context switch itself. It is the only code that
//!   saves and restores the callee-saved register set, which keeps every
//!   other ISR's entry sequence cheap: anything that wants a switch just
//!   pokes the PendSV pending bit and the switch happens after the ISR chain
//!   unwinds.
//!
//! # Critical sections
//!
//! Kernel state is guarded by raising `BASEPRI` to
//! [`INTERRUPT_MASK_THRESHOLD`]. That masks the kernel's own interrupts (and
//! anything an application registers at or below the threshold, which is
//! what permits `sem_release` from such an ISR) while leaving genuinely
//! urgent device interrupts alone -- at the price that those handlers must
//! not touch the scheduler. Sections nest, because each one restores the
//! mask it displaced.
//!
//! # The saved-state contract
//!
//! The switch trampoline deals in exactly one word of a task control block:
//! the first, which holds the stack top. On the way out it pushes `r4-r11`
//! onto the outgoing task's process stack and stores the resulting pointer
//! there; on the way in it does the reverse. The exception return sequence
//! restores the caller-saved half from the same stack. `init_stack`
//! fabricates that full 16-word picture for a task that has never run.

use core::arch::global_asm;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use kerncore::ipc::Port;
use kerncore::ready::ReadyTable;
use kerncore::task::Task;
use kerncore::{uassert, Kernel};

/// `BASEPRI` value of a kernel critical section. Interrupts of numerically
/// greater-or-equal priority (i.e. less urgent, including the kernel's own
/// at 0xFF) are masked inside one; handlers configured numerically below
/// this remain live and must stay away from scheduler state.
pub const INTERRUPT_MASK_THRESHOLD: u8 = 0x80;

/// ARMv7-M wants 8-byte stack alignment at every exception boundary.
pub const STACK_ALIGNMENT: usize = 8;

/// Initially we just set the Thumb Mode bit, the minimum required.
const INITIAL_PSR: u32 = 1 << 24;

/// Entry point signature for tasks: one word of argument, delivered in
/// `r0`. Tasks are not supposed to return; the fabricated link register
/// sends a task that does into [`returned_task_trap`].
pub type TaskEntry = extern "C" fn(usize);

/// On ARMvx-M we have to use a global to record the current task pointer,
/// since we don't have a scratch register. The assembly below addresses the
/// pointed-to block through offset zero: the stack-top word.
#[no_mangle]
static CURRENT_TASK_PTR: AtomicPtr<Task> = AtomicPtr::new(core::ptr::null_mut());

/// Counts completed context switches. Blocking IPC paths sample this before
/// parking themselves and spin until it moves, which is their signal that
/// the switch away (and eventually back) actually happened.
static SWITCH_EPOCH: AtomicU32 = AtomicU32::new(0);

/// The one kernel instance, populated by `startup::scheduler_init`.
static mut KERNEL: Option<Kernel<ReadyTable>> = None;

/// Log a line from kernel context. This is a thin front over
/// [`klog_write`], which owns the choice of backend, so every call site
/// formats the same way no matter how the words leave the chip.
macro_rules! klog {
    ($($args:tt)*) => {
        $crate::arch::klog_write(core::format_args!($($args)*))
    };
}

/// Backend of `klog!`: the `klog-itm` feature (default) pushes through ITM
/// stimulus port 0, `klog-semihosting` goes by way of the debug monitor,
/// and with neither enabled the formatted line is dropped on the floor.
pub(crate) fn klog_write(args: core::fmt::Arguments<'_>) {
    #[cfg(feature = "klog-itm")]
    {
        // Safety: the stimulus port tolerates interleaved writers; the
        // worst outcome of racing this is garbled trace output.
        let stim = unsafe { &mut (*cortex_m::peripheral::ITM::PTR).stim[0] };
        cortex_m::iprintln!(stim, "{}", args);
    }
    #[cfg(feature = "klog-semihosting")]
    {
        let _ = cortex_m_semihosting::hprintln!("{}", args);
    }
    #[cfg(not(any(feature = "klog-itm", feature = "klog-semihosting")))]
    let _ = args;
}

/// Raises the interrupt priority mask to the kernel threshold and returns
/// the displaced mask. Re-entrant: `BASEPRI_MAX` only ever tightens.
pub fn enter_critical() -> u32 {
    let prev = cortex_m::register::basepri::read();
    unsafe {
        cortex_m::register::basepri_max::write(INTERRUPT_MASK_THRESHOLD);
    }
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
    u32::from(prev)
}

/// Restores a mask displaced by [`enter_critical`].
pub fn exit_critical(prev: u32) {
    unsafe {
        cortex_m::register::basepri::write(prev as u8);
    }
}

/// Runs `f` on the kernel inside a critical section, then converts any
/// pending switch request into a PendSV on the way out. Every kernel entry
/// point funnels through here.
pub(crate) fn with_kernel<T>(f: impl FnOnce(&mut Kernel<ReadyTable>) -> T) -> T {
    let prev = enter_critical();
    // Safety: the mask is at the threshold, so nothing that could observe
    // or reenter this access can run until we exit the section.
    let kernel = unsafe { (*core::ptr::addr_of_mut!(KERNEL)).as_mut() };
    let kernel = match kernel {
        Some(k) => k,
        None => panic!("kernel entered before scheduler_init"),
    };
    let result = f(kernel);
    if kernel.take_switch_pending() {
        // PendSV shares the masked priority band, so it stays pending until
        // the section ends and fires immediately after.
        request_switch();
    }
    exit_critical(prev);
    result
}

/// Installs the kernel instance. Called exactly once, from
/// `startup::scheduler_init`.
pub(crate) fn install_kernel(kernel: Kernel<ReadyTable>) {
    let prev = enter_critical();
    // Safety: single write, before any interrupt that could race is
    // enabled, and guarded by the mask regardless.
    unsafe {
        let slot = &mut *core::ptr::addr_of_mut!(KERNEL);
        uassert!(slot.is_none());
        *slot = Some(kernel);
    }
    exit_critical(prev);
}

/// Sets the pendable software interrupt that performs context switches. It
/// is configured at the lowest priority, so it fires only once the current
/// ISR chain (and any critical section) has unwound.
pub fn request_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Address of the control block the switch trampoline considers current.
/// Zero before the first launch. Goes into the fault record for triage.
pub(crate) fn current_task_addr() -> usize {
    CURRENT_TASK_PTR.load(Ordering::Relaxed) as usize
}

/// The port half of the blocking-IPC contract: critical-sectioned kernel
/// access plus the switch-epoch spin.
pub struct ArmPort;

impl Port for ArmPort {
    type Ready = ReadyTable;

    fn with<T>(&self, f: impl FnOnce(&mut Kernel<ReadyTable>) -> T) -> T {
        with_kernel(f)
    }

    fn switch_epoch(&self) -> u32 {
        SWITCH_EPOCH.load(Ordering::Relaxed)
    }

    fn wait_for_reschedule(&self, since: u32) {
        // The switch away normally happens before we even get here -- the
        // pended PendSV preempts as soon as the enrolling critical section
        // exits -- so by the time this task executes again the epoch has
        // long since moved. The spin covers the remaining sliver.
        while SWITCH_EPOCH.load(Ordering::Relaxed) == since {
            core::hint::spin_loop();
        }
    }
}

/// A task's entry function returned, which the scheduler cannot express.
/// Park it where a debugger will find it.
extern "C" fn returned_task_trap() {
    loop {
        cortex_m::asm::nop();
    }
}

/// Registers the hardware pushes on exception entry, in stack order.
#[derive(Debug, Default, zerocopy::IntoBytes, zerocopy::Immutable)]
#[repr(C)]
struct ExceptionFrame {
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// The full picture `PendSV` leaves on a process stack: the software-pushed
/// callee-saved registers below the hardware frame.
#[derive(Debug, Default, zerocopy::IntoBytes, zerocopy::Immutable)]
#[repr(C)]
struct InitialFrame {
    /// r4 through r11.
    callee_saved: [u32; 8],
    hw: ExceptionFrame,
}

const FRAME_WORDS: usize = core::mem::size_of::<InitialFrame>() / 4;

/// Fabricates the initial stack image for a task that has never run, such
/// that the restore half of `PendSV` (or the startup `SVCall`) "returns"
/// into `entry(arg)`. Returns the word index of the new stack top.
pub fn init_stack(stack: &mut [u32], entry: TaskEntry, arg: usize) -> usize {
    // The exception entry sequence requires 8-byte alignment; the stack
    // base is only guaranteed word alignment, so shave the top down.
    let base = stack.as_ptr() as usize;
    let top = (base + stack.len() * 4) & !(STACK_ALIGNMENT - 1);
    let top = (top - base) / 4;
    uassert!(top >= FRAME_WORDS);

    let frame = InitialFrame {
        callee_saved: [0; 8],
        hw: ExceptionFrame {
            r0: arg as u32,
            // A task that returns from its entry point has nowhere to go.
            lr: returned_task_trap as usize as u32,
            pc: (entry as usize as u32) & !1, // exception return re-sets Thumb
            xpsr: INITIAL_PSR,
            ..ExceptionFrame::default()
        },
    };
    let words: [u32; FRAME_WORDS] = zerocopy::transmute!(frame);
    let frame_at = top - FRAME_WORDS;
    stack[frame_at..top].copy_from_slice(&words);
    frame_at
}

/// Final, non-returning step of kernel startup: configures exception
/// priorities and the tick timer, then traps into `SVCall` to launch the
/// task already recorded in `CURRENT_TASK_PTR`.
///
/// `tick_divisor` is CPU cycles per kernel tick.
pub fn start_first_task(tick_divisor: u32, first: *mut Task) -> ! {
    CURRENT_TASK_PTR.store(first, Ordering::Relaxed);

    // Safety: we're purely lowering exception priorities from their reset
    // values, which cannot cause surprise preemption; the register API is
    // just conservatively unsafe.
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        // SVCall, SysTick, and PendSV all go to the lowest priority so no
        // device ISR is ever delayed by the kernel's own housekeeping.
        scb.shpr[7].write(0xFF);
        scb.shpr[10].write(0xFF);
        scb.shpr[11].write(0xFF);
    }

    // Safety: same shape; enabling the counter can at worst fire our own
    // lowest-priority interrupt.
    unsafe {
        let syst = &*cortex_m::peripheral::SYST::PTR;
        syst.rvr.write(tick_divisor - 1);
        syst.cvr.write(0);
        // processor clock, interrupt on, counter on
        syst.csr.modify(|v| v | 0b111);
    }

    // Reclaim the boot stack, open the interrupt gates, and trap. The
    // SVCall handler notices it was invoked from the main stack and runs
    // its launch path instead of treating this as a switch.
    unsafe {
        core::arch::asm!(
            "
            movw r0, #0xED08            @ SCB.VTOR: vector table base...
            movt r0, #0xE000
            ldr r0, [r0]
            ldr r0, [r0]                @ ...whose first entry is MSP reset
            msr MSP, r0
            cpsie i
            cpsie f
            dsb
            isb
            svc #0
            ",
            options(noreturn),
        )
    }
}

// Handler that gets linked into the vector table for the Supervisor Call
// (SVC) instruction. (Name is dictated by the `cortex_m` crate.)
//
// Only the startup path ever executes it: load the first task's registers
// from its fabricated stack image, point PSP at the unwound stack, drop the
// mask, and fake an exception return into thread mode.
global_asm! {"
    .section .text.SVCall
    .globl SVCall
    .type SVCall,function
    SVCall:
        movw r0, #:lower16:CURRENT_TASK_PTR
        movt r0, #:upper16:CURRENT_TASK_PTR
        ldr r1, [r0]
        ldr r0, [r1]                @ first word of the block: stack top
        ldmia r0!, {{r4-r11}}       @ software half of the frame
        msr PSP, r0                 @ hardware half unwinds from here
        isb
        movs r0, #0
        msr BASEPRI, r0
        orr lr, lr, #0xD            @ thread mode, process stack
        bx lr
",
}

// Handler that gets linked into the vector table for PendSV. This is the
// context switch: deposit the outgoing task's callee-saved registers on its
// process stack, record the stack top at word zero of its control block,
// pick the next task under the mask, and reverse the procedure.
global_asm! {"
    .section .text.PendSV
    .globl PendSV
    .type PendSV,function
    PendSV:
        mrs r0, PSP
        isb
        movw r2, #:lower16:CURRENT_TASK_PTR
        movt r2, #:upper16:CURRENT_TASK_PTR
        ldr r1, [r2]
        stmdb r0!, {{r4-r11}}
        str r0, [r1]                @ record new stack top in the block

        stmdb sp!, {{r3, lr}}
        movs r0, {mask}             @ scheduler state needs the mask
        msr BASEPRI, r0
        dsb
        isb
        bl pendsv_entry
        movs r0, #0
        msr BASEPRI, r0
        ldmia sp!, {{r3, lr}}

        movw r2, #:lower16:CURRENT_TASK_PTR
        movt r2, #:upper16:CURRENT_TASK_PTR
        ldr r1, [r2]                @ possibly a different task now
        ldr r0, [r1]
        ldmia r0!, {{r4-r11}}
        msr PSP, r0
        isb
        bx lr
",
    mask = const INTERRUPT_MASK_THRESHOLD,
}

/// The Rust side of the PendSV handler, entered with the outgoing task's
/// registers parked and `BASEPRI` at the threshold.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    // Safety: the asm wrapper raised the mask, so this is as exclusive as
    // any critical section.
    let kernel = unsafe { (*core::ptr::addr_of_mut!(KERNEL)).as_mut() };
    let kernel = match kernel {
        Some(k) => k,
        None => panic!("context switch before scheduler_init"),
    };
    let _ = kernel.switch_context();
    CURRENT_TASK_PTR.store(kernel.current_task_ptr(), Ordering::Relaxed);
    SWITCH_EPOCH.fetch_add(1, Ordering::Relaxed);
}

/// Handler that gets linked into the vector table for the System Tick Timer
/// interrupt. (Name is dictated by the `cortex_m` crate.)
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    with_kernel(|k| k.check_ticks());
}
