//! The service-call gate and its user-side wrappers.
//!
//! One software interrupt, dispatched on `eax`: 0 inserts the calling task,
//! 1 forks, 2 builds task paging. The gate switches CR3 to the kernel
//! directory before servicing; the common interrupt return path restores
//! CR3 from the saved frame, so a fork comes back under whichever space the
//! scheduler wrote there.

use core::arch::asm;

use shared::config::SERVICE_VECTOR;
use shared::task::InterruptFrame;

use crate::{idt, mm, tasks, x86};

pub fn init() {
    idt::install_interrupt_handler(SERVICE_VECTOR, Some(service_entry));
}

fn service_entry(frame: &mut InterruptFrame) {
    // SAFETY: the kernel directory identity-maps the gate, the stack and
    // all kernel data.
    unsafe {
        x86::write_cr3(mm::kernel_cr3());
    }
    tasks::service(frame);
}

/// Registers the calling context as a task owned by the space `handle`.
/// Returns the new PID, or [`tasks::SERVICE_ERROR`](crate::tasks::SERVICE_ERROR).
pub fn sys_insert_task(handle: u32) -> u32 {
    let result: u32;
    // SAFETY: the gate is installed before any caller can reach this.
    unsafe {
        asm!(
            "int {vector}",
            vector = const SERVICE_VECTOR,
            inout("eax") 0u32 => result,
            in("ebx") handle,
        );
    }
    result
}

/// Forks the calling task. Returns twice: zero in the child (running under
/// the space `handle`), the child's PID in the parent. Part of the ABI for
/// loaded programs.
#[allow(dead_code)]
pub fn sys_fork(handle: u32) -> u32 {
    let result: u32;
    // SAFETY: the gate is installed before any caller can reach this. The
    // label is the shared resumption point: the child falls through the
    // trap, the parent is resumed there by the scheduler.
    unsafe {
        asm!(
            "lea ecx, [2f]",
            "int {vector}",
            "2:",
            vector = const SERVICE_VECTOR,
            inout("eax") 1u32 => result,
            in("ebx") handle,
            out("ecx") _,
        );
    }
    result
}

/// Builds a new address space with a mapped user stack for the caller and
/// points `esp`/`ebp` at it. Returns the space handle. Part of the ABI for
/// loaded programs.
#[allow(dead_code)]
pub fn sys_setup_task_paging() -> u32 {
    let result: u32;
    // SAFETY: the gate is installed before any caller can reach this.
    unsafe {
        asm!(
            "int {vector}",
            vector = const SERVICE_VECTOR,
            inout("eax") 2u32 => result,
        );
    }
    result
}
