//! Kernel-side scheduler state: the task table, the address-space registry
//! and the service implementations behind the gate.
//!
//! Address spaces never cross the gate as pointers. The registry parks
//! every space built by the paging-setup service and hands the caller a
//! small integer; handle 0 always names the kernel space.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use log::warn;
use num_traits::FromPrimitive;
use spin::Mutex;

use shared::config::MAX_TASKS;
use shared::paging::AddressSpace;
use shared::sched::{setup_task_paging, Pid, SchedError, Scheduler};
use shared::task::InterruptFrame;

use crate::gdt::{KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR};
use crate::mm;

/// Space-registry handle naming the kernel address space.
pub const KERNEL_SPACE_HANDLE: u32 = 0;

/// Returned in `eax` when a service fails (table full, bad handle, frame
/// pool exhausted).
pub const SERVICE_ERROR: u32 = u32::MAX;

/// Stack handed to tasks started from the shell.
const KERNEL_TASK_STACK: usize = 16 * 1024;

/// IF set, reserved bit 1 set.
const INITIAL_EFLAGS: u32 = 0x202;

lazy_static! {
    static ref SCHEDULER: Mutex<Scheduler<MAX_TASKS>> = Mutex::new(Scheduler::new());
    static ref SPACES: Mutex<Vec<AddressSpace>> = Mutex::new(Vec::new());
}

#[derive(num_derive::FromPrimitive)]
#[repr(u32)]
enum ServiceCall {
    InsertTask = 0,
    Fork = 1,
    SetupTaskPaging = 2,
}

/// Timer-IRQ entry: round-robin over the populated slots.
pub fn preempt(frame: &mut InterruptFrame) {
    SCHEDULER.lock().preempt(frame);
}

pub fn task_count() -> usize {
    crate::x86::without_interrupts(|| SCHEDULER.lock().len())
}

/// Dispatches a trap at the service gate on the caller's `eax`. Results go
/// back to the caller in `eax`.
pub fn service(frame: &mut InterruptFrame) {
    let result = match ServiceCall::from_u32(frame.eax) {
        Some(ServiceCall::InsertTask) => insert_task(frame),
        Some(ServiceCall::Fork) => fork(frame),
        Some(ServiceCall::SetupTaskPaging) => setup_paging(frame),
        None => {
            warn!("unknown service call {}", frame.eax);
            Err(())
        }
    };
    if let Ok(value) = result {
        frame.eax = value;
    } else {
        frame.eax = SERVICE_ERROR;
    }
}

// Service 0: the caller becomes a task owned by the space in `ebx`.
fn insert_task(frame: &mut InterruptFrame) -> Result<u32, ()> {
    let cr3 = resolve_cr3(frame.ebx).ok_or(())?;
    let pid = SCHEDULER.lock().insert_current(frame, cr3).map_err(drop)?;
    Ok(pid as u32)
}

// Service 1: fork. `ebx` is the child's space handle, `ecx` the caller's
// return address. The scheduler writes both return values itself.
fn fork(frame: &mut InterruptFrame) -> Result<u32, ()> {
    let cr3 = resolve_cr3(frame.ebx).ok_or(())?;
    let return_addr = frame.ecx;
    SCHEDULER.lock().fork(frame, cr3, return_addr).map_err(drop)?;
    // fork() wrote both sides' return values into the frames already.
    Ok(frame.eax)
}

// Service 2: build a fresh space with a mapped user stack, park it in the
// registry and hand back its handle.
fn setup_paging(frame: &mut InterruptFrame) -> Result<u32, ()> {
    let space =
        mm::with_paging(|kernel, frames| setup_task_paging(frame, kernel, frames)).ok_or(())?;
    let mut spaces = SPACES.lock();
    spaces.push(space);
    Ok(spaces.len() as u32)
}

fn resolve_cr3(handle: u32) -> Option<u32> {
    if handle == KERNEL_SPACE_HANDLE {
        return Some(mm::kernel_cr3());
    }
    let spaces = SPACES.lock();
    Some(spaces.get(handle as usize - 1)?.dir_base())
}

/// Starts kernel-space code at `entry` as a new task with its own stack.
/// Used by the shell's `run`; the task shares the kernel address space.
pub fn start_kernel_task(entry: u32) -> Result<Pid, SchedError> {
    let stack = Box::leak(vec![0u8; KERNEL_TASK_STACK].into_boxed_slice());
    let stack_top = (stack.as_ptr() as u32 + KERNEL_TASK_STACK as u32) & !0xF;

    let frame = InterruptFrame {
        eip: entry,
        cs: u32::from(KERNEL_CODE_SELECTOR),
        ds: u32::from(KERNEL_DATA_SELECTOR),
        ss: u32::from(KERNEL_DATA_SELECTOR),
        eflags: INITIAL_EFLAGS,
        // The saved esp names the frame's vector slot; the interrupt return
        // path resumes the task with esp = this value + 20. Shaping it this
        // way makes a fresh task start on an empty stack of its own.
        esp: stack_top - 20,
        ebp: stack_top,
        user_esp: stack_top,
        cr3: mm::kernel_cr3(),
        ..InterruptFrame::default()
    };
    crate::x86::without_interrupts(|| SCHEDULER.lock().insert(frame))
}
