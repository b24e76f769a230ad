//! IDT setup and the low-level interrupt path.
//!
//! Every vector gets a tiny asm stub that normalizes the stack to one
//! layout: error code (zero if the CPU pushed none), vector number, the
//! `pusha` block, the data segment and CR3. That layout is
//! [`InterruptFrame`]; the common dispatcher hands a `&mut` to the
//! registered handler and the return path restores CR3 and the registers
//! from the (possibly rewritten) frame before `iretd`. Rewriting the frame
//! is how the scheduler switches tasks and address spaces.

use core::arch::{asm, global_asm};
use core::mem::size_of;

use spin::Mutex;

use shared::task::InterruptFrame;

use crate::gdt::KERNEL_CODE_SELECTOR;

pub type InterruptHandler = fn(&mut InterruptFrame);

/// 32-bit interrupt gate, DPL 0.
const GATE_FLAGS: u8 = 0x8E;

#[repr(C)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    flags: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> IdtEntry {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            zero: 0,
            flags: 0,
            offset_high: 0,
        }
    }

    fn new(stub: u32) -> IdtEntry {
        IdtEntry {
            offset_low: stub as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            flags: GATE_FLAGS,
            offset_high: (stub >> 16) as u16,
        }
    }
}

static_assertions::assert_eq_size!(IdtEntry, u64);

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

static IDT: Mutex<[IdtEntry; 256]> = Mutex::new([IdtEntry::missing(); 256]);

static HANDLERS: Mutex<[Option<InterruptHandler>; 256]> = Mutex::new([None; 256]);

/// Points every IDT gate at its stub and loads the table. Interrupts must
/// still be disabled; handlers are installed afterwards.
pub fn init() {
    let mut idt = IDT.lock();
    // SAFETY: the stub table is emitted by the global_asm block below with
    // exactly 256 entries.
    let stubs = unsafe { &INTERRUPT_STUBS };
    for (gate, &stub) in idt.iter_mut().zip(stubs.iter()) {
        *gate = IdtEntry::new(stub);
    }

    let pointer = DescriptorTablePointer {
        limit: (size_of::<[IdtEntry; 256]>() - 1) as u16,
        base: idt.as_ptr() as u32,
    };
    // SAFETY: the table is a static and stays valid and in place forever.
    unsafe {
        asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}

/// Installs (or clears) the handler for `vector`.
pub fn install_interrupt_handler(vector: u8, handler: Option<InterruptHandler>) {
    let mut handlers = HANDLERS.lock();
    if handler.is_some() {
        assert!(handlers[vector as usize].is_none());
    }
    handlers[vector as usize] = handler;
}

#[no_mangle]
extern "C" fn interrupt_dispatch(frame: &mut InterruptFrame) {
    let handler = HANDLERS.lock()[frame.vector as usize];
    match handler {
        Some(handler) => handler(frame),
        None if frame.vector < 32 => {
            panic!(
                "{} (vector {}) at {:#010x}, error code {:#x}",
                EXCEPTION_NAMES[frame.vector as usize], frame.vector, frame.eip, frame.error_code
            );
        }
        None => {
            log::warn!("ignoring unexpected interrupt {}", frame.vector);
        }
    }
}

const EXCEPTION_NAMES: [&str; 32] = [
    "divide error",
    "debug",
    "non-maskable interrupt",
    "breakpoint",
    "overflow",
    "bound range exceeded",
    "invalid opcode",
    "device not available",
    "double fault",
    "coprocessor segment overrun",
    "invalid TSS",
    "segment not present",
    "stack-segment fault",
    "general protection fault",
    "page fault",
    "reserved",
    "x87 floating point",
    "alignment check",
    "machine check",
    "SIMD floating point",
    "virtualization",
    "control protection",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
    "reserved",
];

extern "C" {
    static INTERRUPT_STUBS: [u32; 256];
}

// One stub per vector. Vectors 8, 10-14 and 17 come with a CPU-pushed error
// code; the rest push a zero so every frame has the same shape. The common
// tail saves the registers, the data segment and CR3 (lowest on the stack,
// matching `InterruptFrame`), runs the dispatcher on kernel segments, then
// restores everything from the frame and returns.
global_asm!(
    r#"
.altmacro
.macro vector_stub vec
vector_stub_\vec:
.if (\vec == 8) || ((\vec >= 10) && (\vec <= 14)) || (\vec == 17)
    push \vec
.else
    push 0
    push \vec
.endif
    jmp interrupt_common

.endm

.macro vector_stub_addr vec
    .long vector_stub_\vec
.endm

.lcomm interrupt_resume_esp, 4

interrupt_common:
    pusha
    push ds
    mov eax, cr3
    push eax
    mov ax, {data_selector}
    mov ds, ax
    mov es, ax
    push esp
    call interrupt_dispatch
    add esp, 4
    pop eax
    mov cr3, eax
    pop ds

    /* A same-privilege iretd does not reload esp, so resuming a frame that
     * was saved on a different stack needs an explicit switch. The saved
     * esp field is the address of the frame's vector slot; if it is not
     * ours, rebuild eip/cs/eflags above it on the target stack and pivot
     * there before returning. */
    mov eax, [esp + 12]
    lea ebx, [esp + 32]
    cmp eax, ebx
    je 4f
    mov ecx, [esp + 40]
    mov [eax + 8], ecx
    mov ecx, [esp + 44]
    mov [eax + 12], ecx
    mov ecx, [esp + 48]
    mov [eax + 16], ecx
    add eax, 8
    mov [interrupt_resume_esp], eax
    popa
    mov esp, [interrupt_resume_esp]
    iretd
4:
    popa
    add esp, 8
    iretd

.set vec, 0
.rept 256
    vector_stub %vec
    .set vec, vec + 1
.endr

.global INTERRUPT_STUBS
INTERRUPT_STUBS:
.set vec, 0
.rept 256
    vector_stub_addr %vec
    .set vec, vec + 1
.endr
"#,
    data_selector = const crate::gdt::KERNEL_DATA_SELECTOR,
);
