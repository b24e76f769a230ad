//! The canonical saved-register snapshot shared by the ISR stubs, the
//! scheduler and the page-fault path.

use static_assertions::assert_eq_size;

/// Registers as laid out on the stack when the common interrupt dispatcher
/// runs, lowest address first: the stub pushes CR3, the data segment and
/// the `pusha` block on top of the vector number, the error code and the
/// CPU-pushed frame. `user_esp` and `ss` are only meaningful for
/// ring-crossing interrupts.
///
/// The scheduler treats the frame as an opaque record to copy in and out of
/// task slots; only `eip`, `esp`, `ebp`, `cs`, `cr3`, `eflags` and `ds` are
/// ever interpreted, plus `eax`/`ebx`/`ecx` at the service-call gate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InterruptFrame {
    pub cr3: u32,
    pub ds: u32,
    // `pusha` block. `esp` here is the stack pointer at the time of the
    // push; `popa` ignores it on the way out.
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
    // Pushed by the CPU.
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub ss: u32,
}

assert_eq_size!(InterruptFrame, [u32; 17]);

bitflags::bitflags! {
    /// Page-fault error code bits, as pushed by the CPU with vector 14.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PageFaultCode: u32 {
        /// Fault caused by a protection violation (set) rather than an
        /// absent page (clear).
        const PROTECTION = 1 << 0;
        /// Faulting access was a write.
        const WRITE = 1 << 1;
        /// Fault originated in user mode.
        const USER = 1 << 2;
        /// A reserved bit was set in a paging structure.
        const RESERVED = 1 << 3;
        /// Fault on an instruction fetch.
        const INSTRUCTION = 1 << 4;
    }
}
