//! Flat 32-bit GDT: null, kernel code, kernel data. Everything runs ring 0
//! with 4 GiB flat segments; segmentation exists only because the CPU
//! requires it.

use core::arch::asm;
use core::mem::size_of;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

// Each descriptor encodes base 0, limit 0xFFFFF with 4 KiB granularity and
// 32-bit default operation size; only the type differs.
const KERNEL_CODE_DESCRIPTOR: u64 = 0x00CF_9A00_0000_FFFF;
const KERNEL_DATA_DESCRIPTOR: u64 = 0x00CF_9200_0000_FFFF;

static GDT: [u64; 3] = [0, KERNEL_CODE_DESCRIPTOR, KERNEL_DATA_DESCRIPTOR];

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

/// Loads the GDT and reloads every segment register.
pub fn init() {
    let pointer = DescriptorTablePointer {
        limit: (size_of::<[u64; 3]>() - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    // SAFETY: the table is static and the selectors below index it. The far
    // return reloads CS with the new code selector.
    unsafe {
        asm!(
            "lgdt [{pointer}]",
            "mov ds, {data:x}",
            "mov es, {data:x}",
            "mov fs, {data:x}",
            "mov gs, {data:x}",
            "mov ss, {data:x}",
            "push {code}",
            "lea {scratch}, [2f]",
            "push {scratch}",
            "retf",
            "2:",
            pointer = in(reg) &pointer,
            data = in(reg) u32::from(KERNEL_DATA_SELECTOR),
            code = in(reg) u32::from(KERNEL_CODE_SELECTOR),
            scratch = out(reg) _,
        );
    }
}
