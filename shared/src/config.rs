//! Fixed addresses and capacities shared by the kernel and its tests.

/// Bytes per page and per physical frame.
pub const PAGE_SIZE: u32 = 4096;

/// Number of 4 KiB pages in the 4 GiB virtual space (and frames in the
/// physical range the frame bitmap covers).
pub const PAGE_COUNT: usize = 1024 * 1024;

/// Start of the kernel heap window.
pub const HEAP_BASE: usize = 0x0010_0000;

/// First address past the kernel heap window. The heap sits entirely below
/// the hole.
pub const HEAP_LIMIT: usize = 0x04FF_F000;

/// Block records available to the heap.
pub const HEAP_BLOCKS: usize = 2048;

/// Minimum excess, in bytes, before an oversized free block is split.
pub const HEAP_SPLIT_THRESHOLD: usize = 16;

/// Payload alignment of every heap allocation.
pub const HEAP_ALIGNMENT: usize = 16;

/// Virtual range left absent in the kernel address space. Tasks populate it
/// with their own mappings.
pub const HOLE_START: u32 = 0x04FF_F000;
pub const HOLE_END: u32 = 0x0700_0000;

/// Page backing a task's user stack, inside the hole.
pub const USER_STACK_PAGE: u32 = 0x05FF_F000;

/// Initial user stack pointer: the top of the stack page.
pub const USER_STACK_TOP: u32 = 0x05FF_FFFF;

/// First sector of the on-disk catalog.
pub const FAT_LBA: u32 = 65;

/// Sectors reserved for the catalog.
pub const FAT_SECTORS: u32 = 6;

/// First sector of the payload region, just past the catalog.
pub const FIRST_DATA_LBA: u32 = 75;

/// Scheduler slots. Insert and fork fail once these are exhausted.
pub const MAX_TASKS: usize = 16;

/// Timer tick rate handed to the PIT at boot.
pub const TIMER_HZ: u32 = 50;

/// Software-interrupt vector of the service-call gate.
pub const SERVICE_VECTOR: u8 = 33;
