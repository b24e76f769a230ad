//! Kernel memory bring-up: the heap window, the global frame bitmap, the
//! kernel address space and the page-fault path.
//!
//! The heap doubles as the global allocator, so everything `alloc`-shaped
//! in the kernel (boxed page tables, catalog buffers, shell strings) comes
//! out of the same fixed window.

use core::alloc::{GlobalAlloc, Layout};

use log::info;
use spin::Mutex;

use shared::config::{
    HEAP_ALIGNMENT, HEAP_BASE, HEAP_BLOCKS, HEAP_LIMIT, HEAP_SPLIT_THRESHOLD,
};
use shared::heap::Heap;
use shared::paging::AddressSpace;
use shared::physmem::FrameBitmap;
use shared::task::{InterruptFrame, PageFaultCode};

use crate::{idt, x86};

const PAGE_FAULT_VECTOR: u8 = 14;

struct KernelHeap(Mutex<Option<Heap<HEAP_BLOCKS>>>);

#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap(Mutex::new(None));

static FRAMES: Mutex<Option<FrameBitmap>> = Mutex::new(None);
static KERNEL_SPACE: Mutex<Option<AddressSpace>> = Mutex::new(None);

// SAFETY: the heap hands out disjoint, aligned ranges of its window, which
// is reserved for it by the fixed memory map. The lock is shared with
// interrupt context, so it is only held with interrupts off.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        x86::without_interrupts(|| {
            let mut guard = self.0.lock();
            let Some(heap) = guard.as_mut() else {
                return core::ptr::null_mut();
            };
            let addr = if layout.align() > HEAP_ALIGNMENT {
                heap.alloc_aligned(layout.size(), layout.align())
            } else {
                heap.alloc(layout.size())
            };
            addr.map_or(core::ptr::null_mut(), |addr| addr as *mut u8)
        })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        x86::without_interrupts(|| {
            let mut guard = self.0.lock();
            let heap = guard.as_mut().expect("dealloc before heap init");
            assert!(heap.free(ptr as usize), "freeing unknown pointer");
        })
    }
}

/// Sizes visible to the `debug_command` shell verb.
pub struct HeapStats {
    pub used: usize,
    pub free: usize,
    pub fresh: usize,
    pub top: usize,
}

pub fn heap_stats() -> HeapStats {
    x86::without_interrupts(|| {
        let mut guard = ALLOCATOR.0.lock();
        let heap = guard.as_mut().expect("heap not initialized");
        HeapStats {
            used: heap.num_used(),
            free: heap.num_free(),
            fresh: heap.num_fresh(),
            top: heap.top(),
        }
    })
}

/// Places the heap over its fixed window. Must run before anything
/// allocates.
pub fn init_heap() {
    let mut guard = ALLOCATOR.0.lock();
    assert!(guard.is_none(), "heap initialized twice");
    *guard = Some(Heap::new(
        HEAP_BASE,
        HEAP_LIMIT,
        HEAP_SPLIT_THRESHOLD,
        HEAP_ALIGNMENT,
    ));
    info!("heap over {HEAP_BASE:#x}..{HEAP_LIMIT:#x}");
}

/// Builds the kernel address space, loads it into CR3, turns paging on and
/// registers the page-fault vector.
pub fn init_paging() {
    let mut frames = FrameBitmap::new_full();
    let kernel_space = AddressSpace::new_kernel(&mut frames);
    let dir_base = kernel_space.dir_base();

    *FRAMES.lock() = Some(frames);
    *KERNEL_SPACE.lock() = Some(kernel_space);

    idt::install_interrupt_handler(PAGE_FAULT_VECTOR, Some(page_fault_handler));

    // SAFETY: the kernel space identity-maps everything outside the hole,
    // which includes all kernel code, data and the heap window.
    unsafe {
        x86::write_cr3(dir_base);
        x86::enable_paging();
    }
    info!("paging enabled, kernel directory at {dir_base:#x}");
}

/// CR3 value of the kernel address space.
pub fn kernel_cr3() -> u32 {
    x86::without_interrupts(|| {
        KERNEL_SPACE
            .lock()
            .as_ref()
            .expect("paging not initialized")
            .dir_base()
    })
}

/// Runs `f` with the kernel space and the global frame bitmap. Both locks
/// are shared with the service gate, so they are only held with interrupts
/// off.
pub fn with_paging<R>(f: impl FnOnce(&AddressSpace, &mut FrameBitmap) -> R) -> R {
    x86::without_interrupts(|| {
        let space_guard = KERNEL_SPACE.lock();
        let mut frames_guard = FRAMES.lock();
        f(
            space_guard.as_ref().expect("paging not initialized"),
            frames_guard.as_mut().expect("paging not initialized"),
        )
    })
}

// Classifies the fault and panics; there is no recovery path in this
// revision.
fn page_fault_handler(frame: &mut InterruptFrame) {
    let address = x86::read_cr2();
    let code = PageFaultCode::from_bits_truncate(frame.error_code);
    panic!(
        "page fault at {address:#010x} (eip {:#010x}): {} during {} in {} mode{}",
        frame.eip,
        if code.contains(PageFaultCode::PROTECTION) {
            "protection violation"
        } else {
            "absent page"
        },
        if code.contains(PageFaultCode::INSTRUCTION) {
            "instruction fetch"
        } else if code.contains(PageFaultCode::WRITE) {
            "write"
        } else {
            "read"
        },
        if code.contains(PageFaultCode::USER) {
            "user"
        } else {
            "supervisor"
        },
        if code.contains(PageFaultCode::RESERVED) {
            ", reserved bit set"
        } else {
            ""
        },
    );
}
