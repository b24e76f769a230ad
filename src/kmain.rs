//! Boot sequence and the terminal error path.

use core::fmt::Write;
use core::panic::PanicInfo;

use log::{error, info};

use shared::config::TIMER_HZ;

use crate::{fs, gdt, idt, keyboard, logging, mm, pic, pit, shell, syscall, tasks, vga, x86};

/// Entry point, reached from the boot loader with interrupts disabled and
/// a flat-mapped low memory image.
#[no_mangle]
pub extern "C" fn kernel_entry() -> ! {
    x86::disable_interrupts();
    vga::clear();
    logging::init();
    info!("vanadium booting");

    gdt::init();
    info!("GDT loaded");

    idt::init();
    // SAFETY: interrupts are still disabled; the IDT is in place.
    unsafe {
        pic::init();
    }
    info!("IDT and PIC ready");

    mm::init_heap();
    mm::init_paging();

    fs::init();

    syscall::init();
    keyboard::init();
    pit::init(TIMER_HZ);

    // SAFETY: every handler the unmasked IRQs can raise is installed.
    unsafe {
        x86::enable_interrupts();
    }

    // Become a task, so anything the shell starts shares time with it.
    syscall::sys_insert_task(tasks::KERNEL_SPACE_HANDLE);

    let reporter = tick_reporter as extern "C" fn() -> !;
    if tasks::start_kernel_task(reporter as u32).is_err() {
        error!("could not start the tick reporter");
    }

    shell::run()
}

// A second task, preempted against the shell from day one.
extern "C" fn tick_reporter() -> ! {
    loop {
        pit::wait_ticks(TIMER_HZ * 60);
        info!(
            "up {}s, {} tasks",
            pit::ticks() / TIMER_HZ,
            tasks::task_count()
        );
    }
}

// The only terminal error path: interrupts off, say what happened, halt.
// If the logger itself is wedged, write the screen directly.
#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    x86::disable_interrupts();

    if !logging::is_locked() {
        error!("{info}");
    } else {
        // SAFETY: whoever held the screen lock is never resuming.
        let mut screen = unsafe { vga::forced() };
        let _ = write!(&mut screen, "{info}");
        let _ = write!(&mut logging::QemuDebugWriter, "{info}");
    }

    x86::halt_forever();
}
