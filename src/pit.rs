//! Programmable interval timer: the preemption clock.
//!
//! Channel 0 runs as a mode-3 square wave at `1193180 / freq` and fires
//! IRQ 0. Each tick bumps the counter and runs the scheduler over the
//! interrupt frame, which is what preempts the running task.

use core::fmt::Write;
use core::sync::atomic::{AtomicU32, Ordering};

use arrayvec::ArrayString;

use shared::task::InterruptFrame;

use crate::{mm, pic, tasks, vga, x86};

/// Base oscillator of the PIT, in Hz.
const PIT_INPUT_HZ: u32 = 1_193_180;

static TICKS: AtomicU32 = AtomicU32::new(0);

/// Programs channel 0 for `freq` interrupts per second and unmasks IRQ 0.
pub fn init(freq: u32) {
    pic::install_irq_handler(0, Some(timer_handler));

    let divisor = PIT_INPUT_HZ / freq;
    // SAFETY: channel 0 command + reload value, the standard bring-up
    // sequence. Command 0x36 selects channel 0, lobyte/hibyte access,
    // square-wave mode.
    unsafe {
        x86::outb(0x43, 0x36);
        x86::outb(0x40, divisor as u8);
        x86::outb(0x40, (divisor >> 8) as u8);
    }
}

/// Ticks since the timer was started.
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Busy-waits for `n_ticks` timer ticks.
pub fn wait_ticks(n_ticks: u32) {
    let start = ticks();
    while ticks().wrapping_sub(start) < n_ticks {
        core::hint::spin_loop();
    }
}

fn timer_handler(frame: &mut InterruptFrame) {
    let tick = TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    // Heap-top readout in the screen corner, refreshed every 25 ticks.
    if tick % 25 == 0 {
        let mut text = ArrayString::<24>::new();
        let _ = write!(text, "top {:#010x}", mm::heap_stats().top);
        vga::print_at(&text, 0, 0);
    }

    tasks::preempt(frame);
}
