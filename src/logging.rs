//! The kernel logger.
//!
//! There are exactly two places a log line can go: the VGA screen, and
//! QEMU's debug port when the `qemu_debugcon` feature is on. One concrete
//! logger covers both; records are mirrored to the debug port first so a
//! crash mid-screen-write still leaves a trace in the emulator log.

use core::fmt::Write;

use log::{Log, Metadata, Record};

use crate::vga;

struct KernelLog;

static LOGGER: KernelLog = KernelLog;

impl Log for KernelLog {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        mirror_to_debugcon(record);
        vga::with_screen(|screen| {
            let _ = writeln!(
                screen,
                "[{:>5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        });
    }

    fn flush(&self) {}
}

cfg_if::cfg_if! {
    if #[cfg(feature = "qemu_debugcon")] {
        fn mirror_to_debugcon(record: &Record) {
            let _ = writeln!(
                &mut QemuDebugWriter,
                "[{:>5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    } else {
        fn mirror_to_debugcon(_record: &Record) {}
    }
}

/// Writes to QEMU's debug-out port. The panic path also writes this
/// directly when the screen is unusable.
pub struct QemuDebugWriter;

impl Write for QemuDebugWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            // SAFETY: port 0xe9 is QEMU's debug console; writes are
            // side-effect free on real hardware without the device.
            unsafe {
                crate::x86::outb(0xe9, byte);
            }
        }
        Ok(())
    }
}

pub fn init() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(log::LevelFilter::Info);
}

/// Whether the logger can be used from the panic path. The debug port is
/// always writable; the screen lock is the part that can be left wedged by
/// a panic mid-write.
pub fn is_locked() -> bool {
    vga::is_locked()
}
