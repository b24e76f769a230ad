//! VGA text-mode screen.
//!
//! 80x25 cells at 0xB8000, two bytes per cell. The screen is a write-only
//! sink: `print` appends at the cursor with scrolling, `print_at` stamps a
//! string at a fixed cell, `backspace` erases the previous cell. The
//! hardware cursor follows via the CRTC index ports.

use core::fmt;

use spin::Mutex;

use crate::x86::{outb, without_interrupts};

const VMEM: *mut u8 = 0xB8000 as *mut u8;
const COLS: usize = 80;
const ROWS: usize = 25;

/// White on black.
const ATTRIBUTE: u8 = 0x0F;

const CRTC_INDEX: u16 = 0x3D4;
const CRTC_DATA: u16 = 0x3D5;
const CURSOR_HIGH: u8 = 14;
const CURSOR_LOW: u8 = 15;

pub struct Screen {
    col: usize,
    row: usize,
}

static SCREEN: Mutex<Screen> = Mutex::new(Screen { col: 0, row: 0 });

/// Appends `msg` at the cursor.
pub fn print(msg: &str) {
    with_screen(|screen| screen.print(msg));
}

/// Writes `msg` starting at a fixed cell without moving the cursor.
pub fn print_at(msg: &str, col: usize, row: usize) {
    with_screen(|screen| screen.print_at(msg, col, row));
}

/// Erases the cell before the cursor and steps back.
pub fn backspace() {
    with_screen(|screen| screen.backspace());
}

pub fn clear() {
    with_screen(|screen| screen.clear());
}

/// Whether the screen lock is currently held. The panic path checks this
/// before deciding how to get its message out.
pub fn is_locked() -> bool {
    SCREEN.try_lock().is_none()
}

/// Runs `f` with the locked screen, for formatted output. The screen is
/// written from interrupt handlers too, so the lock is only ever held with
/// interrupts off.
pub fn with_screen<R>(f: impl FnOnce(&mut Screen) -> R) -> R {
    without_interrupts(|| f(&mut SCREEN.lock()))
}

/// A screen writer that ignores the lock and starts from the top. Only for
/// the panic path, where the lock holder is never coming back.
pub unsafe fn forced() -> Screen {
    let mut screen = Screen { col: 0, row: 0 };
    screen.clear();
    screen
}

impl Screen {
    pub fn clear(&mut self) {
        for cell in 0..COLS * ROWS {
            put_cell(cell % COLS, cell / COLS, b' ');
        }
        self.col = 0;
        self.row = 0;
        self.update_cursor();
    }

    pub fn print(&mut self, msg: &str) {
        for byte in msg.bytes() {
            self.put_byte(byte);
        }
        self.update_cursor();
    }

    pub fn print_at(&mut self, msg: &str, col: usize, row: usize) {
        for (i, byte) in msg.bytes().enumerate() {
            let col = col + i;
            if col >= COLS || row >= ROWS {
                break;
            }
            put_cell(col, row, byte);
        }
    }

    pub fn backspace(&mut self) {
        if self.col > 0 {
            self.col -= 1;
        } else if self.row > 0 {
            self.row -= 1;
            self.col = COLS - 1;
        }
        put_cell(self.col, self.row, b' ');
        self.update_cursor();
    }

    fn put_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.col = 0;
                self.row += 1;
            }
            byte => {
                put_cell(self.col, self.row, byte);
                self.col += 1;
                if self.col == COLS {
                    self.col = 0;
                    self.row += 1;
                }
            }
        }
        if self.row == ROWS {
            self.scroll();
            self.row = ROWS - 1;
        }
    }

    fn scroll(&mut self) {
        for row in 1..ROWS {
            for col in 0..COLS {
                let from = cell_ptr(col, row);
                let to = cell_ptr(col, row - 1);
                // SAFETY: both pointers are in-bounds cells of the VGA
                // buffer.
                unsafe {
                    core::ptr::write_volatile(to, core::ptr::read_volatile(from));
                    core::ptr::write_volatile(to.add(1), core::ptr::read_volatile(from.add(1)));
                }
            }
        }
        for col in 0..COLS {
            put_cell(col, ROWS - 1, b' ');
        }
    }

    fn update_cursor(&self) {
        let position = (self.row * COLS + self.col) as u16;
        // SAFETY: CRTC cursor-position protocol on the standard index/data
        // port pair.
        unsafe {
            outb(CRTC_INDEX, CURSOR_HIGH);
            outb(CRTC_DATA, (position >> 8) as u8);
            outb(CRTC_INDEX, CURSOR_LOW);
            outb(CRTC_DATA, position as u8);
        }
    }
}

impl fmt::Write for Screen {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print(s);
        Ok(())
    }
}

fn put_cell(col: usize, row: usize, byte: u8) {
    let ptr = cell_ptr(col, row);
    // SAFETY: `cell_ptr` bounds the offset to the 80x25 buffer.
    unsafe {
        core::ptr::write_volatile(ptr, byte);
        core::ptr::write_volatile(ptr.add(1), ATTRIBUTE);
    }
}

fn cell_ptr(col: usize, row: usize) -> *mut u8 {
    assert!(col < COLS && row < ROWS);
    // SAFETY: the offset stays inside the text buffer.
    unsafe { VMEM.add(2 * (row * COLS + col)) }
}
