//! PS/2 keyboard: IRQ 1 scancodes to a line buffer.
//!
//! Scancode set 1 bytes from port 0x60 run through the `pc_keyboard` state
//! machine (US QWERTY, shift and ctrl tracked there). Printable characters
//! echo to the screen and append to the line buffer; backspace edits it;
//! Enter hands the finished line to whoever polls.

use alloc::string::String;

use arrayvec::ArrayVec;
use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use shared::task::InterruptFrame;

use crate::{pic, vga, x86};

const KEYBOARD_IRQ: u8 = 1;
const KEYBOARD_DATA_PORT: u16 = 0x60;
const LINE_CAPACITY: usize = 256;

lazy_static! {
    static ref KEYBOARD: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> = Mutex::new(
        Keyboard::new(ScancodeSet1::new(), layouts::Us104Key, HandleControl::Ignore)
    );
}

static LINE: Mutex<ArrayVec<u8, LINE_CAPACITY>> = Mutex::new(ArrayVec::new_const());
static COMPLETED: Mutex<Option<String>> = Mutex::new(None);

pub fn init() {
    pic::install_irq_handler(KEYBOARD_IRQ, Some(keyboard_handler));
}

/// Takes the most recent completed line, if any. Called from the shell
/// loop; a second Enter before a poll replaces the pending line.
pub fn poll_line() -> Option<String> {
    x86::without_interrupts(|| COMPLETED.lock().take())
}

fn keyboard_handler(_frame: &mut InterruptFrame) {
    // SAFETY: reading the PS/2 data port consumes the pending scancode.
    let scancode = unsafe { x86::inb(KEYBOARD_DATA_PORT) };

    let mut keyboard = KEYBOARD.lock();
    if let Ok(Some(event)) = keyboard.add_byte(scancode) {
        if let Some(DecodedKey::Unicode(ch)) = keyboard.process_keyevent(event) {
            handle_char(ch);
        }
    }
}

fn handle_char(ch: char) {
    match ch {
        '\n' => {
            let mut line = LINE.lock();
            let text = core::str::from_utf8(&line).unwrap_or("").into();
            line.clear();
            *COMPLETED.lock() = Some(text);
            vga::print("\n");
        }
        '\x08' => {
            if LINE.lock().pop().is_some() {
                vga::backspace();
            }
        }
        ch if ch.is_ascii() && !ch.is_control() => {
            if LINE.lock().try_push(ch as u8).is_ok() {
                vga::print(ch.encode_utf8(&mut [0u8; 4]));
            }
        }
        _ => {}
    }
}
