//! 8259 PIC setup and IRQ routing.
//!
//! The two PICs are remapped to vectors 40..55 so hardware IRQs stay clear
//! of the CPU exceptions and of the service-call gate at vector 33. All
//! IRQs start out masked; installing a handler unmasks the line.

use spin::Mutex;

use shared::task::InterruptFrame;

use crate::idt::install_interrupt_handler;
use crate::x86::{inb, outb};

pub type IrqHandlerFunc = fn(&mut InterruptFrame);

/// CPU vector of IRQ 0.
pub const IRQ_INTERRUPT_OFFSET: u8 = 40;

const IRQS_PER_PIC: u8 = 8;

const PIC_COMMAND_READ_ISR: u8 = 0x0b;
const PIC_COMMAND_ACKNOWLEDGE_IRQ: u8 = 0x20;

struct PicRegs {
    // Commands go to each PIC's command port; when no command is active the
    // data port reads/writes the IRQ mask. Bit N set in PIC 1's mask means
    // IRQ N is not delivered; likewise PIC 2 and IRQ N+8.
    cmd_1: u16,
    cmd_2: u16,
    data_1: u16,
    data_2: u16,
}

static PIC_REGS: Mutex<PicRegs> = Mutex::new(PicRegs {
    cmd_1: 0x20,
    cmd_2: 0xa0,
    data_1: 0x21,
    data_2: 0xa1,
});

static IRQ_HANDLERS: Mutex<[Option<IrqHandlerFunc>; 16]> = Mutex::new([None; 16]);

/// Remaps the PICs and masks every line. Interrupts must be disabled; it is
/// safe to enable them after this returns.
pub unsafe fn init() {
    let pic_regs = PIC_REGS.lock();

    // SAFETY: the 8259 initialization sequence: ICW1 edge/cascade, vector
    // offsets, wiring, 8086 mode, then a full mask.
    unsafe {
        outb(pic_regs.cmd_1, 0x11);
        outb(pic_regs.cmd_2, 0x11);
        outb(pic_regs.data_1, IRQ_INTERRUPT_OFFSET);
        outb(pic_regs.data_2, IRQ_INTERRUPT_OFFSET + IRQS_PER_PIC);
        outb(pic_regs.data_1, 4);
        outb(pic_regs.data_2, 2);
        outb(pic_regs.data_1, 1);
        outb(pic_regs.data_2, 1);

        outb(pic_regs.data_1, 0b1111_1111);
        outb(pic_regs.data_2, 0b1111_1111);
    }
    drop(pic_regs);

    for irq in 0..IRQS_PER_PIC * 2 {
        install_interrupt_handler(IRQ_INTERRUPT_OFFSET + irq, Some(handle_irq));
    }
}

/// Installs (or removes) the handler for `irq_num` and adjusts the mask to
/// match.
pub fn install_irq_handler(irq_num: u8, maybe_handler: Option<IrqHandlerFunc>) {
    assert!(irq_num < IRQS_PER_PIC * 2);

    {
        let mut handlers = IRQ_HANDLERS.lock();
        if let Some(handler) = maybe_handler {
            assert!(handlers[irq_num as usize].is_none());
            handlers[irq_num as usize] = Some(handler);
        } else {
            handlers[irq_num as usize] = None;
        }
    }

    let should_mask_irq = maybe_handler.is_none();
    let irq_chip = if irq_num < 8 { 0 } else { 1 };
    let irq_line = irq_num - 8 * irq_chip;

    let pic_regs = PIC_REGS.lock();
    let data_port = if irq_chip == 0 {
        pic_regs.data_1
    } else {
        pic_regs.data_2
    };
    // SAFETY: read-modify-write of the mask register under the lock.
    unsafe {
        set_mask(data_port, irq_line, should_mask_irq);
    }
}

unsafe fn set_mask(data_port: u16, irq_line: u8, set: bool) {
    // SAFETY: caller holds PIC_REGS and passes one of its data ports.
    unsafe {
        let old_mask = inb(data_port);
        let new_mask = if set {
            old_mask | (1 << irq_line)
        } else {
            old_mask & !(1 << irq_line)
        };
        outb(data_port, new_mask);
    }
}

// Only IRQs 7 and 15 can be spurious; to find out we ask the originating
// PIC which lines are actually in service.
fn is_spurious(irq_num: u8) -> bool {
    if irq_num != 7 && irq_num != 15 {
        return false;
    }

    let pic_regs = PIC_REGS.lock();
    // SAFETY: ISR read sequence on the command/data port pair.
    let isr = unsafe {
        if irq_num == 7 {
            outb(pic_regs.cmd_1, PIC_COMMAND_READ_ISR);
            inb(pic_regs.data_1)
        } else {
            outb(pic_regs.cmd_2, PIC_COMMAND_READ_ISR);
            inb(pic_regs.data_2)
        }
    };

    let spurious = isr & 0b1000_0000 == 0;

    // A spurious IRQ gets no EOI on the originating PIC, but a spurious
    // IRQ 15 still needs one on the primary, which saw a real cascade.
    if spurious && irq_num == 15 {
        // SAFETY: EOI to the primary command port.
        unsafe {
            outb(pic_regs.cmd_1, PIC_COMMAND_ACKNOWLEDGE_IRQ);
        }
    }

    spurious
}

fn acknowledge_irq(irq_num: u8) {
    let pic_regs = PIC_REGS.lock();
    // SAFETY: EOI writes to the command ports.
    unsafe {
        if irq_num >= 8 {
            outb(pic_regs.cmd_2, PIC_COMMAND_ACKNOWLEDGE_IRQ);
        }
        outb(pic_regs.cmd_1, PIC_COMMAND_ACKNOWLEDGE_IRQ);
    }
}

// Common entry for all 16 IRQ vectors, registered with the IDT dispatcher.
fn handle_irq(frame: &mut InterruptFrame) {
    let irq_num = (frame.vector as u8).wrapping_sub(IRQ_INTERRUPT_OFFSET);

    if is_spurious(irq_num) {
        return;
    }

    let handler = IRQ_HANDLERS.lock()[irq_num as usize];
    match handler {
        Some(handler) => handler(frame),
        None => panic!("unhandled IRQ {} received", irq_num),
    }

    acknowledge_irq(irq_num);
}
