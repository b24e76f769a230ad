//! ATA PIO driver for the primary master drive.
//!
//! Strictly polled: every transfer busy-waits BSY then RDY on the status
//! port and moves 256 words per sector through the data port. No DMA and
//! no interrupt-driven mode; the busy wait is unbounded, so a hung drive
//! hangs the caller. The catalog talks to this through [`BlockDevice`];
//! nothing else should touch the disk directly.

use shared::catalog::{BlockDevice, SECTOR_SIZE};

use crate::x86::{inb, inw, outb, outw};

const ATA_DATA: u16 = 0x1F0;
const ATA_SECTOR_COUNT: u16 = 0x1F2;
const ATA_LBA_LOW: u16 = 0x1F3;
const ATA_LBA_MID: u16 = 0x1F4;
const ATA_LBA_HIGH: u16 = 0x1F5;
const ATA_SELECT_DRIVE: u16 = 0x1F6;
const ATA_STATUS_COMMAND: u16 = 0x1F7;

const ATA_READ_SECTORS: u8 = 0x20;
const ATA_WRITE_SECTORS: u8 = 0x30;

bitflags::bitflags! {
    struct AtaStatus: u8 {
        /// Controller is busy; only the status port may be touched.
        const BSY = 0x80;
        /// Drive is spun up and ready for a command.
        const RDY = 0x40;
        /// Write fault.
        const DF = 0x20;
        /// Data register is ready for a transfer.
        const DRQ = 0x08;
        /// The error register holds a code.
        const ERR = 0x01;
    }
}

/// The primary-channel master drive, 28-bit LBA.
pub struct AtaPio;

impl AtaPio {
    fn status(&self) -> AtaStatus {
        // SAFETY: status port read has no side effects beyond clearing the
        // pending-interrupt state, which we never use.
        AtaStatus::from_bits_truncate(unsafe { inb(ATA_STATUS_COMMAND) })
    }

    fn wait_not_busy(&self) {
        while self.status().contains(AtaStatus::BSY) {}
    }

    fn wait_ready(&self) {
        while !self.status().contains(AtaStatus::RDY) {}
    }

    // Drive select, sector count, 28-bit LBA, then the command byte.
    fn issue(&mut self, command: u8, lba: u32, sector_count: u8) {
        self.wait_not_busy();
        // SAFETY: the standard PIO register sequence on the primary
        // channel; the controller is idle per the wait above.
        unsafe {
            outb(ATA_SELECT_DRIVE, 0xE0 | ((lba >> 24) & 0xF) as u8);
            outb(ATA_SECTOR_COUNT, sector_count);
            outb(ATA_LBA_LOW, lba as u8);
            outb(ATA_LBA_MID, (lba >> 8) as u8);
            outb(ATA_LBA_HIGH, (lba >> 16) as u8);
            outb(ATA_STATUS_COMMAND, command);
        }
    }
}

impl BlockDevice for AtaPio {
    fn read_sectors(&mut self, lba: u32, buf: &mut [u8]) {
        assert_eq!(buf.len() % SECTOR_SIZE, 0);
        let sector_count = buf.len() / SECTOR_SIZE;
        self.issue(ATA_READ_SECTORS, lba, sector_count as u8);

        for sector in buf.chunks_exact_mut(SECTOR_SIZE) {
            self.wait_not_busy();
            self.wait_ready();
            for word in sector.chunks_exact_mut(2) {
                // SAFETY: DRQ data transfer; one word per read.
                let value = unsafe { inw(ATA_DATA) };
                word.copy_from_slice(&value.to_le_bytes());
            }
        }
    }

    fn write_sectors(&mut self, lba: u32, buf: &[u8]) {
        assert_eq!(buf.len() % SECTOR_SIZE, 0);
        let sector_count = buf.len() / SECTOR_SIZE;
        self.issue(ATA_WRITE_SECTORS, lba, sector_count as u8);

        for sector in buf.chunks_exact(SECTOR_SIZE) {
            self.wait_not_busy();
            self.wait_ready();
            for word in sector.chunks_exact(2) {
                // SAFETY: DRQ data transfer; one word per write.
                unsafe {
                    outw(ATA_DATA, u16::from_le_bytes([word[0], word[1]]));
                }
            }
        }
    }
}
