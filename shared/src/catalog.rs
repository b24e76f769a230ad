//! Flat on-disk file catalog.
//!
//! The catalog is an array of 64-byte entries at a fixed LBA, terminated by
//! the first entry whose magic is wrong. Entry 0 is a sentinel; payload
//! sectors start at [`FIRST_DATA_LBA`] and are allocated append-only, so
//! deleting and growing are out of scope. If the catalog sectors are
//! corrupt, initialization sweeps the disk for self-describing program
//! headers and rebuilds the catalog around them.

use alloc::vec;
use alloc::vec::Vec;

use arrayvec::ArrayVec;
use log::{debug, info, warn};

use crate::config::{FAT_LBA, FAT_SECTORS, FIRST_DATA_LBA};

pub const SECTOR_SIZE: usize = 512;

/// On-disk size of one catalog entry.
pub const ENTRY_SIZE: usize = 64;

/// Entries that fit in the reserved catalog sectors.
pub const MAX_ENTRIES: usize = FAT_SECTORS as usize * SECTOR_SIZE / ENTRY_SIZE;

/// Magic marking a live entry; anything else terminates the catalog.
const ENTRY_MAGIC: u32 = 0xFFFF_FFFF;

/// Name of the sentinel in entry 0.
const SENTINEL_NAME: &str = "INIT_NODE";

/// The rescue scan probes every 8th sector over the first 256 strides.
const RESCUE_STRIDE: u32 = 8;
const RESCUE_STRIDES: u32 = 256;

/// Raw sector access. Buffers are always a whole number of sectors.
///
/// The ATA PIO driver implements this in the kernel; tests run against an
/// in-memory disk.
pub trait BlockDevice {
    fn read_sectors(&mut self, lba: u32, buf: &mut [u8]);
    fn write_sectors(&mut self, lba: u32, buf: &[u8]);
}

/// One catalog entry: a NUL-padded name and a run of sectors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileEntry {
    pub name: [u8; 32],
    pub lba: u32,
    /// Run length in sectors.
    pub length: u32,
}

impl FileEntry {
    fn new(name: &str, lba: u32, length: u32) -> FileEntry {
        let mut entry = FileEntry {
            name: [0; 32],
            lba,
            length,
        };
        let len = name.len().min(entry.name.len() - 1);
        entry.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        entry
    }

    /// Name up to the first NUL.
    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    fn to_bytes(self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];
        bytes[..32].copy_from_slice(&self.name);
        bytes[32..36].copy_from_slice(&self.lba.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.length.to_le_bytes());
        bytes[40..44].copy_from_slice(&ENTRY_MAGIC.to_le_bytes());
        bytes
    }

    // `None` if the magic does not match: the entry terminates the catalog.
    fn from_bytes(bytes: &[u8]) -> Option<FileEntry> {
        let magic = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        if magic != ENTRY_MAGIC {
            return None;
        }
        let mut name = [0u8; 32];
        name.copy_from_slice(&bytes[..32]);
        Some(FileEntry {
            name,
            lba: u32::from_le_bytes(bytes[32..36].try_into().unwrap()),
            length: u32::from_le_bytes(bytes[36..40].try_into().unwrap()),
        })
    }
}

/// In-memory image of the catalog plus the payload allocation cursor.
pub struct Catalog {
    entries: ArrayVec<FileEntry, MAX_ENTRIES>,
    first_free_sector: u32,
}

impl Catalog {
    /// Reads the catalog from `dev`. A catalog whose sentinel is missing is
    /// re-initialized from the disk contents first.
    pub fn load<D: BlockDevice>(dev: &mut D) -> Catalog {
        let mut raw = vec![0u8; FAT_SECTORS as usize * SECTOR_SIZE];
        dev.read_sectors(FAT_LBA, &mut raw);

        if FileEntry::from_bytes(&raw[..ENTRY_SIZE]).is_none() {
            warn!("invalid allocation table, rebuilding from disk");
            Self::initialize(dev);
            dev.read_sectors(FAT_LBA, &mut raw);
        }

        let mut entries = ArrayVec::new();
        for chunk in raw.chunks_exact(ENTRY_SIZE) {
            match FileEntry::from_bytes(chunk) {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }

        let first_free_sector = entries
            .iter()
            .map(|e: &FileEntry| e.lba + e.length)
            .max()
            .map(|end| end + 1)
            .unwrap_or(0)
            .max(FIRST_DATA_LBA + 1);

        info!("catalog loaded, {} entries", entries.len());
        Catalog {
            entries,
            first_free_sector,
        }
    }

    /// Rebuilds the catalog on `dev`: a sentinel entry plus every stock
    /// program discovered by probing sector strides for the 16-byte header
    /// magic. Programs carry their own name and sector length.
    pub fn initialize<D: BlockDevice>(dev: &mut D) {
        let mut entries: ArrayVec<FileEntry, MAX_ENTRIES> = ArrayVec::new();
        entries.push(FileEntry::new(SENTINEL_NAME, FIRST_DATA_LBA, 1));

        let mut sector = [0u8; SECTOR_SIZE];
        for stride in 0..RESCUE_STRIDES {
            let lba = stride * RESCUE_STRIDE;
            dev.read_sectors(lba, &mut sector);
            if sector[..16].iter().all(|&b| b == 0xFF) {
                let Some(header) = FileEntry::from_bytes(&sector[16..16 + ENTRY_SIZE]) else {
                    continue;
                };
                info!("recovered program {:?} at sector {}", header.name_str(), lba);
                let entry = FileEntry::new(header.name_str(), lba, header.length.max(1));
                if entries.try_push(entry).is_err() {
                    warn!("catalog full, dropping programs past sector {lba}");
                    break;
                }
            }
        }

        flush(dev, &entries);
    }

    /// Writes a new file. A name that already exists is silently ignored;
    /// the catalog is append-only and names are never reused.
    pub fn write<D: BlockDevice>(&mut self, dev: &mut D, name: &str, data: &[u8]) {
        if self.find(name).is_some() {
            debug!("write of existing file {name:?} ignored");
            return;
        }
        if self.entries.is_full() {
            warn!("catalog full, cannot write {name:?}");
            return;
        }

        let sectors = sectors_for(data.len());
        let entry = FileEntry::new(name, self.first_free_sector, sectors);
        self.entries.push(entry);

        dev.write_sectors(entry.lba, &stage(data, sectors));
        flush(dev, &self.entries);
        self.first_free_sector += sectors;
    }

    /// Rewrites an existing file in place. A missing name is a no-op, as is
    /// a payload needing more sectors than the file already owns (growing
    /// is not supported in this revision). Shrinking leaves the tail
    /// sectors of the old run on disk untouched.
    pub fn overwrite<D: BlockDevice>(&mut self, dev: &mut D, name: &str, data: &[u8]) {
        let Some(index) = self.find(name) else {
            debug!("overwrite of missing file {name:?} ignored");
            return;
        };

        let entry = self.entries[index];
        let sectors = sectors_for(data.len());
        if sectors <= entry.length {
            dev.write_sectors(entry.lba, &stage(data, sectors));
        } else {
            debug!("overwrite of {name:?} needs {sectors} sectors, has {}", entry.length);
        }
        flush(dev, &self.entries);
    }

    /// Reads a whole file into a fresh heap buffer, `length * 512` bytes.
    /// The caller owns the buffer. `None` if the name is absent.
    pub fn read<D: BlockDevice>(&self, dev: &mut D, name: &str) -> Option<Vec<u8>> {
        let entry = self.entries[self.find(name)?];
        let mut data = vec![0u8; entry.length as usize * SECTOR_SIZE];
        dev.read_sectors(entry.lba, &mut data);
        Some(data)
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn first_free_sector(&self) -> u32 {
        self.first_free_sector
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name_str() == name)
    }
}

/// Sectors covering `bytes` bytes; at least one.
fn sectors_for(bytes: usize) -> u32 {
    (bytes.div_ceil(SECTOR_SIZE) as u32).max(1)
}

// Copies `data` into a zero-padded whole-sector buffer, so the tail of the
// last written sector is deterministic.
fn stage(data: &[u8], sectors: u32) -> Vec<u8> {
    let mut staged = vec![0u8; sectors as usize * SECTOR_SIZE];
    staged[..data.len()].copy_from_slice(data);
    staged
}

fn flush<D: BlockDevice>(dev: &mut D, entries: &[FileEntry]) {
    let mut raw = vec![0u8; FAT_SECTORS as usize * SECTOR_SIZE];
    for (entry, slot) in entries.iter().zip(raw.chunks_exact_mut(ENTRY_SIZE)) {
        slot.copy_from_slice(&entry.to_bytes());
    }
    dev.write_sectors(FAT_LBA, &raw);
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use test_log::test;

    /// 2 MiB flat in-memory disk.
    struct MemDisk {
        bytes: Vec<u8>,
    }

    impl MemDisk {
        fn new() -> MemDisk {
            MemDisk {
                bytes: vec![0u8; 4096 * SECTOR_SIZE],
            }
        }

        /// A disk with a valid empty catalog already on it.
        fn formatted() -> MemDisk {
            let mut disk = MemDisk::new();
            Catalog::initialize(&mut disk);
            disk
        }
    }

    impl BlockDevice for MemDisk {
        fn read_sectors(&mut self, lba: u32, buf: &mut [u8]) {
            let start = lba as usize * SECTOR_SIZE;
            buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        }

        fn write_sectors(&mut self, lba: u32, buf: &[u8]) {
            let start = lba as usize * SECTOR_SIZE;
            self.bytes[start..start + buf.len()].copy_from_slice(buf);
        }
    }

    #[test]
    fn initialize_writes_the_sentinel() {
        let mut disk = MemDisk::formatted();
        let catalog = Catalog::load(&mut disk);

        assert_eq!(catalog.entries().len(), 1);
        assert_eq!(catalog.entries()[0].name_str(), "INIT_NODE");
        assert_eq!(catalog.entries()[0].lba, FIRST_DATA_LBA);
        assert_eq!(catalog.first_free_sector(), FIRST_DATA_LBA + 2);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);

        let payload = vec![0x41u8; 1000];
        catalog.write(&mut disk, "hi.txt", &payload);

        let data = catalog.read(&mut disk, "hi.txt").unwrap();
        assert_eq!(data.len(), 1024);
        assert_eq!(&data[..1000], &payload[..]);
        assert!(data[1000..].iter().all(|&b| b == 0));
    }

    #[test]
    fn tiny_writes_still_take_one_sector() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);

        catalog.write(&mut disk, "a", &[1, 2, 3]);
        let data = catalog.read(&mut disk, "a").unwrap();
        assert_eq!(data.len(), SECTOR_SIZE);
        assert_eq!(&data[..3], &[1, 2, 3]);
    }

    #[test]
    fn second_write_with_the_same_name_is_ignored() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);

        catalog.write(&mut disk, "f", &[1; 600]);
        let entries_before: Vec<_> = catalog.entries().to_vec();
        let ffs_before = catalog.first_free_sector();

        catalog.write(&mut disk, "f", &[2; 600]);
        assert_eq!(catalog.entries(), &entries_before[..]);
        assert_eq!(catalog.first_free_sector(), ffs_before);
        assert_eq!(catalog.read(&mut disk, "f").unwrap()[0], 1);
    }

    #[test]
    fn files_are_laid_out_consecutively() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);

        catalog.write(&mut disk, "one", &[1; 1024]);
        catalog.write(&mut disk, "two", &[2; 100]);

        let one = catalog.entries()[1];
        let two = catalog.entries()[2];
        assert_eq!(one.length, 2);
        assert_eq!(two.lba, one.lba + one.length);
    }

    #[test]
    fn reload_reproduces_the_catalog_bit_exactly() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);

        catalog.write(&mut disk, "alpha", &[7; 700]);
        catalog.write(&mut disk, "beta", &[8; 80]);

        let reloaded = Catalog::load(&mut disk);
        assert_eq!(reloaded.entries(), catalog.entries());
        assert_eq!(reloaded.first_free_sector(), catalog.first_free_sector());
    }

    #[test]
    fn read_of_a_missing_name_is_none() {
        let mut disk = MemDisk::formatted();
        let catalog = Catalog::load(&mut disk);
        assert!(catalog.read(&mut disk, "nope").is_none());
    }

    #[test]
    fn overwrite_in_place_when_it_fits() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);

        catalog.write(&mut disk, "f", &[1; 1024]);
        catalog.overwrite(&mut disk, "f", &[9; 400]);

        let entry = catalog.entries()[1];
        assert_eq!(entry.length, 2);
        let data = catalog.read(&mut disk, "f").unwrap();
        assert_eq!(&data[..400], &[9; 400][..]);
        // The second sector of the run is the stale tail of the old payload.
        assert_eq!(&data[512..], &[1; 512][..]);
    }

    #[test]
    fn growing_overwrite_is_a_no_op() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);

        catalog.write(&mut disk, "f", &[1; 100]);
        catalog.overwrite(&mut disk, "f", &[2; 5000]);

        assert_eq!(catalog.read(&mut disk, "f").unwrap()[0], 1);
        assert_eq!(catalog.entries()[1].length, 1);
    }

    #[test]
    fn overwrite_of_a_missing_name_is_a_no_op() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);
        catalog.overwrite(&mut disk, "ghost", &[1; 10]);
        assert_eq!(catalog.entries().len(), 1);
    }

    #[test]
    fn corrupt_catalog_is_rebuilt_from_program_headers() {
        let mut disk = MemDisk::new();

        // A stock program header at a stride boundary: 16 bytes of magic,
        // then an entry-shaped self-description.
        let program_lba = 96;
        let mut header = [0u8; SECTOR_SIZE];
        header[..16].fill(0xFF);
        header[16..16 + ENTRY_SIZE]
            .copy_from_slice(&FileEntry::new("prime", program_lba, 3).to_bytes());
        disk.write_sectors(program_lba, &header);

        // The catalog sectors are zero, so load() must rebuild.
        let catalog = Catalog::load(&mut disk);

        assert_eq!(catalog.entries().len(), 2);
        assert_eq!(catalog.entries()[0].name_str(), "INIT_NODE");
        let rescued = catalog.entries()[1];
        assert_eq!(rescued.name_str(), "prime");
        assert_eq!(rescued.lba, program_lba);
        assert_eq!(rescued.length, 3);
    }

    #[test]
    fn off_stride_headers_are_not_discovered() {
        let mut disk = MemDisk::new();

        let mut header = [0u8; SECTOR_SIZE];
        header[..16].fill(0xFF);
        header[16..16 + ENTRY_SIZE].copy_from_slice(&FileEntry::new("odd", 97, 1).to_bytes());
        disk.write_sectors(97, &header);

        let catalog = Catalog::load(&mut disk);
        assert_eq!(catalog.entries().len(), 1);
    }

    #[test]
    fn catalog_terminates_at_the_first_bad_magic() {
        let mut disk = MemDisk::formatted();
        let mut catalog = Catalog::load(&mut disk);
        catalog.write(&mut disk, "keep", &[1; 10]);
        catalog.write(&mut disk, "lost", &[2; 10]);

        // Corrupt the magic of the second entry on disk.
        let mut raw = vec![0u8; FAT_SECTORS as usize * SECTOR_SIZE];
        disk.read_sectors(FAT_LBA, &mut raw);
        raw[2 * ENTRY_SIZE + 40..2 * ENTRY_SIZE + 44].fill(0);
        disk.write_sectors(FAT_LBA, &raw);

        let reloaded = Catalog::load(&mut disk);
        assert_eq!(reloaded.entries().len(), 2);
        assert_eq!(reloaded.entries()[1].name_str(), "keep");
    }

    #[test]
    fn long_names_are_truncated_to_the_field() {
        let long = "x".repeat(40);
        let entry = FileEntry::new(&long, 1, 1);
        assert_eq!(entry.name_str().len(), 31);
    }

    #[test]
    fn entry_serialization_round_trips() {
        let entry = FileEntry::new("hello.bin", 123, 9);
        let bytes = entry.to_bytes();
        assert_eq!(FileEntry::from_bytes(&bytes), Some(entry));
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), ENTRY_MAGIC);
        assert!(bytes[44..].iter().all(|&b| b == 0));
    }
}
