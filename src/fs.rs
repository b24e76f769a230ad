//! Catalog glue: the one ATA device and the loaded catalog.

use alloc::vec::Vec;

use spin::Mutex;

use shared::catalog::{Catalog, FileEntry};

use crate::ata::AtaPio;

static DISK: Mutex<AtaPio> = Mutex::new(AtaPio);
static CATALOG: Mutex<Option<Catalog>> = Mutex::new(None);

/// Loads (or rebuilds) the catalog from disk.
pub fn init() {
    let mut disk = DISK.lock();
    *CATALOG.lock() = Some(Catalog::load(&mut *disk));
}

/// Reads a whole file into a fresh heap buffer; the caller owns it.
pub fn read_file(name: &str) -> Option<Vec<u8>> {
    let mut disk = DISK.lock();
    CATALOG
        .lock()
        .as_ref()
        .expect("catalog not loaded")
        .read(&mut *disk, name)
}

/// Runs `f` over the catalog entries, sentinel included.
pub fn with_entries<R>(f: impl FnOnce(&[FileEntry]) -> R) -> R {
    f(CATALOG.lock().as_ref().expect("catalog not loaded").entries())
}
