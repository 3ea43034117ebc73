use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::{Error, Result};

/// An append-mode file handle paired with a fixed-capacity read-only mapping.
///
/// The mapping always covers `capacity` bytes even while the file is shorter.
/// Appends grow the file underneath the shared mapping and become visible to
/// readers without remapping. Callers must never read past the written length
/// of the file.
pub struct MmapFile {
    // Field order: the mapping is unmapped before the file handle closes.
    map: Mmap,
    file: File,
    capacity: usize,
}

impl MmapFile {
    /// Opens (or creates) the file at `path` and maps `capacity` bytes of it.
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Unsupported("mmap capacity must be non-zero"));
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        // Safety: the mapping is read-only and all reads are gated by the
        // written file length, which never exceeds `capacity`.
        let map = unsafe { MmapOptions::new().len(capacity).map(&file)? };
        Ok(Self {
            map,
            file,
            capacity,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Appends `buf` at the end of the file.
    pub fn append(&self, buf: &[u8]) -> Result<()> {
        (&self.file).write_all(buf)?;
        Ok(())
    }

    /// Shrinks the file to `len` bytes. Subsequent appends land at the new end.
    pub fn truncate(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
