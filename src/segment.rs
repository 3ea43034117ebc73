use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::warn;

use crate::mmap::MmapFile;
use crate::{Error, Result};

/// Size of the record length prefix: a big-endian u32 that counts itself.
pub const LEN_PREFIX_SIZE: u64 = 4;

const SEGMENT_SUFFIX: &str = ".seg";

/// One bounded, length-prefixed record stream in a single file.
///
/// Records are appended through the file handle and served from a read-only
/// mapping of the file. The written prefix `[0, file_size)` is a tight
/// sequence of records; `file_size` is published with release ordering so a
/// reader that observes it also observes every byte the writer wrote.
pub struct Segment {
    mmap: MmapFile,
    path: PathBuf,
    start_address: u64,
    max_size: u64,
    file_size: AtomicU64,
    append_lock: Mutex<()>,
}

impl Segment {
    /// Opens the segment file at `path`, creating it if missing.
    ///
    /// A trailing record left incomplete by a crash is truncated away; the
    /// surviving prefix is always a valid record sequence.
    pub fn open(path: &Path, max_size: u64, start_address: u64) -> Result<Self> {
        let capacity = usize::try_from(max_size)
            .map_err(|_| Error::Unsupported("segment size exceeds addressable range"))?;
        let mmap = MmapFile::open(path, capacity)?;

        let file_len = mmap.file_len()?;
        if file_len > max_size {
            return Err(Error::SegmentCorrupted("segment file exceeds its capacity"));
        }
        let recovered = consistent_prefix(mmap.as_slice(), file_len);
        if recovered < file_len {
            warn!(
                "segment {}: truncating torn tail record ({} -> {} bytes)",
                path.display(),
                file_len,
                recovered
            );
            mmap.truncate(recovered)?;
        }

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            start_address,
            max_size,
            file_size: AtomicU64::new(recovered),
            append_lock: Mutex::new(()),
        })
    }

    /// Appends one record and returns its local address and the address
    /// immediately after it.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64)> {
        let record_len = LEN_PREFIX_SIZE
            .checked_add(payload.len() as u64)
            .filter(|&len| len <= u32::MAX as u64)
            .ok_or(Error::DataTooLarge)?;

        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| Error::SegmentCorrupted("segment append lock poisoned"))?;

        let address = self.file_size.load(Ordering::Relaxed);
        let next = address
            .checked_add(record_len)
            .ok_or(Error::DataTooLarge)?;
        if next > self.max_size {
            return Err(Error::DataTooLarge);
        }

        let mut record = Vec::with_capacity(record_len as usize);
        record.extend_from_slice(&(record_len as u32).to_be_bytes());
        record.extend_from_slice(payload);
        self.mmap.append(&record)?;

        self.file_size.store(next, Ordering::Release);
        Ok((address, next))
    }

    /// Reads the record starting at the local `address`.
    ///
    /// The returned payload borrows the segment's mapping; it stays valid for
    /// as long as the segment does.
    pub fn read(&self, address: u64) -> Result<(&[u8], u64)> {
        let size = self.file_size.load(Ordering::Acquire);
        let header_end = address.checked_add(LEN_PREFIX_SIZE);
        match header_end {
            Some(end) if end <= size => {}
            _ => return Err(Error::WrongAddress),
        }

        let offset = address as usize;
        let prefix: [u8; 4] = self.mmap.as_slice()[offset..offset + 4]
            .try_into()
            .expect("slice length");
        let record_len = u32::from_be_bytes(prefix) as u64;
        if record_len < LEN_PREFIX_SIZE {
            return Err(Error::SegmentCorrupted("record length below prefix size"));
        }
        let next = address
            .checked_add(record_len)
            .ok_or(Error::SegmentCorrupted("record length overflow"))?;
        if next > size {
            return Err(Error::SegmentCorrupted("record crosses written prefix"));
        }

        let payload = &self.mmap.as_slice()[offset + 4..next as usize];
        Ok((payload, next))
    }

    /// Walks every record in the segment, invoking `f` with the local address
    /// immediately after each record and its payload. An error from `f`
    /// aborts the walk and propagates.
    pub fn scan<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let mut address = 0;
        let size = self.file_size.load(Ordering::Acquire);
        while address < size {
            let (payload, next) = self.read(address)?;
            f(next, payload)?;
            address = next;
        }
        Ok(())
    }

    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    /// Number of written bytes in this segment.
    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Acquire)
    }

    /// Global address immediately after the last record.
    pub fn end_address(&self) -> u64 {
        self.start_address + self.file_size()
    }

    /// Whether the global `address` falls inside this segment's written range.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address < self.end_address()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the segment file to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.mmap.sync()
    }
}

/// Length of the longest prefix of `data` that is a valid record sequence
/// ending on a record boundary at or before `file_len`.
fn consistent_prefix(data: &[u8], file_len: u64) -> u64 {
    let mut offset = 0u64;
    while offset + LEN_PREFIX_SIZE <= file_len {
        let at = offset as usize;
        let prefix: [u8; 4] = data[at..at + 4].try_into().expect("slice length");
        let record_len = u32::from_be_bytes(prefix) as u64;
        if record_len < LEN_PREFIX_SIZE || offset + record_len > file_len {
            break;
        }
        offset += record_len;
    }
    offset
}

/// Segment filename for a start address (e.g. "0000000000000400.seg").
pub fn segment_filename(start_address: u64) -> String {
    format!("{start_address:016x}{SEGMENT_SUFFIX}")
}

pub fn segment_path(dir: &Path, start_address: u64) -> PathBuf {
    dir.join(segment_filename(start_address))
}

/// Parses a segment filename back into its start address.
///
/// Only names of exactly sixteen lowercase hex digits followed by ".seg"
/// match; everything else is ignored.
pub fn parse_segment_filename(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(SEGMENT_SUFFIX)?;
    if stem.len() != 16 {
        return None;
    }
    if !stem
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return None;
    }
    u64::from_str_radix(stem, 16).ok()
}

/// Start addresses of all segment files in `dir`, sorted ascending.
pub fn discover_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(name) => name,
            None => continue,
        };
        if let Some(start) = parse_segment_filename(name) {
            segments.push(start);
        }
    }
    segments.sort_unstable();
    Ok(segments)
}
