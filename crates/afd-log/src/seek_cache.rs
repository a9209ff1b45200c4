//! Binary seek cache for time-indexed log reads.
//!
//! The sidecar is a flat array of 16-byte little-endian `(time, offset)`
//! pairs, appended in time order as the writer emits records. A reader
//! wanting "the first record at or after time T" binary-searches the cache
//! and seeks the log to the found offset instead of scanning from the top.
//!
//! Caches at most [`CACHE_FULL_MAP_LIMIT`] bytes are mapped whole; larger
//! ones are probed with positioned reads so a runaway sidecar never costs
//! address space proportional to its size.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::Mmap;

/// Size of one `(time, offset)` cache entry on disk.
pub const CACHE_ENTRY_SIZE: u64 = 16;

/// Caches up to this size are memory-mapped for the search.
pub const CACHE_FULL_MAP_LIMIT: u64 = 10 * 1024 * 1024;

/// Appends `(time, offset)` pairs while its owner appends log records.
#[derive(Debug)]
pub struct SeekCacheWriter {
    file: File,
    last_time: u64,
}

impl SeekCacheWriter {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let last_time = if len >= CACHE_ENTRY_SIZE {
            let mut buf = [0u8; 8];
            file.read_exact_at(&mut buf, len - CACHE_ENTRY_SIZE)?;
            u64::from_le_bytes(buf)
        } else {
            0
        };
        Ok(Self { file, last_time })
    }

    /// Record that the log record stamped `time` starts at byte `offset`.
    /// Out-of-order times are dropped so the cache stays sorted.
    pub fn push(&mut self, time: u64, offset: u64) -> io::Result<()> {
        if time < self.last_time {
            return Ok(());
        }
        let mut entry = [0u8; CACHE_ENTRY_SIZE as usize];
        entry[..8].copy_from_slice(&time.to_le_bytes());
        entry[8..].copy_from_slice(&offset.to_le_bytes());
        self.file.write_all(&entry)?;
        self.last_time = time;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Find the log offset of the first record with `record.time >= time`.
///
/// Returns `Ok(None)` when the cache is missing, empty or every cached
/// record is older than `time`; the caller then falls back to a scan.
pub fn lookup(cache_path: &Path, time: u64) -> io::Result<Option<u64>> {
    let file = match File::open(cache_path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    let entries = len / CACHE_ENTRY_SIZE;
    if entries == 0 {
        return Ok(None);
    }

    if len <= CACHE_FULL_MAP_LIMIT {
        // SAFETY: the mapping is read-only and dropped before return; a
        // concurrent append only grows the file past `len`.
        let map = unsafe { Mmap::map(&file)? };
        lookup_in(entries, time, |i| {
            let at = (i * CACHE_ENTRY_SIZE) as usize;
            Ok(entry_at(&map[at..at + CACHE_ENTRY_SIZE as usize]))
        })
    } else {
        lookup_in(entries, time, |i| {
            let mut buf = [0u8; CACHE_ENTRY_SIZE as usize];
            file.read_exact_at(&mut buf, i * CACHE_ENTRY_SIZE)?;
            Ok(entry_at(&buf))
        })
    }
}

fn entry_at(buf: &[u8]) -> (u64, u64) {
    let time = u64::from_le_bytes(buf[..8].try_into().unwrap());
    let offset = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    (time, offset)
}

fn lookup_in<F>(entries: u64, time: u64, mut read: F) -> io::Result<Option<u64>>
where
    F: FnMut(u64) -> io::Result<(u64, u64)>,
{
    // Lower bound: first entry with entry.time >= time.
    let mut lo = 0u64;
    let mut hi = entries;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let (t, _) = read(mid)?;
        if t < time {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo == entries {
        return Ok(None);
    }
    let (_, offset) = read(lo)?;
    Ok(Some(offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_cache(path: &Path, pairs: &[(u64, u64)]) {
        let mut w = SeekCacheWriter::open(path).unwrap();
        for &(t, o) in pairs {
            w.push(t, o).unwrap();
        }
        w.flush().unwrap();
    }

    #[test]
    fn test_lookup_lower_bound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("OUTPUT_LOG_CACHE");
        build_cache(&path, &[(100, 0), (200, 64), (200, 128), (300, 256)]);

        assert_eq!(lookup(&path, 50).unwrap(), Some(0));
        assert_eq!(lookup(&path, 100).unwrap(), Some(0));
        // Ties resolve to the first entry with that time.
        assert_eq!(lookup(&path, 150).unwrap(), Some(64));
        assert_eq!(lookup(&path, 200).unwrap(), Some(64));
        assert_eq!(lookup(&path, 250).unwrap(), Some(256));
        assert_eq!(lookup(&path, 301).unwrap(), None);
    }

    #[test]
    fn test_missing_or_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");
        assert_eq!(lookup(&path, 1).unwrap(), None);
        std::fs::write(&path, b"").unwrap();
        assert_eq!(lookup(&path, 1).unwrap(), None);
    }

    #[test]
    fn test_out_of_order_push_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c");
        build_cache(&path, &[(100, 0), (90, 10), (110, 20)]);
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 2 * CACHE_ENTRY_SIZE);
        assert_eq!(lookup(&path, 105).unwrap(), Some(20));
    }

    #[test]
    fn test_reopen_restores_last_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c");
        build_cache(&path, &[(100, 0)]);
        let mut w = SeekCacheWriter::open(&path).unwrap();
        w.push(50, 99).unwrap();
        w.push(150, 32).unwrap();
        w.flush().unwrap();
        assert_eq!(lookup(&path, 120).unwrap(), Some(32));
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 2 * CACHE_ENTRY_SIZE);
    }
}
