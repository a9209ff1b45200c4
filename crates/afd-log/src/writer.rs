//! Appending writer for one log category.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::record::LogRecord;
use crate::rotate::rotate_fleet;
use crate::seek_cache::SeekCacheWriter;
use crate::Result;

/// Appends records of one category to the live rotation slot.
///
/// A fresh (or empty) log gets the category's `#!#` head line first. For
/// categories opened with [`LogWriter::open_cached`] every appended record
/// also lands in the seek-cache sidecar.
pub struct LogWriter<R: LogRecord> {
    log_dir: PathBuf,
    out: BufWriter<File>,
    offset: u64,
    cache: Option<SeekCacheWriter>,
    max_log_files: usize,
    _marker: PhantomData<R>,
}

fn open_live<R: LogRecord>(
    log_dir: &Path,
    cached: bool,
) -> Result<(BufWriter<File>, u64, Option<SeekCacheWriter>)> {
    let path = R::CATEGORY.rotation_path(log_dir, 0);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut offset = file.metadata()?.len();
    let mut out = BufWriter::new(file);
    if offset == 0 {
        let head = format!("{}\n", R::metadata_line());
        out.write_all(head.as_bytes())?;
        offset = head.len() as u64;
    }
    let cache = if cached {
        Some(SeekCacheWriter::open(&R::CATEGORY.cache_path(log_dir, 0))?)
    } else {
        None
    };
    Ok((out, offset, cache))
}

impl<R: LogRecord> LogWriter<R> {
    pub fn open(log_dir: &Path, max_log_files: usize) -> Result<Self> {
        Self::open_inner(log_dir, max_log_files, false)
    }

    /// Open with a seek-cache sidecar kept in step with the log.
    pub fn open_cached(log_dir: &Path, max_log_files: usize) -> Result<Self> {
        Self::open_inner(log_dir, max_log_files, true)
    }

    fn open_inner(log_dir: &Path, max_log_files: usize, cached: bool) -> Result<Self> {
        let (out, offset, cache) = open_live::<R>(log_dir, cached)?;
        Ok(Self {
            log_dir: log_dir.to_path_buf(),
            out,
            offset,
            cache,
            max_log_files,
            _marker: PhantomData,
        })
    }

    /// Append one record, returning the byte offset its line starts at.
    pub fn append(&mut self, rec: &R) -> Result<u64> {
        let at = self.offset;
        let line = rec.format();
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.offset += line.len() as u64 + 1;
        if let Some(cache) = &mut self.cache {
            cache.push(rec.log_time(), at)?;
        }
        Ok(at)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        if let Some(cache) = &mut self.cache {
            cache.flush()?;
        }
        Ok(())
    }

    /// Flush, shift the fleet and start a fresh live file.
    pub fn rotate(&mut self) -> Result<()> {
        self.flush()?;
        let cached = self.cache.is_some();
        self.cache = None;
        rotate_fleet(&self.log_dir, R::CATEGORY, self.max_log_files)?;
        info!(category = ?R::CATEGORY, "log rotated");
        let (out, offset, cache) = open_live::<R>(&self.log_dir, cached)?;
        self.out = out;
        self.offset = offset;
        self.cache = cache;
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: LogRecord> Drop for LogWriter<R> {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}
