//! Reading the rotated log fleets.
//!
//! One-shot modes load each category's fleet, oldest rotation first, into
//! a position cache. Continuous modes additionally follow the live file,
//! detecting rotation by inode change.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::sys::stat::{fstat, stat};
use tracing::{debug, warn};

use afd_log::LogRecord;

use crate::Result;

/// Rows a position cache may hold per rotation generation.
pub const CACHE_ROWS_PER_ROTATION: usize = 10_000;

/// One cached record position.
#[derive(Debug, Clone)]
pub struct CacheRow<R> {
    pub offset: u64,
    pub time: u64,
    /// Set once the row has been joined; a gotcha row is never returned
    /// again within the run.
    pub gotcha: bool,
    pub rec: R,
}

/// Time-ordered position cache for one category.
///
/// Memory is bounded to `CACHE_ROWS_PER_ROTATION * max_log_files` rows;
/// the oldest rows are evicted first when the bound is hit.
#[derive(Debug)]
pub struct LogCache<R> {
    rows: Vec<CacheRow<R>>,
    /// Index of the first row that may still be un-joined. Everything
    /// before it is gotcha.
    start: usize,
    bound: usize,
}

impl<R: Clone> LogCache<R> {
    pub fn new(max_log_files: usize) -> Self {
        Self {
            rows: Vec::new(),
            start: 0,
            bound: CACHE_ROWS_PER_ROTATION * max_log_files.max(1),
        }
    }

    pub fn push(&mut self, offset: u64, time: u64, rec: R) {
        if self.rows.len() == self.bound {
            self.rows.remove(0);
            self.start = self.start.saturating_sub(1);
        }
        self.rows.push(CacheRow {
            offset,
            time,
            gotcha: false,
            rec,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First un-joined record in `[min_time, max_time]` accepted by
    /// `pred`. The hit is marked gotcha.
    pub fn take_match<F>(&mut self, min_time: u64, max_time: u64, mut pred: F) -> Option<R>
    where
        F: FnMut(&R) -> bool,
    {
        let from = self.first_at(min_time).max(self.start);
        for i in from..self.rows.len() {
            let row = &self.rows[i];
            if row.time > max_time {
                break;
            }
            if row.gotcha || !pred(&row.rec) {
                continue;
            }
            self.rows[i].gotcha = true;
            self.advance_start();
            return Some(self.rows[i].rec.clone());
        }
        None
    }

    /// Lower bound by time. Rows are append-ordered, so this is a plain
    /// binary search.
    fn first_at(&self, time: u64) -> usize {
        self.rows.partition_point(|r| r.time < time)
    }

    fn advance_start(&mut self) {
        while self
            .rows
            .get(self.start)
            .map(|r| r.gotcha)
            .unwrap_or(false)
        {
            self.start += 1;
        }
    }
}

/// Parse every record line of one file, feeding `sink(offset, record)`.
/// Malformed lines are warned about and skipped. Returns the offset one
/// past the last line read; a missing file reads as empty at offset 0.
pub fn read_records<R, F>(path: &Path, mut sink: F) -> Result<u64>
where
    R: LogRecord,
    F: FnMut(u64, R),
{
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut offset = 0u64;
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        match R::parse_line(&line) {
            Ok(Some(rec)) => sink(offset, rec),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %path.display(), offset, error = %e, "skipping malformed record");
            }
        }
        offset += n as u64;
    }
    Ok(offset)
}

/// Load a whole fleet, oldest rotation first, into `cache`, keeping only
/// records inside `[min_time, max_time]`. Returns the end offset of the
/// live rotation slot, usable as a resume point for a follow loop.
pub fn load_fleet<R: LogRecord + Clone>(
    log_dir: &Path,
    max_log_files: usize,
    min_time: u64,
    max_time: u64,
    cache: &mut LogCache<R>,
) -> Result<u64> {
    let mut live_end = 0;
    for n in (0..max_log_files).rev() {
        let path = R::CATEGORY.rotation_path(log_dir, n);
        let end = read_records::<R, _>(&path, |offset, rec: R| {
            let t = rec.log_time();
            if t >= min_time && t <= max_time {
                cache.push(offset, t, rec);
            }
        })?;
        if n == 0 {
            live_end = end;
        }
    }
    debug!(category = ?R::CATEGORY, rows = cache.len(), "fleet loaded");
    Ok(live_end)
}

/// Follows the live rotation slot of one category.
pub struct FollowedLog<R: LogRecord> {
    path: PathBuf,
    file: Option<File>,
    inode: u64,
    offset: u64,
    /// Partial trailing line carried between polls.
    pending: String,
    _marker: PhantomData<R>,
}

impl<R: LogRecord> FollowedLog<R> {
    pub fn open(log_dir: &Path) -> Self {
        Self {
            path: R::CATEGORY.rotation_path(log_dir, 0),
            file: None,
            inode: 0,
            offset: 0,
            pending: String::new(),
            _marker: PhantomData,
        }
    }

    /// Skip everything already in the log; only records appended after
    /// this call are yielded.
    pub fn seek_to_end(&mut self) -> Result<()> {
        if self.ensure_open()? {
            if let Some(file) = &mut self.file {
                self.offset = file.seek(SeekFrom::End(0))?;
            }
        }
        Ok(())
    }

    /// Start at `offset` instead of the beginning, so records a one-shot
    /// scan already read are not yielded again. The live slot is assumed
    /// unrotated since the offset was taken; a shorter file wins.
    pub fn resume_from(&mut self, offset: u64) -> Result<()> {
        if self.ensure_open()? {
            if let Some(file) = &self.file {
                let len = file.metadata()?.len();
                self.offset = offset.min(len);
            }
        }
        Ok(())
    }

    /// One poll cycle: pick up newly appended records, switching files
    /// when the live slot was rotated underneath us.
    pub fn poll(&mut self) -> Result<Vec<R>> {
        let mut out = Vec::new();
        self.ensure_open()?;
        if self.file.is_none() {
            return Ok(out);
        }
        self.drain_into(&mut out)?;

        if self.rotated()? {
            // The old inode was read to EOF above; nothing is lost.
            debug!(path = %self.path.display(), "rotation detected, reopening");
            self.file = None;
            self.inode = 0;
            self.offset = 0;
            self.pending.clear();
            if self.ensure_open()? {
                self.drain_into(&mut out)?;
            }
        }
        Ok(out)
    }

    fn ensure_open(&mut self) -> Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        match File::open(&self.path) {
            Ok(file) => {
                self.inode = fstat(file.as_raw_fd()).map(|st| st.st_ino).unwrap_or(0);
                self.offset = 0;
                self.file = Some(file);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn rotated(&self) -> Result<bool> {
        match stat(&self.path) {
            Ok(st) => Ok(st.st_ino != self.inode),
            // Live file gone entirely, treat as rotated.
            Err(_) => Ok(true),
        }
    }

    fn drain_into(&mut self, out: &mut Vec<R>) -> Result<()> {
        let Some(file) = &mut self.file else {
            return Ok(());
        };
        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = String::new();
        file.read_to_string(&mut chunk)?;
        self.offset += chunk.len() as u64;
        self.pending.push_str(&chunk);

        while let Some(nl) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=nl).collect();
            match R::parse_line(&line) {
                Ok(Some(rec)) => out.push(rec),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "skipping malformed record");
                }
            }
        }
        Ok(())
    }
}
