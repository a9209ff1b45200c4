//! # afd-area
//!
//! Lifecycle of AFD's memory-mapped status areas (FSA, FRA, JID, DNB).
//!
//! Every area is a regular file starting with a fixed [`AreaHeader`] followed
//! by `count` fixed-size records plus one invisible trailing scratch slot.
//! A `<name>.id` file, protected by an fcntl write lock on byte 0, names the
//! currently live generation `<name>_STAT.<gen>`. Superseded generations are
//! stamped [`STALE`] in their header so attached readers know to remap.

pub mod fixed;
mod header;
pub mod paths;

pub use header::{AreaHeader, AFD_WORD_OFFSET, STALE};

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use memmap2::{Mmap, MmapMut};
use nix::fcntl::{fcntl, FcntlArg};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur on area operations
#[derive(Error, Debug)]
pub enum AreaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("area file is empty: {path}")]
    Empty { path: PathBuf },

    #[error("area generation superseded, remap required")]
    StaleSuperseded,

    #[error("area format version mismatch: on disk {on_disk}, expected {expected}")]
    VersionMismatch { on_disk: u8, expected: u8 },

    #[error("no live generation published for {base}")]
    NoGeneration { base: PathBuf },

    #[error("area file {path} too small: {actual} bytes, need {expected}")]
    Truncated {
        path: PathBuf,
        actual: u64,
        expected: u64,
    },

    #[error("cannot lock {path}: {source}")]
    Lock { path: PathBuf, source: nix::Error },

    #[error("corrupt generation id file: {path}")]
    BadIdFile { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, AreaError>;

/// A fixed-size record stored in a mapped area.
///
/// `VERSION` is the compiled-in format version stamped into the header at
/// creation and checked on every open.
pub trait AreaRecord: Pod {
    const VERSION: u8;
}

/// Rewrites a down-level area file to the current layout.
///
/// `file` holds the complete file contents including the header; the
/// converter must leave the header's version byte at the current value.
pub trait AreaConverter {
    fn convert(&self, on_disk: u8, file: &mut Vec<u8>) -> Result<()>;
}

/// Path scheme for one area: `<dir>/<name>_STAT.<gen>` plus `<dir>/<name>.id`.
#[derive(Debug, Clone)]
pub struct AreaPaths {
    dir: PathBuf,
    name: String,
}

impl AreaPaths {
    pub fn new<P: AsRef<Path>>(dir: P, name: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            name: name.to_string(),
        }
    }

    pub fn id_path(&self) -> PathBuf {
        self.dir.join(format!("{}.id", self.name))
    }

    pub fn stat_path(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("{}_STAT.{}", self.name, generation))
    }

    /// Read the currently published generation, or `None` when the area has
    /// never been created.
    pub fn current_generation(&self) -> Result<Option<u64>> {
        let id_path = self.id_path();
        let mut contents = String::new();
        match File::open(&id_path) {
            Ok(mut f) => {
                f.read_to_string(&mut contents)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AreaError::BadIdFile { path: id_path })
    }
}

/// Exclusive advisory write lock on byte 0 of the `.id` file.
///
/// Dropping the guard releases the lock. A blocked acquisition waits; a lock
/// that cannot be taken at all (EDEADLK, bad descriptor) is an error.
struct IdLock {
    file: File,
    path: PathBuf,
}

impl IdLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = libc::F_WRLCK as _;
        fl.l_whence = libc::SEEK_SET as _;
        fl.l_start = 0;
        fl.l_len = 1;
        loop {
            match fcntl(file.as_raw_fd(), FcntlArg::F_SETLKW(&fl)) {
                Ok(_) => break,
                Err(nix::Error::EINTR) => continue,
                Err(source) => {
                    return Err(AreaError::Lock {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    fn read_generation(&mut self) -> Result<Option<u64>> {
        let mut contents = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut contents)?;
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AreaError::BadIdFile {
                path: self.path.clone(),
            })
    }

    fn write_generation(&mut self, generation: u64) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{generation}")?;
        self.file.sync_data()?;
        Ok(())
    }
}

impl Drop for IdLock {
    fn drop(&mut self) {
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = libc::F_UNLCK as _;
        fl.l_whence = libc::SEEK_SET as _;
        fl.l_start = 0;
        fl.l_len = 1;
        let _ = fcntl(self.file.as_raw_fd(), FcntlArg::F_SETLK(&fl));
    }
}

fn expected_size<R: AreaRecord>(count: usize) -> u64 {
    (AFD_WORD_OFFSET + (count + 1) * std::mem::size_of::<R>()) as u64
}

fn page_size() -> u32 {
    nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .map(|v| v as u32)
        .unwrap_or(4096)
}

/// Read-only attachment to the live generation of an area.
#[derive(Debug)]
pub struct MappedArea<R: AreaRecord> {
    paths: AreaPaths,
    map: Mmap,
    generation: u64,
    _marker: PhantomData<R>,
}

impl<R: AreaRecord> MappedArea<R> {
    /// Attach to the generation currently published in `<name>.id`.
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        Self::open_paths(AreaPaths::new(dir, name))
    }

    /// Like [`open`](Self::open), but rewrites a down-level file through
    /// `converter` before attaching. Intended for the producer side; the
    /// conversion runs at most once per generation.
    pub fn open_with_converter<P: AsRef<Path>>(
        dir: P,
        name: &str,
        converter: &dyn AreaConverter,
    ) -> Result<Self> {
        let paths = AreaPaths::new(dir, name);
        match Self::open_paths(paths.clone()) {
            Err(AreaError::VersionMismatch { on_disk, expected }) if on_disk < expected => {
                warn!(
                    name,
                    on_disk, expected, "down-level area data, invoking converter"
                );
                let generation = paths
                    .current_generation()?
                    .ok_or_else(|| AreaError::NoGeneration {
                        base: paths.id_path(),
                    })?;
                let stat = paths.stat_path(generation);
                let mut contents = std::fs::read(&stat)?;
                converter.convert(on_disk, &mut contents)?;
                let f = OpenOptions::new().write(true).open(&stat)?;
                f.set_len(contents.len() as u64)?;
                f.write_all_at(&contents, 0)?;
                f.sync_data()?;
                Self::open_paths(paths)
            }
            other => other,
        }
    }

    fn open_paths(paths: AreaPaths) -> Result<Self> {
        let generation = paths
            .current_generation()?
            .ok_or_else(|| AreaError::NoGeneration {
                base: paths.id_path(),
            })?;
        let stat = paths.stat_path(generation);
        let file = File::open(&stat)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(AreaError::Empty { path: stat });
        }
        if len < AFD_WORD_OFFSET as u64 {
            return Err(AreaError::Truncated {
                path: stat,
                actual: len,
                expected: AFD_WORD_OFFSET as u64,
            });
        }
        // Safety: shared file mapping, never written through this map
        let map = unsafe { Mmap::map(&file)? };
        let header: &AreaHeader = bytemuck::from_bytes(&map[..AFD_WORD_OFFSET]);
        if header.is_stale() {
            return Err(AreaError::StaleSuperseded);
        }
        if header.version != R::VERSION {
            return Err(AreaError::VersionMismatch {
                on_disk: header.version,
                expected: R::VERSION,
            });
        }
        let count = header.count as usize;
        let need = expected_size::<R>(count);
        if len < need {
            return Err(AreaError::Truncated {
                path: stat,
                actual: len,
                expected: need,
            });
        }
        debug!(name = %paths.name, generation, count, "attached to area");
        Ok(Self {
            paths,
            map,
            generation,
            _marker: PhantomData,
        })
    }

    pub fn header(&self) -> &AreaHeader {
        bytemuck::from_bytes(&self.map[..AFD_WORD_OFFSET])
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        self.header().is_stale()
    }

    /// The visible records of this generation.
    ///
    /// Re-validates the STALE sentinel on every call, as required of
    /// observers; the trailing scratch slot is not exposed.
    pub fn records(&self) -> Result<&[R]> {
        let header = self.header();
        if header.is_stale() {
            return Err(AreaError::StaleSuperseded);
        }
        let count = header.count as usize;
        let bytes = &self.map[AFD_WORD_OFFSET..AFD_WORD_OFFSET + count * std::mem::size_of::<R>()];
        Ok(bytemuck::cast_slice(bytes))
    }

    /// If the mapped generation has been superseded, unmap and re-attach to
    /// the published one. Returns `true` when a remap happened. Idempotent.
    pub fn reopen_if_stale(&mut self) -> Result<bool> {
        if !self.is_stale() {
            return Ok(false);
        }
        let fresh = Self::open_paths(self.paths.clone())?;
        *self = fresh;
        Ok(true)
    }
}

/// Writable attachment held by the area's unique producer.
pub struct MappedAreaMut<R: AreaRecord> {
    paths: AreaPaths,
    map: MmapMut,
    generation: u64,
    _marker: PhantomData<R>,
}

impl<R: AreaRecord> MappedAreaMut<R> {
    /// Map the live generation read/write for in-place updates.
    pub fn attach<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let paths = AreaPaths::new(dir, name);
        let generation = paths
            .current_generation()?
            .ok_or_else(|| AreaError::NoGeneration {
                base: paths.id_path(),
            })?;
        let stat = paths.stat_path(generation);
        let file = OpenOptions::new().read(true).write(true).open(&stat)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(AreaError::Empty { path: stat });
        }
        // Safety: producer is the single writer of this mapping
        let map = unsafe { MmapMut::map_mut(&file)? };
        let header: &AreaHeader = bytemuck::from_bytes(&map[..AFD_WORD_OFFSET]);
        if header.is_stale() {
            return Err(AreaError::StaleSuperseded);
        }
        if header.version != R::VERSION {
            return Err(AreaError::VersionMismatch {
                on_disk: header.version,
                expected: R::VERSION,
            });
        }
        let need = expected_size::<R>(header.count as usize);
        if len < need {
            return Err(AreaError::Truncated {
                path: stat,
                actual: len,
                expected: need,
            });
        }
        Ok(Self {
            paths,
            map,
            generation,
            _marker: PhantomData,
        })
    }

    pub fn header(&self) -> &AreaHeader {
        bytemuck::from_bytes(&self.map[..AFD_WORD_OFFSET])
    }

    pub fn header_mut(&mut self) -> &mut AreaHeader {
        bytemuck::from_bytes_mut(&mut self.map[..AFD_WORD_OFFSET])
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn count(&self) -> usize {
        self.header().count as usize
    }

    pub fn records(&self) -> &[R] {
        let count = self.count();
        let bytes = &self.map[AFD_WORD_OFFSET..AFD_WORD_OFFSET + count * std::mem::size_of::<R>()];
        bytemuck::cast_slice(bytes)
    }

    pub fn records_mut(&mut self) -> &mut [R] {
        let count = self.count();
        let bytes =
            &mut self.map[AFD_WORD_OFFSET..AFD_WORD_OFFSET + count * std::mem::size_of::<R>()];
        bytemuck::cast_slice_mut(bytes)
    }

    /// The invisible trailing slot used as scratch during renumbering.
    pub fn scratch_mut(&mut self) -> &mut R {
        let count = self.count();
        let start = AFD_WORD_OFFSET + count * std::mem::size_of::<R>();
        let bytes = &mut self.map[start..start + std::mem::size_of::<R>()];
        &mut bytemuck::cast_slice_mut(bytes)[0]
    }

    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

/// Create and publish a new generation of an area.
///
/// The file is written out fully in zeroed 4 KiB chunks before being mapped,
/// so page faults through the mapping cannot hit a full disk later. `seed`
/// populates the `count` visible records; the trailing scratch slot stays
/// zeroed. Publication then happens under the `.id` write lock: the previous
/// generation's header is stamped STALE, the new generation id is written,
/// and the previous file is unlinked.
pub fn create_area<R, P, F>(
    dir: P,
    name: &str,
    count: usize,
    feature_flags: u8,
    seed: F,
) -> Result<MappedAreaMut<R>>
where
    R: AreaRecord,
    P: AsRef<Path>,
    F: FnOnce(&mut [R]),
{
    let paths = AreaPaths::new(dir, name);
    let mut lock = IdLock::acquire(&paths.id_path())?;
    let previous = lock.read_generation()?;
    let generation = previous.map_or(1, |g| g + 1);
    let stat = paths.stat_path(generation);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&stat)?;
    let total = expected_size::<R>(count);
    write_zeroed(&file, total)?;

    // Safety: fresh file, no other mapper yet
    let mut map = unsafe { MmapMut::map_mut(&file)? };
    {
        let header: &mut AreaHeader =
            bytemuck::from_bytes_mut(&mut map[..AFD_WORD_OFFSET]);
        header.count = count as i32;
        header.feature_flags = feature_flags;
        header.version = R::VERSION;
        header.page_size = page_size();
    }
    {
        let bytes =
            &mut map[AFD_WORD_OFFSET..AFD_WORD_OFFSET + count * std::mem::size_of::<R>()];
        seed(bytemuck::cast_slice_mut(bytes));
    }
    map.flush()?;

    if let Some(prev) = previous {
        let prev_stat = paths.stat_path(prev);
        if let Err(e) = stamp_stale(&prev_stat) {
            warn!(path = %prev_stat.display(), error = %e, "cannot stamp stale header");
        }
        lock.write_generation(generation)?;
        match std::fs::remove_file(&prev_stat) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %prev_stat.display(), error = %e, "cannot unlink superseded generation");
            }
        }
    } else {
        lock.write_generation(generation)?;
    }
    drop(lock);

    debug!(name, generation, count, "published new area generation");
    Ok(MappedAreaMut {
        paths,
        map,
        generation,
        _marker: PhantomData,
    })
}

fn write_zeroed(file: &File, total: u64) -> Result<()> {
    const CHUNK: usize = 4096;
    let zeros = [0u8; CHUNK];
    let mut written = 0u64;
    while written < total {
        let n = std::cmp::min(CHUNK as u64, total - written) as usize;
        file.write_all_at(&zeros[..n], written)?;
        written += n as u64;
    }
    file.sync_data()?;
    Ok(())
}

fn stamp_stale(stat: &Path) -> io::Result<()> {
    let file = match OpenOptions::new().write(true).open(stat) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    file.write_all_at(&STALE.to_ne_bytes(), 0)?;
    file.sync_data()?;
    Ok(())
}
