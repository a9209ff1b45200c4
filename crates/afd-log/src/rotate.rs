//! Fleet rotation.
//!
//! A fleet is `NAME`, `NAME.1`, .., `NAME.N-1`, oldest last. Rotation
//! shifts every member one slot towards the end, dropping the oldest, and
//! leaves slot 0 free for a fresh live file. Seek-cache sidecars shift in
//! lockstep so a cache always describes the log it sits next to.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::LogCategory;

/// Shift the rotation fleet of `category` under `log_dir` by one.
///
/// `max_log_files` is the fleet size: after the shift the oldest member
/// (`NAME.max_log_files-1`) is gone and `NAME` no longer exists.
pub fn rotate_fleet(
    log_dir: &Path,
    category: LogCategory,
    max_log_files: usize,
) -> io::Result<()> {
    if max_log_files == 0 {
        return Ok(());
    }
    let oldest = category.rotation_path(log_dir, max_log_files - 1);
    remove_if_present(&oldest)?;
    remove_if_present(&category.cache_path(log_dir, max_log_files - 1))?;

    for n in (0..max_log_files.saturating_sub(1)).rev() {
        shift_if_present(
            &category.rotation_path(log_dir, n),
            &category.rotation_path(log_dir, n + 1),
        )?;
        shift_if_present(
            &category.cache_path(log_dir, n),
            &category.cache_path(log_dir, n + 1),
        )?;
    }
    debug!(
        category = ?category,
        fleet = max_log_files,
        "rotated log fleet"
    );
    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn shift_if_present(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
