//! # afd-log
//!
//! The append-only, rotating category logs: Input, Distribution,
//! Production, Output and Delete. Records are line-oriented text with
//! hex-encoded numbers, `|`-separated fields and a fixed-width leading
//! timestamp; the Output log optionally carries a binary `(time, offset)`
//! seek-cache sidecar for time-indexed reads.

pub mod record;
pub mod rotate;
pub mod seek_cache;
pub mod writer;

pub use record::{
    delete_reason_text, DeleteRecord, DistributionRecord, DistributionType, InputRecord,
    LogRecord, OutputRecord, OutputType, ProductionRecord,
};
pub use rotate::rotate_fleet;
pub use seek_cache::{SeekCacheWriter, CACHE_FULL_MAP_LIMIT};
pub use writer::LogWriter;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Field separator within a record.
pub const SEPARATOR_CHAR: char = '|';

/// Width of the leading hex seconds-since-epoch field.
pub const LOG_DATE_LENGTH: usize = 8;

/// Field ceilings; overlong values truncate with a `>` sentinel.
pub const MAX_FILENAME_LENGTH: usize = 256;
pub const MAX_PROC_USER_LENGTH: usize = 64;

/// Default fleet size per category, `name`, `name.1`, .., `name.N-1`.
pub const DEFAULT_MAX_LOG_FILES: usize = 7;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("missing field {field} in {category:?} record")]
    MissingField {
        category: LogCategory,
        field: &'static str,
    },

    #[error("bad {field} field in {category:?} record: {value:?}")]
    BadField {
        category: LogCategory,
        field: &'static str,
        value: String,
    },
}

pub type Result<T> = std::result::Result<T, LogError>;

/// The five log categories, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogCategory {
    Input,
    Distribution,
    Production,
    Output,
    Delete,
}

impl LogCategory {
    pub const ALL: [LogCategory; 5] = [
        LogCategory::Input,
        LogCategory::Distribution,
        LogCategory::Production,
        LogCategory::Output,
        LogCategory::Delete,
    ];

    pub fn base_name(self) -> &'static str {
        match self {
            LogCategory::Input => "INPUT_LOG",
            LogCategory::Distribution => "DISTRIBUTION_LOG",
            LogCategory::Production => "PRODUCTION_LOG",
            LogCategory::Output => "OUTPUT_LOG",
            LogCategory::Delete => "DELETE_LOG",
        }
    }

    /// Single-letter selector used on the ALDA command line.
    pub fn selector(self) -> char {
        match self {
            LogCategory::Input => 'I',
            LogCategory::Distribution => 'U',
            LogCategory::Production => 'P',
            LogCategory::Output => 'O',
            LogCategory::Delete => 'D',
        }
    }

    pub fn from_selector(c: char) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|cat| cat.selector() == c.to_ascii_uppercase())
    }

    /// Path of rotation `n` (0 is the live file) under `log_dir`.
    pub fn rotation_path(self, log_dir: &Path, n: usize) -> PathBuf {
        rotation_path(log_dir, self.base_name(), n)
    }

    /// Path of the seek-cache sidecar for rotation `n`.
    pub fn cache_path(self, log_dir: &Path, n: usize) -> PathBuf {
        rotation_path(log_dir, &format!("{}_CACHE", self.base_name()), n)
    }
}

fn rotation_path(log_dir: &Path, base: &str, n: usize) -> PathBuf {
    if n == 0 {
        log_dir.join(base)
    } else {
        log_dir.join(format!("{base}.{n}"))
    }
}
