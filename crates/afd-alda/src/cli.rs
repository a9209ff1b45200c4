//! Command line of the `alda` binary.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use afd_log::{LogCategory, DEFAULT_MAX_LOG_FILES};

use crate::profile::Profile;

/// How the analyser walks the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Newest to oldest within the time window, then stop.
    Backward,
    /// Oldest to newest within the time window, then stop.
    Forward,
    /// Forward pass, then follow the live logs until killed.
    Continuous,
    /// Follow only; start at the current end of every log.
    ContinuousDaemon,
}

/// AFD log data analyser
#[derive(Debug, Parser)]
#[command(name = "alda")]
#[command(version, about, long_about = None)]
pub struct AldaArgs {
    /// AFD working directory (contains fifo_dir/ and log/)
    #[arg(short = 'w', long, env = "AFD_WORK_DIR")]
    pub work_dir: PathBuf,

    #[arg(short = 'm', long, value_enum, default_value = "forward")]
    pub mode: Mode,

    /// Log categories to join, as selector letters (I, U, P, O, D)
    #[arg(short = 'L', long, default_value = "IUPOD")]
    pub logs: String,

    /// Window start, seconds since epoch
    #[arg(short = 's', long)]
    pub start: Option<u64>,

    /// Window end, seconds since epoch
    #[arg(short = 'e', long)]
    pub end: Option<u64>,

    /// Filename pattern; leading '!' excludes (repeatable)
    #[arg(short = 'f', long = "filename")]
    pub filenames: Vec<String>,

    /// Directory name or hex dir id pattern (repeatable)
    #[arg(short = 'd', long = "directory")]
    pub directories: Vec<String>,

    /// Host alias pattern (repeatable)
    #[arg(short = 'H', long = "host")]
    pub hosts: Vec<String>,

    /// Hex job id (repeatable)
    #[arg(short = 'j', long = "job-id", value_parser = parse_hex_u32)]
    pub job_ids: Vec<u32>,

    /// Size predicate, e.g. ">1000", "<400", "=400"
    #[arg(short = 'S', long)]
    pub size: Option<String>,

    /// Only histories deleted for this reason code
    #[arg(long)]
    pub delete_reason: Option<u16>,

    /// Join tolerance between category timestamps, seconds
    #[arg(long)]
    pub max_diff_time: Option<u64>,

    /// Wall-clock budget for the whole search, seconds
    #[arg(long)]
    pub max_search_time: Option<u64>,

    /// Fleet size assumed per category
    #[arg(long)]
    pub max_log_files: Option<usize>,

    /// Output format string
    #[arg(short = 'F', long)]
    pub format: Option<String>,

    /// Write matches here instead of stdout
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Rotate the output file every N seconds
    #[arg(long)]
    pub rotate_output_interval: Option<u64>,

    /// File emitted once before the first match
    #[arg(long)]
    pub header: Option<PathBuf>,

    /// File emitted once after the last match
    #[arg(long)]
    pub footer: Option<PathBuf>,

    /// TOML profile supplying defaults for unset options
    #[arg(long)]
    pub profile: Option<PathBuf>,
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| format!("bad hex job id {s:?}: {e}"))
}

/// The fully-resolved options after profile defaults are applied.
#[derive(Debug, Clone)]
pub struct Options {
    pub categories: Vec<LogCategory>,
    pub max_diff_time: u64,
    pub max_search_time: Option<u64>,
    pub max_log_files: usize,
    pub format: String,
}

pub const DEFAULT_MAX_DIFF_TIME: u64 = 3600;
pub const DEFAULT_FORMAT: &str = "%IT|%IF|%IS|%OT|%OH|%OO|%JR";

impl AldaArgs {
    /// Merge the CLI with an optional profile; CLI wins per option.
    pub fn resolve(&self, profile: Option<&Profile>) -> Options {
        let pick_logs = self
            .logs
            .chars()
            .filter_map(LogCategory::from_selector)
            .collect::<Vec<_>>();
        let mut categories = Vec::new();
        for cat in LogCategory::ALL {
            if pick_logs.contains(&cat) {
                categories.push(cat);
            }
        }
        Options {
            categories,
            max_diff_time: self
                .max_diff_time
                .or(profile.and_then(|p| p.max_diff_time))
                .unwrap_or(DEFAULT_MAX_DIFF_TIME),
            max_search_time: self
                .max_search_time
                .or(profile.and_then(|p| p.max_search_time)),
            max_log_files: self
                .max_log_files
                .or(profile.and_then(|p| p.max_log_files))
                .unwrap_or(DEFAULT_MAX_LOG_FILES),
            format: self
                .format
                .clone()
                .or(profile.and_then(|p| p.format.clone()))
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
        }
    }
}
