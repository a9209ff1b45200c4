//! # afd-alda
//!
//! The AFD log data analyser. Joins records across the Input,
//! Distribution, Production, Output and Delete logs to reconstruct the
//! life history of a file as it moved through the pipeline, filters the
//! histories by user predicates and renders them through a format-string
//! DSL.

pub mod cli;
pub mod cursor;
pub mod filters;
pub mod format;
pub mod history;
pub mod join;
pub mod output;
pub mod profile;

pub use cli::AldaArgs;
pub use filters::Filters;
pub use format::OutputFormat;
pub use history::FileHistory;
pub use join::Analyzer;
pub use output::OutputSink;
pub use profile::Profile;

use std::io;

use thiserror::Error;

/// Process exit code for fatal errors.
pub const INCORRECT: i32 = 1;

#[derive(Error, Debug)]
pub enum AldaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("log error: {0}")]
    Log(#[from] afd_log::LogError),

    #[error("catalog error: {0}")]
    Catalog(#[from] afd_catalog::CatalogError),

    #[error("bad format string at byte {at}: {reason}")]
    BadFormat { at: usize, reason: String },

    #[error("bad filter expression {0:?}")]
    BadFilter(String),

    #[error("bad profile file {path}: {reason}")]
    BadProfile { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, AldaError>;
