//! # afd-status
//!
//! The two mapped status tables every AFD process shares: the FSA
//! (Filetransfer Status Area, one record per host) and the FRA (File
//! Retrieve Area, one record per watched directory), together with the
//! `HOST_CONFIG` parser and the reload machinery that rebuilds both tables
//! from configuration while carrying per-entry runtime state forward.

pub mod fra;
pub mod fsa;
pub mod host_config;
pub mod reload;

pub use fra::{BdTimeEntry, DirConfigEntry, FraRecord};
pub use fsa::{FsaRecord, HostConfigEntry};
pub use host_config::{parse_host_config, read_host_config, write_host_config, HostConfigParse};
pub use reload::{build_fra, build_fsa, LogReloadEvents, ReloadError, ReloadEvents};
