//! Well-known names inside an AFD working directory.

use std::path::{Path, PathBuf};

/// Subdirectory holding the mapped status areas and text configs.
pub const FIFO_DIR: &str = "fifo_dir";

/// Subdirectory holding the category logs.
pub const LOG_DIR: &str = "log";

/// Per-monitored-AFD mirror of the log tree.
pub const REMOTE_LOG_DIR: &str = "remote_log";

/// Area base names.
pub const FSA_NAME: &str = "FSA";
pub const FRA_NAME: &str = "FRA";
pub const JID_NAME: &str = "JOB_ID_DATA";
pub const DNB_NAME: &str = "DIR_NAME_FILE";
pub const FMD_NAME: &str = "FILE_MASK_DATA";

/// Text config file names inside `fifo_dir`.
pub const HOST_CONFIG_NAME: &str = "HOST_CONFIG";

pub fn fifo_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(FIFO_DIR)
}

pub fn log_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(LOG_DIR)
}

pub fn remote_log_dir(work_dir: &Path, afd_alias: &str) -> PathBuf {
    work_dir.join(REMOTE_LOG_DIR).join(afd_alias)
}

pub fn host_config_path(work_dir: &Path) -> PathBuf {
    fifo_dir(work_dir).join(HOST_CONFIG_NAME)
}
