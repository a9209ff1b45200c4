//! Optional TOML profile carrying defaults for repeated invocations.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::{AldaError, Result};

/// Defaults applied where the command line leaves an option unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub format: Option<String>,
    pub max_diff_time: Option<u64>,
    pub max_search_time: Option<u64>,
    pub max_log_files: Option<usize>,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| AldaError::BadProfile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}
