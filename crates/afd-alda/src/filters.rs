//! User-supplied predicates over joined histories.

use afd_catalog::{pmatch, FilterMatch};

use crate::cli::AldaArgs;
use crate::history::FileHistory;
use crate::{AldaError, Result};

/// A numeric comparison parsed from `">N"`, `"<N"` or `"=N"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeFilter {
    Greater(u64),
    Less(u64),
    Equal(u64),
}

impl SizeFilter {
    pub fn parse(expr: &str) -> Result<Self> {
        let bad = || AldaError::BadFilter(expr.to_string());
        let (op, rest) = expr.split_at(expr.len().min(1));
        let n: u64 = rest.trim().parse().map_err(|_| bad())?;
        match op {
            ">" => Ok(SizeFilter::Greater(n)),
            "<" => Ok(SizeFilter::Less(n)),
            "=" => Ok(SizeFilter::Equal(n)),
            _ => Err(bad()),
        }
    }

    pub fn accepts(self, size: u64) -> bool {
        match self {
            SizeFilter::Greater(n) => size > n,
            SizeFilter::Less(n) => size < n,
            SizeFilter::Equal(n) => size == n,
        }
    }
}

/// All predicates from the command line, applied to each history.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub filenames: Vec<String>,
    pub directories: Vec<String>,
    pub hosts: Vec<String>,
    pub job_ids: Vec<u32>,
    pub size: Option<SizeFilter>,
    pub delete_reason: Option<u16>,
}

impl Filters {
    pub fn from_args(args: &AldaArgs) -> Result<Self> {
        Ok(Self {
            filenames: args.filenames.clone(),
            directories: args.directories.clone(),
            hosts: args.hosts.clone(),
            job_ids: args.job_ids.clone(),
            size: args.size.as_deref().map(SizeFilter::parse).transpose()?,
            delete_reason: args.delete_reason,
        })
    }

    pub fn accepts(&self, h: &FileHistory) -> bool {
        if !mask_list_accepts(&self.filenames, &[h.filename()]) {
            return false;
        }
        if !self.directories.is_empty() {
            let id_hex = h.dir_id().map(|d| format!("{d:x}"));
            let mut names: Vec<&str> = Vec::new();
            if let Some(n) = &h.directory {
                names.push(n);
            }
            if let Some(n) = &id_hex {
                names.push(n);
            }
            if !mask_list_accepts(&self.directories, &names) {
                return false;
            }
        }
        if !self.hosts.is_empty() {
            let hosts: Vec<&str> =
                h.outputs.iter().map(|o| o.host_alias.as_str()).collect();
            if !mask_list_accepts(&self.hosts, &hosts) {
                return false;
            }
        }
        if !self.job_ids.is_empty()
            && !h.job_ids().iter().any(|j| self.job_ids.contains(j))
        {
            return false;
        }
        if let Some(size) = self.size {
            match h.size() {
                Some(s) if size.accepts(s) => {}
                _ => return false,
            }
        }
        if let Some(reason) = self.delete_reason {
            match &h.delete {
                Some(d) if d.deletion_type == reason => {}
                _ => return false,
            }
        }
        true
    }
}

/// Walk a mask list over a set of candidate strings.
///
/// Any `Exclude` rejects outright. With at least one inclusion mask
/// present, some candidate must `Match`; an exclusion-only list accepts
/// everything it did not exclude. An empty list accepts everything.
fn mask_list_accepts(masks: &[String], candidates: &[&str]) -> bool {
    if masks.is_empty() {
        return true;
    }
    let mut has_inclusion = false;
    let mut matched = false;
    for mask in masks {
        if !mask.starts_with('!') {
            has_inclusion = true;
        }
        for cand in candidates {
            match pmatch(mask, cand) {
                FilterMatch::Exclude => return false,
                FilterMatch::Match => matched = true,
                FilterMatch::Unrelated => {}
            }
        }
    }
    !has_inclusion || matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_log::InputRecord;

    fn history(name: &str, size: u64) -> FileHistory {
        FileHistory {
            input: Some(InputRecord {
                time: 100,
                filename: name.to_string(),
                size,
                dir_id: 0x12ab,
                unique_number: 7,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_size_filter_parse_and_apply() {
        assert_eq!(SizeFilter::parse(">100").unwrap(), SizeFilter::Greater(100));
        assert!(SizeFilter::parse("100").is_err());
        assert!(SizeFilter::parse("=").is_err());
        assert!(SizeFilter::Less(5).accepts(4));
        assert!(!SizeFilter::Equal(5).accepts(4));
    }

    #[test]
    fn test_filename_masks() {
        let f = Filters {
            filenames: vec!["*.dat".to_string()],
            ..Default::default()
        };
        assert!(f.accepts(&history("a.dat", 1)));
        assert!(!f.accepts(&history("a.txt", 1)));

        let only_exclusion = Filters {
            filenames: vec!["!*.tmp".to_string()],
            ..Default::default()
        };
        assert!(only_exclusion.accepts(&history("a.dat", 1)));
        assert!(!only_exclusion.accepts(&history("a.tmp", 1)));
    }

    #[test]
    fn test_dir_filter_matches_hex_id_or_name() {
        let f = Filters {
            directories: vec!["12ab".to_string()],
            ..Default::default()
        };
        assert!(f.accepts(&history("a", 1)));

        let mut h = history("a", 1);
        h.directory = Some("/incoming/wmo".to_string());
        let by_name = Filters {
            directories: vec!["/incoming/*".to_string()],
            ..Default::default()
        };
        assert!(by_name.accepts(&h));
        assert!(!by_name.accepts(&history("a", 1)));
    }

    #[test]
    fn test_size_and_reason_predicates() {
        let f = Filters {
            size: Some(SizeFilter::Equal(400)),
            ..Default::default()
        };
        assert!(f.accepts(&history("a", 400)));
        assert!(!f.accepts(&history("a", 401)));

        let f = Filters {
            delete_reason: Some(afd_log::record::AGE_OUTPUT),
            ..Default::default()
        };
        assert!(!f.accepts(&history("a", 1)));
    }
}
