//! File Retrieve Area: one record per watched directory.

use afd_area::{fixed, AreaRecord};
use bytemuck::{Pod, Zeroable};

pub const MAX_DIR_ALIAS_LENGTH: usize = 10;
pub const MAX_FRA_HOSTNAME_LENGTH: usize = 8;
pub const MAX_RECIPIENT_LENGTH: usize = 255;
pub const MAX_TIMEZONE_LENGTH: usize = 31;
pub const MAX_FRA_TIME_ENTRIES: usize = 12;

/// `dir_options` bits.
pub const ACCEPT_DOT_FILES: u32 = 0x0001;
pub const DO_NOT_PARALLELIZE: u32 = 0x0002;
pub const DO_NOT_MOVE: u32 = 0x0004;
pub const DONT_GET_DIR_LIST: u32 = 0x0008;
pub const URL_CREATES_FILE_NAME: u32 = 0x0010;
pub const URL_WITH_INDEX_FILE_NAME: u32 = 0x0020;
pub const NO_DELIMITER: u32 = 0x0040;
pub const KEEP_PATH: u32 = 0x0080;
pub const ONE_PROCESS_JUST_SCANNING: u32 = 0x0100;
pub const INOTIFY_RENAME: u32 = 0x0200;
pub const INOTIFY_CLOSE: u32 = 0x0400;
pub const INOTIFY_CREATE: u32 = 0x0800;
pub const INOTIFY_DELETE: u32 = 0x1000;
pub const INOTIFY_ATTRIB: u32 = 0x2000;

/// The bits `DIR_CONFIG` governs. On reload the config wins for these;
/// any other bit (set by runtime tools) is preserved verbatim.
pub const GOVERNED_DIR_OPTIONS: u32 = ACCEPT_DOT_FILES
    | DO_NOT_PARALLELIZE
    | DO_NOT_MOVE
    | DONT_GET_DIR_LIST
    | URL_CREATES_FILE_NAME
    | URL_WITH_INDEX_FILE_NAME
    | NO_DELIMITER
    | KEEP_PATH
    | ONE_PROCESS_JUST_SCANNING
    | INOTIFY_RENAME
    | INOTIFY_CLOSE
    | INOTIFY_CREATE
    | INOTIFY_DELETE
    | INOTIFY_ATTRIB;

/// `dir_flag` bits.
pub const INFO_TIME_REACHED: u32 = 0x01;
pub const WARN_TIME_REACHED: u32 = 0x02;
pub const DIR_DISABLED: u32 = 0x04;
pub const DIR_ERROR_SET: u32 = 0x08;
pub const DIR_STOPPED: u32 = 0x10;

/// `dir_status` values.
pub const NORMAL_STATUS: u32 = 0;
pub const INFO_DIR_STATUS: u32 = 1;
pub const WARNING_DIR_STATUS: u32 = 2;
pub const NOT_WORKING_DIR_STATUS: u32 = 3;

pub const CURRENT_FRA_VERSION: u8 = 5;

/// Broken-down "cron-like" schedule entry: one bit per minute, hour,
/// day-of-month, month and day-of-week.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BdTimeEntry {
    pub minute: u64,
    pub hour: u32,
    pub day_of_month: u32,
    pub month: u16,
    pub day_of_week: u8,
    _pad: [u8; 5],
}

impl BdTimeEntry {
    /// An entry matching every minute of every day.
    pub fn always() -> Self {
        let mut e = Self::zeroed();
        e.minute = u64::MAX;
        e.hour = 0x00ff_ffff;
        e.day_of_month = 0xffff_fffe;
        e.month = 0x0fff;
        e.day_of_week = 0x7f;
        e
    }

    /// Whether the broken-down time (`dow` 0 = Sunday, `dom` 1-based,
    /// `month` 0-based) falls inside this entry.
    pub fn matches(&self, minute: u32, hour: u32, dom: u32, month: u32, dow: u32) -> bool {
        self.minute & (1u64 << minute) != 0
            && self.hour & (1u32 << hour) != 0
            && self.day_of_month & (1u32 << dom) != 0
            && self.month & (1u16 << month) != 0
            && self.day_of_week & (1u8 << dow) != 0
    }
}

/// The `DIR_CONFIG`-derived description of one watched directory, as handed
/// over by the directory-config evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct DirConfigEntry {
    pub dir_alias: String,
    pub host_alias: String,
    pub url: String,
    pub timezone: String,
    pub dir_id: u32,
    pub priority: u32,
    pub delete_files_flag: u32,
    pub unknown_file_time: u32,
    pub queued_file_time: u32,
    pub locked_file_time: u32,
    pub unreadable_file_time: u32,
    pub accept_dot_files: bool,
    pub do_not_parallelize: bool,
    pub do_not_move: bool,
    pub dont_get_dir_list: bool,
    pub url_creates_file_name: bool,
    pub url_with_index_file_name: bool,
    pub no_delimiter: bool,
    pub keep_path: bool,
    pub one_process_just_scanning: bool,
    /// Pre-assembled inotify option bits.
    pub inotify_flags: u32,
    pub create_source_dir: bool,
    /// POSIX mode applied when `create_source_dir` is on.
    pub dir_mode: u32,
    pub info_time: i64,
    pub warn_time: i64,
    pub max_errors: u32,
    pub time_entries: Vec<BdTimeEntry>,
}

impl Default for DirConfigEntry {
    fn default() -> Self {
        Self {
            dir_alias: String::new(),
            host_alias: String::new(),
            url: String::new(),
            timezone: String::new(),
            dir_id: 0,
            priority: 9,
            delete_files_flag: 0,
            unknown_file_time: 0,
            queued_file_time: 0,
            locked_file_time: 0,
            unreadable_file_time: 0,
            accept_dot_files: false,
            do_not_parallelize: false,
            do_not_move: false,
            dont_get_dir_list: false,
            url_creates_file_name: false,
            url_with_index_file_name: false,
            no_delimiter: false,
            keep_path: false,
            one_process_just_scanning: false,
            inotify_flags: 0,
            create_source_dir: false,
            dir_mode: 0,
            info_time: 0,
            warn_time: 0,
            max_errors: 10,
            time_entries: Vec::new(),
        }
    }
}

impl DirConfigEntry {
    /// The governed `dir_options` bits this config asks for.
    pub fn governed_dir_options(&self) -> u32 {
        let mut bits = self.inotify_flags
            & (INOTIFY_RENAME | INOTIFY_CLOSE | INOTIFY_CREATE | INOTIFY_DELETE | INOTIFY_ATTRIB);
        let mut set = |on: bool, bit: u32| {
            if on {
                bits |= bit;
            }
        };
        set(self.accept_dot_files, ACCEPT_DOT_FILES);
        set(self.do_not_parallelize, DO_NOT_PARALLELIZE);
        set(self.do_not_move, DO_NOT_MOVE);
        set(self.dont_get_dir_list, DONT_GET_DIR_LIST);
        set(self.url_creates_file_name, URL_CREATES_FILE_NAME);
        set(self.url_with_index_file_name, URL_WITH_INDEX_FILE_NAME);
        set(self.no_delimiter, NO_DELIMITER);
        set(self.keep_path, KEEP_PATH);
        set(self.one_process_just_scanning, ONE_PROCESS_JUST_SCANNING);
        bits
    }
}

/// One FRA record as mapped on disk.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FraRecord {
    pub dir_alias: [u8; MAX_DIR_ALIAS_LENGTH + 1],
    pub host_alias: [u8; MAX_FRA_HOSTNAME_LENGTH + 1],
    pub url: [u8; MAX_RECIPIENT_LENGTH + 1],
    pub timezone: [u8; MAX_TIMEZONE_LENGTH + 1],
    _pad0: [u8; 4],

    pub time_entries: [BdTimeEntry; MAX_FRA_TIME_ENTRIES],
    /// One-shot alarm entry, carried across reloads.
    pub ate: BdTimeEntry,

    pub dir_id: u32,
    pub no_of_time_entries: u32,
    pub priority: u32,
    pub delete_files_flag: u32,
    pub unknown_file_time: u32,
    pub queued_file_time: u32,
    pub locked_file_time: u32,
    pub unreadable_file_time: u32,
    pub dir_options: u32,
    pub dir_mode: u32,
    pub max_errors: u32,
    pub error_counter: u32,
    pub dir_status: u32,
    pub dir_flag: u32,
    pub no_of_process: u32,
    pub queued: u32,
    pub files_in_dir: u32,
    pub files_queued: u32,
    pub files_received: u32,
    pub start_event_handle: u32,
    pub end_event_handle: u32,
    _pad1: u32,

    pub info_time: i64,
    pub warn_time: i64,
    pub last_retrieval: i64,
    pub dir_mtime: i64,
    pub bytes_received: u64,
    pub bytes_in_dir: u64,
    pub bytes_in_queue: u64,
}

impl AreaRecord for FraRecord {
    const VERSION: u8 = CURRENT_FRA_VERSION;
}

impl FraRecord {
    /// Build a record from configuration with all runtime state zeroed.
    pub fn from_config(e: &DirConfigEntry) -> Self {
        let mut rec = Self::zeroed();
        fixed::set(&mut rec.dir_alias, &e.dir_alias);
        fixed::set(&mut rec.host_alias, &e.host_alias);
        fixed::set(&mut rec.url, &e.url);
        fixed::set(&mut rec.timezone, &e.timezone);
        rec.dir_id = e.dir_id;
        rec.priority = e.priority;
        rec.delete_files_flag = e.delete_files_flag;
        rec.unknown_file_time = e.unknown_file_time;
        rec.queued_file_time = e.queued_file_time;
        rec.locked_file_time = e.locked_file_time;
        rec.unreadable_file_time = e.unreadable_file_time;
        rec.dir_options = e.governed_dir_options();
        rec.dir_mode = if e.create_source_dir { e.dir_mode } else { 0 };
        rec.info_time = e.info_time;
        rec.warn_time = e.warn_time;
        rec.max_errors = e.max_errors;
        rec.dir_status = NORMAL_STATUS;
        let n = e.time_entries.len().min(MAX_FRA_TIME_ENTRIES);
        rec.time_entries[..n].copy_from_slice(&e.time_entries[..n]);
        rec.no_of_time_entries = n as u32;
        rec
    }

    pub fn alias(&self) -> &str {
        fixed::get(&self.dir_alias)
    }

    pub fn url(&self) -> &str {
        fixed::get(&self.url)
    }

    /// Derive `dir_status` from the error counter and warn/info flags.
    pub fn recompute_dir_status(&mut self) {
        self.dir_status = if self.max_errors > 0 && self.error_counter >= self.max_errors {
            NOT_WORKING_DIR_STATUS
        } else if self.dir_flag & WARN_TIME_REACHED != 0 {
            WARNING_DIR_STATUS
        } else if self.dir_flag & INFO_TIME_REACHED != 0 {
            INFO_DIR_STATUS
        } else {
            NORMAL_STATUS
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout_is_packed() {
        assert_eq!(std::mem::size_of::<BdTimeEntry>(), 24);
        assert_eq!(
            std::mem::size_of::<FraRecord>(),
            312 + 288 + 24 + 88 + 56
        );
    }

    #[test]
    fn test_governed_bits_follow_config() {
        let e = DirConfigEntry {
            accept_dot_files: true,
            keep_path: true,
            inotify_flags: INOTIFY_CLOSE | INOTIFY_CREATE,
            ..Default::default()
        };
        let bits = e.governed_dir_options();
        assert_eq!(
            bits,
            ACCEPT_DOT_FILES | KEEP_PATH | INOTIFY_CLOSE | INOTIFY_CREATE
        );
    }

    #[test]
    fn test_dir_mode_zero_without_create_source_dir() {
        let mut e = DirConfigEntry {
            dir_mode: 0o755,
            ..Default::default()
        };
        assert_eq!(FraRecord::from_config(&e).dir_mode, 0);
        e.create_source_dir = true;
        assert_eq!(FraRecord::from_config(&e).dir_mode, 0o755);
    }

    #[test]
    fn test_time_entry_match() {
        let mut e = BdTimeEntry::zeroed();
        e.minute = 1 << 30;
        e.hour = 1 << 12;
        e.day_of_month = 1 << 24;
        e.month = 1 << 6;
        e.day_of_week = 1 << 3;
        assert!(e.matches(30, 12, 24, 6, 3));
        assert!(!e.matches(31, 12, 24, 6, 3));
        assert!(BdTimeEntry::always().matches(59, 23, 31, 11, 6));
    }

    #[test]
    fn test_recompute_dir_status() {
        let mut rec = FraRecord::zeroed();
        rec.max_errors = 3;
        rec.recompute_dir_status();
        assert_eq!(rec.dir_status, NORMAL_STATUS);
        rec.dir_flag = INFO_TIME_REACHED;
        rec.recompute_dir_status();
        assert_eq!(rec.dir_status, INFO_DIR_STATUS);
        rec.dir_flag |= WARN_TIME_REACHED;
        rec.recompute_dir_status();
        assert_eq!(rec.dir_status, WARNING_DIR_STATUS);
        rec.error_counter = 3;
        rec.recompute_dir_status();
        assert_eq!(rec.dir_status, NOT_WORKING_DIR_STATUS);
    }
}
