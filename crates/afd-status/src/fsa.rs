//! Filetransfer Status Area: one record per configured host.

use afd_area::{fixed, AreaRecord};
use bytemuck::{Pod, Zeroable};

pub const MAX_HOSTNAME_LENGTH: usize = 8;
pub const MAX_REAL_HOSTNAME_LENGTH: usize = 69;
pub const MAX_PROXY_NAME_LENGTH: usize = 79;
pub const MAX_TOGGLE_STR_LENGTH: usize = 4;

pub const MIN_TRANSFER_BLOCKSIZE: u32 = 256;
pub const MAX_TRANSFER_BLOCKSIZE: u32 = 8 * 1024 * 1024;
pub const DEFAULT_TRANSFER_BLOCKSIZE: u32 = 4096;
pub const MAX_NO_PARALLEL_JOBS: u32 = 9;
pub const DEFAULT_NO_PARALLEL_JOBS: u32 = 3;
pub const DEFAULT_MAX_ERRORS: u32 = 10;
pub const DEFAULT_RETRY_INTERVAL: u32 = 120;
pub const DEFAULT_TRANSFER_TIMEOUT: u32 = 120;

/// Host toggle positions.
pub const HOST_ONE: u8 = 1;
pub const HOST_TWO: u8 = 2;

/// `host_status` bits.
pub const PAUSE_QUEUE_STAT: u32 = 0x01;
pub const STOP_TRANSFER_STAT: u32 = 0x02;
pub const HOST_CONFIG_HOST_DISABLED: u32 = 0x04;
pub const HOST_NOT_IN_DIR_CONFIG: u32 = 0x08;
pub const HOST_ERROR_ACKNOWLEDGED: u32 = 0x10;
pub const HOST_ERROR_OFFLINE: u32 = 0x20;
pub const HOST_ERROR_OFFLINE_STATIC: u32 = 0x40;
pub const DO_NOT_DELETE_DATA: u32 = 0x80;

/// Union of all defined `host_status` bits.
pub const HOST_STATUS_MASK: u32 = 0xff;

/// The sticky subset that survives a configuration reload.
pub const HOST_STATUS_CARRY_FORWARD: u32 = PAUSE_QUEUE_STAT
    | STOP_TRANSFER_STAT
    | HOST_CONFIG_HOST_DISABLED
    | HOST_NOT_IN_DIR_CONFIG
    | HOST_ERROR_ACKNOWLEDGED
    | HOST_ERROR_OFFLINE
    | HOST_ERROR_OFFLINE_STATIC
    | DO_NOT_DELETE_DATA;

/// `protocol_options` bits (first word).
pub const FTP_PASSIVE_MODE: u32 = 0x01;
pub const SET_IDLE_TIME: u32 = 0x02;
pub const FTP_EXTENDED_MODE: u32 = 0x04;
pub const STAT_KEEPALIVE: u32 = 0x08;
pub const FTP_FAST_MOVE: u32 = 0x10;
pub const FTP_FAST_CD: u32 = 0x20;
pub const FTP_IGNORE_BIN: u32 = 0x40;
pub const USE_SEQUENCE_LOCKING: u32 = 0x80;

/// Legacy `host-status` bits remapped into `protocol_options` when an old
/// style `HOST_CONFIG` line is read.
pub const OLD_FTP_PASSIVE_MODE: u32 = 0x400;
pub const OLD_SET_IDLE_TIME: u32 = 0x800;
pub const OLD_STAT_KEEPALIVE: u32 = 0x1000;
pub const OLD_STATUS_BITS: u32 = OLD_FTP_PASSIVE_MODE | OLD_SET_IDLE_TIME | OLD_STAT_KEEPALIVE;

pub const CURRENT_FSA_VERSION: u8 = 3;

/// One parsed `HOST_CONFIG` line.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfigEntry {
    pub alias: String,
    pub real_hostname: [String; 2],
    pub toggle_str: String,
    pub proxy_name: String,
    pub allowed_transfers: u32,
    pub max_errors: u32,
    pub retry_interval: u32,
    pub block_size: u32,
    pub successful_retries: u32,
    pub file_size_offset: i8,
    pub transfer_timeout: u32,
    pub no_of_no_bursts: u32,
    pub host_status: u32,
    pub protocol_options: u32,
    pub transfer_rate_limit: u64,
    pub ttl: u32,
    pub socksnd_bufsize: u32,
    pub sockrcv_bufsize: u32,
    pub dup_check_timeout: i64,
    pub dup_check_flag: u32,
    pub keep_connected: u32,
    pub warn_time: i64,
    pub protocol_options2: u32,
    /// `true` for a host-group header line (alias only).
    pub group: bool,
}

impl Default for HostConfigEntry {
    fn default() -> Self {
        Self {
            alias: String::new(),
            real_hostname: [String::new(), String::new()],
            toggle_str: String::new(),
            proxy_name: String::new(),
            allowed_transfers: DEFAULT_NO_PARALLEL_JOBS,
            max_errors: DEFAULT_MAX_ERRORS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            block_size: DEFAULT_TRANSFER_BLOCKSIZE,
            successful_retries: 0,
            file_size_offset: -1,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            no_of_no_bursts: 0,
            host_status: 0,
            protocol_options: 0,
            transfer_rate_limit: 0,
            ttl: 0,
            socksnd_bufsize: 0,
            sockrcv_bufsize: 0,
            dup_check_timeout: 0,
            dup_check_flag: 0,
            keep_connected: 0,
            warn_time: 0,
            protocol_options2: 0,
            group: false,
        }
    }
}

/// One FSA record as mapped on disk.
///
/// Layout note: byte fields first, then the 32-bit block, then the 64-bit
/// block, so the struct packs without compiler padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FsaRecord {
    pub host_alias: [u8; MAX_HOSTNAME_LENGTH + 1],
    /// `real_hostname[0][0] == 1` marks a group entry, not a dialable host.
    pub real_hostname: [[u8; MAX_REAL_HOSTNAME_LENGTH + 1]; 2],
    pub host_toggle_str: [u8; MAX_TOGGLE_STR_LENGTH + 1],
    pub proxy_name: [u8; MAX_PROXY_NAME_LENGTH + 1],
    pub host_toggle: u8,
    pub file_size_offset: i8,
    _pad0: [u8; 4],

    pub host_id: u32,
    pub allowed_transfers: u32,
    pub max_errors: u32,
    pub retry_interval: u32,
    pub block_size: u32,
    pub successful_retries: u32,
    pub no_of_no_bursts: u32,
    pub transfer_timeout: u32,
    pub protocol_options: u32,
    pub protocol_options2: u32,
    pub ttl: u32,
    pub socksnd_bufsize: u32,
    pub sockrcv_bufsize: u32,
    pub keep_connected: u32,
    pub dup_check_flag: u32,
    pub host_status: u32,
    pub error_counter: u32,
    pub active_transfers: u32,
    pub connections: u32,
    pub jobs_queued: u32,

    pub transfer_rate_limit: u64,
    pub dup_check_timeout: i64,
    pub warn_time: i64,
    pub last_connection: i64,
    pub bytes_sent: u64,
    pub files_sent: u64,
}

impl AreaRecord for FsaRecord {
    const VERSION: u8 = CURRENT_FSA_VERSION;
}

/// Stable 32-bit identity of a host alias, used for cross-generation
/// matching alongside the alias itself.
pub fn host_id_of(alias: &str) -> u32 {
    // FNV-1a
    let mut h: u32 = 0x811c9dc5;
    for b in alias.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

impl FsaRecord {
    /// Build a record from configuration with all runtime state zeroed.
    ///
    /// Policy values are clamped to their defined bounds; group headers get
    /// the group marker byte and are forced to `HOST_NOT_IN_DIR_CONFIG`.
    pub fn from_config(e: &HostConfigEntry) -> Self {
        let mut rec = Self::zeroed();
        fixed::set(&mut rec.host_alias, &e.alias);
        rec.host_id = host_id_of(fixed::get(&rec.host_alias));
        if e.group {
            rec.real_hostname[0][0] = 1;
            rec.host_status = HOST_NOT_IN_DIR_CONFIG;
            rec.host_toggle = HOST_ONE;
            rec.allowed_transfers = 0;
            rec.block_size = 0;
            return rec;
        }
        fixed::set(&mut rec.real_hostname[0], &e.real_hostname[0]);
        fixed::set(&mut rec.real_hostname[1], &e.real_hostname[1]);
        fixed::set(&mut rec.host_toggle_str, &e.toggle_str);
        fixed::set(&mut rec.proxy_name, &e.proxy_name);
        rec.host_toggle = HOST_ONE;
        rec.file_size_offset = e.file_size_offset;
        rec.allowed_transfers = e.allowed_transfers.clamp(1, MAX_NO_PARALLEL_JOBS);
        rec.max_errors = e.max_errors;
        rec.retry_interval = e.retry_interval;
        rec.block_size = e
            .block_size
            .clamp(MIN_TRANSFER_BLOCKSIZE, MAX_TRANSFER_BLOCKSIZE);
        rec.successful_retries = e.successful_retries;
        rec.transfer_timeout = e.transfer_timeout;
        rec.no_of_no_bursts = e.no_of_no_bursts.min(rec.allowed_transfers);
        rec.protocol_options = e.protocol_options;
        rec.protocol_options2 = e.protocol_options2;
        rec.ttl = e.ttl;
        rec.socksnd_bufsize = e.socksnd_bufsize;
        rec.sockrcv_bufsize = e.sockrcv_bufsize;
        rec.keep_connected = e.keep_connected;
        rec.dup_check_flag = e.dup_check_flag;
        rec.dup_check_timeout = e.dup_check_timeout;
        rec.transfer_rate_limit = e.transfer_rate_limit;
        rec.warn_time = e.warn_time;
        rec.host_status = e.host_status & HOST_STATUS_MASK;
        rec
    }

    pub fn alias(&self) -> &str {
        fixed::get(&self.host_alias)
    }

    pub fn real_hostname(&self, toggle: usize) -> &str {
        fixed::get(&self.real_hostname[toggle & 1])
    }

    pub fn is_group(&self) -> bool {
        self.real_hostname[0][0] == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(alias: &str) -> HostConfigEntry {
        HostConfigEntry {
            alias: alias.to_string(),
            real_hostname: [format!("{alias}.example.org"), String::new()],
            ..Default::default()
        }
    }

    #[test]
    fn test_record_has_no_padding_surprises() {
        // 236 string/byte bytes + 4 pad, 20 u32, 6 u64.
        assert_eq!(std::mem::size_of::<FsaRecord>(), 240 + 80 + 48);
    }

    #[test]
    fn test_from_config_clamps_policy() {
        let mut e = entry("wmo1");
        e.block_size = 7;
        e.allowed_transfers = 50;
        e.no_of_no_bursts = 20;
        let rec = FsaRecord::from_config(&e);
        assert_eq!(rec.block_size, MIN_TRANSFER_BLOCKSIZE);
        assert_eq!(rec.allowed_transfers, MAX_NO_PARALLEL_JOBS);
        assert!(rec.no_of_no_bursts <= rec.allowed_transfers);
    }

    #[test]
    fn test_group_marker() {
        let e = HostConfigEntry {
            alias: "g1".to_string(),
            group: true,
            ..Default::default()
        };
        let rec = FsaRecord::from_config(&e);
        assert!(rec.is_group());
        assert_eq!(rec.host_status, HOST_NOT_IN_DIR_CONFIG);
    }

    #[test]
    fn test_host_status_masked_to_defined_bits() {
        let mut e = entry("h1");
        e.host_status = 0xdead_beef;
        let rec = FsaRecord::from_config(&e);
        assert_eq!(rec.host_status & !HOST_STATUS_MASK, 0);
    }

    #[test]
    fn test_host_id_stable_and_distinct() {
        assert_eq!(host_id_of("ducsfax"), host_id_of("ducsfax"));
        assert_ne!(host_id_of("ducsfax"), host_id_of("ducsfay"));
    }
}
