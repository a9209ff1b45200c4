//! `HOST_CONFIG` reader and writer.
//!
//! The file is newline-delimited with colon-separated fields per host, in
//! the order: alias, real-hostname-1, real-hostname-2, toggle-string, proxy,
//! allowed-transfers, max-errors, retry-interval, block-size,
//! successful-retries, file-size-offset, transfer-timeout, no-bursts,
//! host-status, protocol-options, transfer-rate-limit, ttl, socksnd-bufsize,
//! sockrcv-bufsize, dup-check-timeout, dup-check-flag, keep-connected,
//! warn-time, protocol-options-2. A line carrying the alias alone declares a
//! host group. Malformed data never aborts the parse: fields are truncated
//! or clamped with a warning, and a non-numeric byte in a numeric field
//! resets the rest of that record to defaults.

use std::io;
use std::path::Path;

use tracing::warn;

use crate::fsa::{
    HostConfigEntry, MAX_HOSTNAME_LENGTH, MAX_NO_PARALLEL_JOBS, MAX_PROXY_NAME_LENGTH,
    MAX_REAL_HOSTNAME_LENGTH, MAX_TOGGLE_STR_LENGTH, MAX_TRANSFER_BLOCKSIZE,
    MIN_TRANSFER_BLOCKSIZE, OLD_FTP_PASSIVE_MODE, OLD_SET_IDLE_TIME, OLD_STAT_KEEPALIVE,
    OLD_STATUS_BITS, FTP_PASSIVE_MODE, SET_IDLE_TIME, STAT_KEEPALIVE,
};

/// Result of parsing a `HOST_CONFIG` file.
#[derive(Debug, Clone, Default)]
pub struct HostConfigParse {
    pub entries: Vec<HostConfigEntry>,
    /// Count of data-quality warnings (truncations, clamps, bad numerics).
    pub warnings: u32,
    /// Set whenever any line needed repair; the file is still accepted.
    pub had_errors: bool,
}

/// Read and parse `HOST_CONFIG`.
///
/// A missing file is not an error: the caller creates one after the
/// `DIR_CONFIG` evaluation, so `Ok(None)` is returned.
pub fn read_host_config(path: &Path) -> io::Result<Option<HostConfigParse>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(parse_host_config(&text))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parse `HOST_CONFIG` text. Never fails; see [`HostConfigParse`].
pub fn parse_host_config(text: &str) -> HostConfigParse {
    let mut out = HostConfigParse::default();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry = parse_line(line, lineno + 1, &mut out);
        out.entries.push(entry);
    }
    out
}

struct FieldCursor<'a> {
    fields: std::str::Split<'a, char>,
}

impl<'a> FieldCursor<'a> {
    fn next(&mut self) -> Option<&'a str> {
        self.fields.next()
    }
}

fn parse_line(line: &str, lineno: usize, out: &mut HostConfigParse) -> HostConfigEntry {
    let mut entry = HostConfigEntry::default();

    if !line.contains(':') {
        // Group header: alias only.
        entry.alias = take_string(line, MAX_HOSTNAME_LENGTH, "alias", lineno, out);
        entry.group = true;
        return entry;
    }

    let mut cur = FieldCursor {
        fields: line.split(':'),
    };

    entry.alias = take_string(
        cur.next().unwrap_or(""),
        MAX_HOSTNAME_LENGTH,
        "alias",
        lineno,
        out,
    );
    if let Some(f) = cur.next() {
        entry.real_hostname[0] =
            take_string(f, MAX_REAL_HOSTNAME_LENGTH, "real-hostname-1", lineno, out);
    }
    if let Some(f) = cur.next() {
        entry.real_hostname[1] =
            take_string(f, MAX_REAL_HOSTNAME_LENGTH, "real-hostname-2", lineno, out);
    }
    if let Some(f) = cur.next() {
        entry.toggle_str = take_string(f, MAX_TOGGLE_STR_LENGTH, "toggle-string", lineno, out);
        if !entry.toggle_str.is_empty() && entry.toggle_str.len() != MAX_TOGGLE_STR_LENGTH {
            warn!(lineno, value = %entry.toggle_str, "toggle string must be empty or 4 characters");
            out.warnings += 1;
            out.had_errors = true;
            entry.toggle_str.clear();
        }
    }
    if let Some(f) = cur.next() {
        entry.proxy_name = take_string(f, MAX_PROXY_NAME_LENGTH, "proxy", lineno, out);
    }

    // Numeric fields. The first non-numeric byte re-initialises the record
    // to defaults from that field on and skips the remainder of the line.
    let defaults = HostConfigEntry::default();
    let mut saw_no_bursts = false;
    let numeric_ok = (|| -> Option<()> {
        entry.allowed_transfers = take_u32(&mut cur, defaults.allowed_transfers, lineno, out)?;
        entry.max_errors = take_u32(&mut cur, defaults.max_errors, lineno, out)?;
        entry.retry_interval = take_u32(&mut cur, defaults.retry_interval, lineno, out)?;
        entry.block_size = take_u32(&mut cur, defaults.block_size, lineno, out)?;
        entry.successful_retries = take_u32(&mut cur, defaults.successful_retries, lineno, out)?;
        entry.file_size_offset = take_i8(&mut cur, defaults.file_size_offset, lineno, out)?;
        entry.transfer_timeout = take_u32(&mut cur, defaults.transfer_timeout, lineno, out)?;
        entry.no_of_no_bursts = take_u32(&mut cur, defaults.no_of_no_bursts, lineno, out)?;
        saw_no_bursts = true;
        entry.host_status = take_u32(&mut cur, defaults.host_status, lineno, out)?;
        entry.protocol_options = take_u32(&mut cur, defaults.protocol_options, lineno, out)?;
        entry.transfer_rate_limit = take_u64(&mut cur, defaults.transfer_rate_limit, lineno, out)?;
        entry.ttl = take_u32(&mut cur, defaults.ttl, lineno, out)?;
        entry.socksnd_bufsize = take_u32(&mut cur, defaults.socksnd_bufsize, lineno, out)?;
        entry.sockrcv_bufsize = take_u32(&mut cur, defaults.sockrcv_bufsize, lineno, out)?;
        entry.dup_check_timeout = take_i64(&mut cur, defaults.dup_check_timeout, lineno, out)?;
        entry.dup_check_flag = take_u32(&mut cur, defaults.dup_check_flag, lineno, out)?;
        entry.keep_connected = take_u32(&mut cur, defaults.keep_connected, lineno, out)?;
        entry.warn_time = take_i64(&mut cur, defaults.warn_time, lineno, out)?;
        entry.protocol_options2 = take_u32(&mut cur, defaults.protocol_options2, lineno, out)?;
        Some(())
    })()
    .is_some();

    // Legacy compatibility: old files stop after no-bursts or carry the
    // combined single-field host-status whose upper bits were protocol
    // options. Remap those bits into protocol_options.
    if numeric_ok || saw_no_bursts {
        if entry.host_status & OLD_STATUS_BITS != 0 {
            if entry.host_status & OLD_FTP_PASSIVE_MODE != 0 {
                entry.protocol_options |= FTP_PASSIVE_MODE;
            }
            if entry.host_status & OLD_SET_IDLE_TIME != 0 {
                entry.protocol_options |= SET_IDLE_TIME;
            }
            if entry.host_status & OLD_STAT_KEEPALIVE != 0 {
                entry.protocol_options |= STAT_KEEPALIVE;
            }
            entry.host_status &= !OLD_STATUS_BITS;
            warn!(lineno, "remapped legacy host-status protocol bits");
            out.warnings += 1;
        }
    }

    clamp(&mut entry, lineno, out);
    entry
}

fn take_string(
    raw: &str,
    max: usize,
    field: &str,
    lineno: usize,
    out: &mut HostConfigParse,
) -> String {
    if raw.len() > max {
        warn!(lineno, field, len = raw.len(), max, "field truncated");
        out.warnings += 1;
        out.had_errors = true;
        let mut n = max;
        while n > 0 && !raw.is_char_boundary(n) {
            n -= 1;
        }
        raw[..n].to_string()
    } else {
        raw.to_string()
    }
}

fn bad_numeric(raw: &str, lineno: usize, out: &mut HostConfigParse) {
    warn!(lineno, value = raw, "non-numeric byte in numeric field, record reset from here");
    out.warnings += 1;
    out.had_errors = true;
}

macro_rules! take_numeric {
    ($name:ident, $ty:ty) => {
        fn $name(
            cur: &mut FieldCursor<'_>,
            default: $ty,
            lineno: usize,
            out: &mut HostConfigParse,
        ) -> Option<$ty> {
            match cur.next() {
                None => Some(default),
                Some("") => Some(default),
                Some(raw) => match raw.trim().parse::<$ty>() {
                    Ok(v) => Some(v),
                    Err(_) => {
                        bad_numeric(raw, lineno, out);
                        None
                    }
                },
            }
        }
    };
}

take_numeric!(take_u32, u32);
take_numeric!(take_u64, u64);
take_numeric!(take_i64, i64);
take_numeric!(take_i8, i8);

fn clamp(entry: &mut HostConfigEntry, lineno: usize, out: &mut HostConfigParse) {
    if entry.allowed_transfers == 0 || entry.allowed_transfers > MAX_NO_PARALLEL_JOBS {
        warn!(
            lineno,
            value = entry.allowed_transfers,
            "allowed-transfers out of range, clamped"
        );
        out.warnings += 1;
        entry.allowed_transfers = entry.allowed_transfers.clamp(1, MAX_NO_PARALLEL_JOBS);
    }
    if entry.block_size < MIN_TRANSFER_BLOCKSIZE || entry.block_size > MAX_TRANSFER_BLOCKSIZE {
        warn!(lineno, value = entry.block_size, "block-size out of range, clamped");
        out.warnings += 1;
        entry.block_size = entry
            .block_size
            .clamp(MIN_TRANSFER_BLOCKSIZE, MAX_TRANSFER_BLOCKSIZE);
    }
    if entry.no_of_no_bursts > entry.allowed_transfers {
        warn!(
            lineno,
            value = entry.no_of_no_bursts,
            "no-bursts exceeds allowed-transfers, clamped"
        );
        out.warnings += 1;
        entry.no_of_no_bursts = entry.allowed_transfers;
    }
}

/// Regenerate `HOST_CONFIG` from entries, e.g. after first-time FSA
/// creation when no file existed yet.
pub fn write_host_config(path: &Path, entries: &[HostConfigEntry]) -> io::Result<()> {
    use std::io::Write;

    let mut f = std::fs::File::create(path)?;
    writeln!(f, "# HOST_CONFIG")?;
    writeln!(
        f,
        "# AH:HN1:HN2:HT:PXY:AT:ME:RI:TB:SR:FSO:TT:NB:HS:PO:TRL:TTL:SSB:SRB:DT:DF:KC:WT:PO2"
    )?;
    for e in entries {
        if e.group {
            writeln!(f, "{}", e.alias)?;
            continue;
        }
        writeln!(
            f,
            "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            e.alias,
            e.real_hostname[0],
            e.real_hostname[1],
            e.toggle_str,
            e.proxy_name,
            e.allowed_transfers,
            e.max_errors,
            e.retry_interval,
            e.block_size,
            e.successful_retries,
            e.file_size_offset,
            e.transfer_timeout,
            e.no_of_no_bursts,
            e.host_status,
            e.protocol_options,
            e.transfer_rate_limit,
            e.ttl,
            e.socksnd_bufsize,
            e.sockrcv_bufsize,
            e.dup_check_timeout,
            e.dup_check_flag,
            e.keep_connected,
            e.warn_time,
            e.protocol_options2,
        )?;
    }
    f.sync_data()?;
    Ok(())
}
