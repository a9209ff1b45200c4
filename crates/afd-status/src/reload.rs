//! Rebuild of FSA/FRA from configuration with runtime state carried forward.
//!
//! The publish protocol for both tables: build fresh records from the parsed
//! config, merge-read the previous generation to copy each entry's
//! carry-forward set (matched by alias for hosts, by `dir_id` or URL for
//! directories), preserve the area-level feature byte, then publish through
//! the atomic generation rotation of `afd-area`.

use std::path::Path;

use afd_area::paths::{FRA_NAME, FSA_NAME};
use afd_area::{create_area, AreaError, MappedArea, MappedAreaMut};
use thiserror::Error;
use tracing::{debug, info};

use crate::fra::{
    DirConfigEntry, FraRecord, GOVERNED_DIR_OPTIONS, INFO_TIME_REACHED, WARN_TIME_REACHED,
};
use crate::fsa::{FsaRecord, HostConfigEntry, HOST_NOT_IN_DIR_CONFIG, HOST_STATUS_CARRY_FORWARD};

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("area error: {0}")]
    Area(#[from] AreaError),
}

pub type Result<T> = std::result::Result<T, ReloadError>;

/// Notifications raised while reconciling carried-forward directory state.
pub trait ReloadEvents {
    fn info_time_unset(&self, dir_alias: &str) {
        let _ = dir_alias;
    }
    fn warn_time_unset(&self, dir_alias: &str) {
        let _ = dir_alias;
    }
}

/// Default event sink: forwards to the event log via `tracing`.
pub struct LogReloadEvents;

impl ReloadEvents for LogReloadEvents {
    fn info_time_unset(&self, dir_alias: &str) {
        info!(dir_alias, "INFO_TIME_UNSET");
    }
    fn warn_time_unset(&self, dir_alias: &str) {
        info!(dir_alias, "WARN_TIME_UNSET");
    }
}

fn open_previous<R: afd_area::AreaRecord>(fifo_dir: &Path, name: &str) -> Result<Option<MappedArea<R>>> {
    match MappedArea::<R>::open(fifo_dir, name) {
        Ok(area) => Ok(Some(area)),
        Err(AreaError::NoGeneration { .. }) | Err(AreaError::Empty { .. }) => Ok(None),
        Err(AreaError::StaleSuperseded) => {
            // A rotation died between stamping and publishing; rebuild fresh.
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Rebuild the FSA from parsed `HOST_CONFIG` entries.
pub fn build_fsa(fifo_dir: &Path, entries: &[HostConfigEntry]) -> Result<MappedAreaMut<FsaRecord>> {
    let previous = open_previous::<FsaRecord>(fifo_dir, FSA_NAME)?;
    let feature_flags = previous.as_ref().map_or(0, |a| a.header().feature_flags);

    let mut records: Vec<FsaRecord> = entries.iter().map(FsaRecord::from_config).collect();
    if let Some(old_area) = &previous {
        let old = old_area.records()?;
        for rec in records.iter_mut() {
            if let Some(prev) = old.iter().find(|o| o.alias() == rec.alias()) {
                carry_forward_host(prev, rec);
            }
        }
    }
    drop(previous);

    let area = create_area(fifo_dir, FSA_NAME, records.len(), feature_flags, |slots| {
        slots.copy_from_slice(&records);
    })?;
    debug!(hosts = records.len(), generation = area.generation(), "FSA rebuilt");
    Ok(area)
}

fn carry_forward_host(old: &FsaRecord, new: &mut FsaRecord) {
    new.host_status = (new.host_status & !HOST_STATUS_CARRY_FORWARD)
        | (old.host_status & HOST_STATUS_CARRY_FORWARD);
    new.error_counter = old.error_counter;
    new.host_toggle = old.host_toggle;
    new.active_transfers = old.active_transfers;
    new.connections = old.connections;
    new.jobs_queued = old.jobs_queued;
    new.bytes_sent = old.bytes_sent;
    new.files_sent = old.files_sent;
    new.last_connection = old.last_connection;
    if new.is_group() {
        // Group markers are never dialable.
        new.host_status = HOST_NOT_IN_DIR_CONFIG;
    }
}

/// Rebuild the FRA from `DIR_CONFIG`-derived entries.
///
/// `now` is wall time in epoch seconds, used by the info/warn expiry rule.
pub fn build_fra(
    fifo_dir: &Path,
    entries: &[DirConfigEntry],
    events: &dyn ReloadEvents,
    now: i64,
) -> Result<MappedAreaMut<FraRecord>> {
    let previous = open_previous::<FraRecord>(fifo_dir, FRA_NAME)?;
    let feature_flags = previous.as_ref().map_or(0, |a| a.header().feature_flags);

    let mut records: Vec<FraRecord> = entries.iter().map(FraRecord::from_config).collect();
    if let Some(old_area) = &previous {
        let old = old_area.records()?;
        for rec in records.iter_mut() {
            if let Some(prev) = old.iter().find(|o| dir_matches(o, rec)) {
                carry_forward_dir(prev, rec, events, now);
            }
        }
    }
    drop(previous);

    let area = create_area(fifo_dir, FRA_NAME, records.len(), feature_flags, |slots| {
        slots.copy_from_slice(&records);
    })?;
    debug!(dirs = records.len(), generation = area.generation(), "FRA rebuilt");
    Ok(area)
}

/// Cross-generation directory identity: `dir_id` when both sides carry one,
/// URL compared case-insensitively otherwise.
fn dir_matches(old: &FraRecord, new: &FraRecord) -> bool {
    if old.dir_id != 0 && new.dir_id != 0 {
        old.dir_id == new.dir_id
    } else {
        old.url().eq_ignore_ascii_case(new.url())
    }
}

fn carry_forward_dir(old: &FraRecord, new: &mut FraRecord, events: &dyn ReloadEvents, now: i64) {
    new.last_retrieval = old.last_retrieval;
    new.start_event_handle = old.start_event_handle;
    new.end_event_handle = old.end_event_handle;
    new.dir_mtime = old.dir_mtime;
    new.bytes_received = old.bytes_received;
    new.files_received = old.files_received;
    new.files_in_dir = old.files_in_dir;
    new.files_queued = old.files_queued;
    new.bytes_in_dir = old.bytes_in_dir;
    new.bytes_in_queue = old.bytes_in_queue;
    new.dir_status = old.dir_status;
    new.dir_flag = old.dir_flag;
    new.error_counter = old.error_counter;
    new.ate = old.ate;
    new.queued = old.queued;

    // The config wins for governed option bits; anything else (set by
    // runtime tools) is preserved from the old generation.
    let config_bits = new.dir_options & GOVERNED_DIR_OPTIONS;
    new.dir_options = (old.dir_options & !GOVERNED_DIR_OPTIONS) | config_bits;

    expire_time_flags(new, events, now);
}

/// Clear `INFO_TIME_REACHED`/`WARN_TIME_REACHED` when the configured limit
/// is off or no longer exceeded, recomputing `dir_status` and notifying the
/// action subsystem.
fn expire_time_flags(rec: &mut FraRecord, events: &dyn ReloadEvents, now: i64) {
    if rec.dir_flag & INFO_TIME_REACHED != 0
        && (rec.info_time < 1 || now - rec.last_retrieval < rec.info_time)
    {
        rec.dir_flag &= !INFO_TIME_REACHED;
        rec.recompute_dir_status();
        events.info_time_unset(rec.alias());
    }
    if rec.dir_flag & WARN_TIME_REACHED != 0
        && (rec.warn_time < 1 || now - rec.last_retrieval < rec.warn_time)
    {
        rec.dir_flag &= !WARN_TIME_REACHED;
        rec.recompute_dir_status();
        events.warn_time_unset(rec.alias());
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use afd_area::MappedArea;
    use tempfile::TempDir;

    use super::*;
    use crate::fra::{ACCEPT_DOT_FILES, KEEP_PATH, NORMAL_STATUS};
    use crate::fsa::{HOST_CONFIG_HOST_DISABLED, PAUSE_QUEUE_STAT};

    fn host(alias: &str) -> HostConfigEntry {
        HostConfigEntry {
            alias: alias.to_string(),
            real_hostname: [format!("{alias}.example.org"), String::new()],
            ..Default::default()
        }
    }

    fn dir(alias: &str, id: u32) -> DirConfigEntry {
        DirConfigEntry {
            dir_alias: alias.to_string(),
            url: format!("ftp://user@{alias}/pub"),
            dir_id: id,
            ..Default::default()
        }
    }

    #[test]
    fn test_fsa_carry_forward_across_reload() {
        let tmp = TempDir::new().unwrap();
        let entries = vec![host("h1"), host("h2")];
        build_fsa(tmp.path(), &entries).unwrap();

        {
            let mut rw = MappedAreaMut::<FsaRecord>::attach(tmp.path(), "FSA").unwrap();
            let recs = rw.records_mut();
            recs[0].host_status |= PAUSE_QUEUE_STAT | HOST_CONFIG_HOST_DISABLED;
            recs[0].error_counter = 5;
            recs[0].host_toggle = crate::fsa::HOST_TWO;
            recs[1].bytes_sent = 1234;
            rw.flush().unwrap();
        }

        // Reload with the hosts in reverse order: matching is by alias.
        let entries = vec![host("h2"), host("h1")];
        build_fsa(tmp.path(), &entries).unwrap();
        let area = MappedArea::<FsaRecord>::open(tmp.path(), "FSA").unwrap();
        let recs = area.records().unwrap();
        assert_eq!(recs[0].alias(), "h2");
        assert_eq!(recs[0].bytes_sent, 1234);
        assert_eq!(recs[1].alias(), "h1");
        assert!(recs[1].host_status & PAUSE_QUEUE_STAT != 0);
        assert!(recs[1].host_status & HOST_CONFIG_HOST_DISABLED != 0);
        assert_eq!(recs[1].error_counter, 5);
        assert_eq!(recs[1].host_toggle, crate::fsa::HOST_TWO);
    }

    #[test]
    fn test_fsa_carry_forward_idempotent() {
        let tmp = TempDir::new().unwrap();
        let entries = vec![host("h1")];
        build_fsa(tmp.path(), &entries).unwrap();
        {
            let mut rw = MappedAreaMut::<FsaRecord>::attach(tmp.path(), "FSA").unwrap();
            rw.records_mut()[0].error_counter = 3;
            rw.records_mut()[0].host_status |= PAUSE_QUEUE_STAT;
            rw.flush().unwrap();
        }
        build_fsa(tmp.path(), &entries).unwrap();
        let first: FsaRecord = {
            let area = MappedArea::<FsaRecord>::open(tmp.path(), "FSA").unwrap();
            area.records().unwrap()[0]
        };
        build_fsa(tmp.path(), &entries).unwrap();
        let second: FsaRecord = {
            let area = MappedArea::<FsaRecord>::open(tmp.path(), "FSA").unwrap();
            area.records().unwrap()[0]
        };
        assert_eq!(first.host_status, second.host_status);
        assert_eq!(first.error_counter, second.error_counter);
        assert_eq!(first.host_toggle, second.host_toggle);
        assert_eq!(first.bytes_sent, second.bytes_sent);
    }

    #[test]
    fn test_feature_flag_byte_preserved() {
        let tmp = TempDir::new().unwrap();
        build_fsa(tmp.path(), &[host("h1")]).unwrap();
        {
            let mut rw = MappedAreaMut::<FsaRecord>::attach(tmp.path(), "FSA").unwrap();
            rw.header_mut().feature_flags = 0x2a;
            rw.flush().unwrap();
        }
        build_fsa(tmp.path(), &[host("h1")]).unwrap();
        let area = MappedArea::<FsaRecord>::open(tmp.path(), "FSA").unwrap();
        assert_eq!(area.header().feature_flags, 0x2a);
    }

    #[test]
    fn test_dir_option_reconciliation() {
        let tmp = TempDir::new().unwrap();
        let mut d = dir("wx", 42);
        d.accept_dot_files = true;
        build_fra(tmp.path(), &[d.clone()], &LogReloadEvents, 1000).unwrap();
        {
            // A runtime tool sets a non-governed bit and flips a governed one.
            let mut rw = MappedAreaMut::<FraRecord>::attach(tmp.path(), "FRA").unwrap();
            let rec = &mut rw.records_mut()[0];
            rec.dir_options &= !ACCEPT_DOT_FILES;
            rec.dir_options |= 0x8000_0000;
            rw.flush().unwrap();
        }
        // Config still wants dot files accepted and now also keep-path.
        d.keep_path = true;
        build_fra(tmp.path(), &[d], &LogReloadEvents, 1000).unwrap();
        let area = MappedArea::<FraRecord>::open(tmp.path(), "FRA").unwrap();
        let rec = &area.records().unwrap()[0];
        assert!(rec.dir_options & ACCEPT_DOT_FILES != 0);
        assert!(rec.dir_options & KEEP_PATH != 0);
        assert!(rec.dir_options & 0x8000_0000 != 0);
    }

    #[test]
    fn test_fra_matches_by_url_when_dir_id_missing() {
        let tmp = TempDir::new().unwrap();
        let mut d = dir("wx", 0);
        build_fra(tmp.path(), &[d.clone()], &LogReloadEvents, 0).unwrap();
        {
            let mut rw = MappedAreaMut::<FraRecord>::attach(tmp.path(), "FRA").unwrap();
            rw.records_mut()[0].files_received = 77;
            rw.flush().unwrap();
        }
        d.url = d.url.to_uppercase();
        build_fra(tmp.path(), &[d], &LogReloadEvents, 0).unwrap();
        let area = MappedArea::<FraRecord>::open(tmp.path(), "FRA").unwrap();
        assert_eq!(area.records().unwrap()[0].files_received, 77);
    }

    struct Recorder(RefCell<Vec<String>>);
    impl ReloadEvents for Recorder {
        fn info_time_unset(&self, dir_alias: &str) {
            self.0.borrow_mut().push(format!("info:{dir_alias}"));
        }
        fn warn_time_unset(&self, dir_alias: &str) {
            self.0.borrow_mut().push(format!("warn:{dir_alias}"));
        }
    }

    #[test]
    fn test_info_time_expiry_on_reload() {
        let tmp = TempDir::new().unwrap();
        let mut d = dir("wx", 42);
        d.info_time = 3600;
        d.warn_time = 7200;
        build_fra(tmp.path(), &[d.clone()], &LogReloadEvents, 0).unwrap();
        {
            let mut rw = MappedAreaMut::<FraRecord>::attach(tmp.path(), "FRA").unwrap();
            let rec = &mut rw.records_mut()[0];
            rec.dir_flag |= INFO_TIME_REACHED | WARN_TIME_REACHED;
            rec.last_retrieval = 10_000;
            rw.flush().unwrap();
        }
        // Fresh retrieval 100 s ago: both thresholds are no longer exceeded.
        let events = Recorder(RefCell::new(Vec::new()));
        build_fra(tmp.path(), &[d.clone()], &events, 10_100).unwrap();
        let area = MappedArea::<FraRecord>::open(tmp.path(), "FRA").unwrap();
        let rec = &area.records().unwrap()[0];
        assert_eq!(rec.dir_flag & (INFO_TIME_REACHED | WARN_TIME_REACHED), 0);
        assert_eq!(rec.dir_status, NORMAL_STATUS);
        assert_eq!(
            *events.0.borrow(),
            vec!["info:wx".to_string(), "warn:wx".to_string()]
        );

        // With the info threshold still exceeded the flag stays.
        {
            let mut rw = MappedAreaMut::<FraRecord>::attach(tmp.path(), "FRA").unwrap();
            rw.records_mut()[0].dir_flag |= INFO_TIME_REACHED;
            rw.flush().unwrap();
        }
        let events = Recorder(RefCell::new(Vec::new()));
        build_fra(tmp.path(), &[d], &events, 20_000).unwrap();
        let area = MappedArea::<FraRecord>::open(tmp.path(), "FRA").unwrap();
        assert!(area.records().unwrap()[0].dir_flag & INFO_TIME_REACHED != 0);
        assert!(events.0.borrow().is_empty());
    }
}
