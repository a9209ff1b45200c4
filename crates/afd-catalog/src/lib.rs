//! # afd-catalog
//!
//! The job identity catalog (JID), directory-name buffer (DNB) and
//! file-mask store. These resolve the 32-bit `job_id`/`dir_id` tokens that
//! appear in every log record back to the configuration that produced
//! them: recipient URL, priority, file masks, local and standard options.
//!
//! All three stores are mapped areas produced by the directory-config
//! evaluation; everyone else attaches read-only.

pub mod filter;

pub use filter::{match_chain, pmatch, FilterMatch};

use std::cell::Cell;
use std::path::Path;

use afd_area::paths::{DNB_NAME, FMD_NAME, JID_NAME};
use afd_area::{create_area, fixed, AreaError, AreaRecord, MappedArea};
use bytemuck::{Pod, Zeroable};
use thiserror::Error;
use tracing::warn;

pub const MAX_RECIPIENT_LENGTH: usize = 255;
pub const MAX_OPTION_LENGTH: usize = 255;
pub const MAX_PATH_LENGTH: usize = 1023;
pub const MAX_MASK_BUF_LENGTH: usize = 511;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("area error: {0}")]
    Area(#[from] AreaError),

    #[error("job {job_id:#x} references unknown directory position {pos}")]
    BadDirPos { job_id: u32, pos: u32 },
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// One `job_id_data` record as mapped on disk.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct JobRecord {
    pub recipient: [u8; MAX_RECIPIENT_LENGTH + 1],
    /// AMG local options, NUL-separated entries.
    pub loptions: [u8; MAX_OPTION_LENGTH + 1],
    /// FD standard options, newline-joined text.
    pub soptions: [u8; MAX_OPTION_LENGTH + 1],
    pub job_id: u32,
    pub dir_id: u32,
    /// Position of this job's directory in the DNB.
    pub dir_id_pos: u32,
    pub file_mask_id: u32,
    pub no_of_loptions: u32,
    pub no_of_soptions: u32,
    pub priority: u32,
    _pad: u32,
}

impl AreaRecord for JobRecord {
    const VERSION: u8 = 2;
}

/// One `dir_name_buf` record: directory id paired with its absolute path.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DirNameRecord {
    pub dir_name: [u8; MAX_PATH_LENGTH + 1],
    pub dir_id: u32,
    _pad: u32,
}

impl AreaRecord for DirNameRecord {
    const VERSION: u8 = 1;
}

/// One file-mask record: the NUL-separated masks a `file_mask_id` names.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct FileMaskRecord {
    pub masks: [u8; MAX_MASK_BUF_LENGTH + 1],
    pub file_mask_id: u32,
    pub nr_of_masks: u32,
}

impl AreaRecord for FileMaskRecord {
    const VERSION: u8 = 1;
}

/// Iterator over a NUL-separated option stream.
pub struct LocalOptions<'a> {
    buf: &'a [u8],
    remaining: u32,
}

impl<'a> Iterator for LocalOptions<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.remaining == 0 || self.buf.is_empty() {
            return None;
        }
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.buf.len());
        let entry = std::str::from_utf8(&self.buf[..end]).unwrap_or("");
        self.buf = if end < self.buf.len() {
            &self.buf[end + 1..]
        } else {
            &[]
        };
        self.remaining -= 1;
        Some(entry)
    }
}

/// Structural view of one job record.
#[derive(Clone, Copy, Debug)]
pub struct JobView<'a> {
    rec: &'a JobRecord,
}

impl<'a> JobView<'a> {
    pub fn job_id(&self) -> u32 {
        self.rec.job_id
    }

    pub fn dir_id(&self) -> u32 {
        self.rec.dir_id
    }

    pub fn dir_id_pos(&self) -> u32 {
        self.rec.dir_id_pos
    }

    pub fn file_mask_id(&self) -> u32 {
        self.rec.file_mask_id
    }

    pub fn priority(&self) -> u32 {
        self.rec.priority
    }

    pub fn recipient(&self) -> &'a str {
        fixed::get(&self.rec.recipient)
    }

    /// Iterate the AMG local options.
    pub fn loptions(&self) -> LocalOptions<'a> {
        LocalOptions {
            buf: &self.rec.loptions,
            remaining: self.rec.no_of_loptions,
        }
    }

    /// The FD standard options as a newline-joined text block.
    pub fn soptions(&self) -> &'a str {
        fixed::get(&self.rec.soptions)
    }
}

/// View of one directory-name entry.
#[derive(Clone, Copy)]
pub struct DirView<'a> {
    rec: &'a DirNameRecord,
    pub pos: usize,
}

impl<'a> DirView<'a> {
    pub fn dir_id(&self) -> u32 {
        self.rec.dir_id
    }

    pub fn dir_name(&self) -> &'a str {
        fixed::get(&self.rec.dir_name)
    }
}

/// Read-only attachment to the JID/DNB/file-mask stores.
///
/// The file-mask store is optional: without it, filename resolution matches
/// nothing and enrichment proceeds partially.
pub struct Catalog {
    jid: MappedArea<JobRecord>,
    dnb: MappedArea<DirNameRecord>,
    fmd: Option<MappedArea<FileMaskRecord>>,
    last_job_hit: Cell<usize>,
}

impl Catalog {
    pub fn open<P: AsRef<Path>>(fifo_dir: P) -> Result<Self> {
        let fifo_dir = fifo_dir.as_ref();
        let jid = MappedArea::open(fifo_dir, JID_NAME)?;
        let dnb = MappedArea::open(fifo_dir, DNB_NAME)?;
        let fmd = match MappedArea::open(fifo_dir, FMD_NAME) {
            Ok(area) => Some(area),
            Err(AreaError::NoGeneration { .. }) | Err(AreaError::Empty { .. }) => {
                warn!("no file-mask store, filename resolution disabled");
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            jid,
            dnb,
            fmd,
            last_job_hit: Cell::new(0),
        })
    }

    /// Linear scan with a validated last-hit position hint.
    pub fn lookup_job(&self, job_id: u32) -> Result<Option<JobView<'_>>> {
        let records = self.jid.records()?;
        let hint = self.last_job_hit.get();
        if let Some(rec) = records.get(hint) {
            if rec.job_id == job_id {
                return Ok(Some(JobView { rec }));
            }
        }
        match records.iter().position(|r| r.job_id == job_id) {
            Some(pos) => {
                self.last_job_hit.set(pos);
                Ok(Some(JobView { rec: &records[pos] }))
            }
            None => Ok(None),
        }
    }

    pub fn lookup_dir(&self, dir_id: u32) -> Result<Option<DirView<'_>>> {
        let records = self.dnb.records()?;
        Ok(records
            .iter()
            .position(|r| r.dir_id == dir_id)
            .map(|pos| DirView {
                rec: &records[pos],
                pos,
            }))
    }

    /// Direct array access via the `dir_id_pos` shortcut stored in jobs.
    pub fn lookup_dir_by_pos(&self, pos: u32) -> Result<Option<DirView<'_>>> {
        let records = self.dnb.records()?;
        Ok(records.get(pos as usize).map(|rec| DirView {
            rec,
            pos: pos as usize,
        }))
    }

    /// All jobs of `dir_id` whose mask chain selects `filename`.
    ///
    /// An `Exclude` short-circuits that job's chain; other jobs still get
    /// their chance.
    pub fn resolve_by_filename(&self, dir_id: u32, filename: &str) -> Result<Vec<JobView<'_>>> {
        let records = self.jid.records()?;
        let mut hits = Vec::new();
        for rec in records.iter().filter(|r| r.dir_id == dir_id) {
            let Some(masks) = self.masks_for(rec.file_mask_id)? else {
                continue;
            };
            if match_chain(masks, filename) {
                hits.push(JobView { rec });
            }
        }
        Ok(hits)
    }

    fn masks_for(&self, file_mask_id: u32) -> Result<Option<LocalOptions<'_>>> {
        let Some(fmd) = &self.fmd else {
            return Ok(None);
        };
        let records = fmd.records()?;
        Ok(records
            .iter()
            .find(|r| r.file_mask_id == file_mask_id)
            .map(|r| LocalOptions {
                buf: &r.masks,
                remaining: r.nr_of_masks,
            }))
    }

    /// Check the `dnb[jd.dir_id_pos].dir_id == jd.dir_id` invariant for
    /// every job.
    pub fn verify(&self) -> Result<()> {
        let jobs = self.jid.records()?;
        let dirs = self.dnb.records()?;
        for job in jobs {
            match dirs.get(job.dir_id_pos as usize) {
                Some(d) if d.dir_id == job.dir_id => {}
                _ => {
                    return Err(CatalogError::BadDirPos {
                        job_id: job.job_id,
                        pos: job.dir_id_pos,
                    })
                }
            }
        }
        Ok(())
    }

    /// Remap any store whose generation was superseded.
    pub fn reopen_if_stale(&mut self) -> Result<bool> {
        let mut reopened = self.jid.reopen_if_stale()?;
        reopened |= self.dnb.reopen_if_stale()?;
        if let Some(fmd) = &mut self.fmd {
            reopened |= fmd.reopen_if_stale()?;
        }
        if reopened {
            self.last_job_hit.set(0);
        }
        Ok(reopened)
    }
}

/// Producer-side description of one job, before packing.
#[derive(Debug, Clone, Default)]
pub struct JobEntry {
    pub job_id: u32,
    pub dir_id: u32,
    pub priority: u32,
    pub file_mask_id: u32,
    pub recipient: String,
    pub loptions: Vec<String>,
    pub soptions: Vec<String>,
}

/// Writes the three catalog stores; the producer is the directory-config
/// evaluation, tests use it to seed fixtures.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    dirs: Vec<(u32, String)>,
    masks: Vec<(u32, Vec<String>)>,
    jobs: Vec<JobEntry>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&mut self, dir_id: u32, dir_name: &str) -> &mut Self {
        self.dirs.push((dir_id, dir_name.to_string()));
        self
    }

    pub fn add_masks(&mut self, file_mask_id: u32, masks: &[&str]) -> &mut Self {
        self.masks
            .push((file_mask_id, masks.iter().map(|m| m.to_string()).collect()));
        self
    }

    pub fn add_job(&mut self, job: JobEntry) -> &mut Self {
        self.jobs.push(job);
        self
    }

    pub fn write<P: AsRef<Path>>(&self, fifo_dir: P) -> Result<()> {
        let fifo_dir = fifo_dir.as_ref();

        let dirs = self.dirs.clone();
        create_area::<DirNameRecord, _, _>(fifo_dir, DNB_NAME, dirs.len(), 0, |slots| {
            for (slot, (dir_id, name)) in slots.iter_mut().zip(&dirs) {
                slot.dir_id = *dir_id;
                fixed::set(&mut slot.dir_name, name);
            }
        })?;

        let masks = self.masks.clone();
        create_area::<FileMaskRecord, _, _>(fifo_dir, FMD_NAME, masks.len(), 0, |slots| {
            for (slot, (id, list)) in slots.iter_mut().zip(&masks) {
                slot.file_mask_id = *id;
                slot.nr_of_masks = list.len() as u32;
                pack_nul_separated(&mut slot.masks, list);
            }
        })?;

        let jobs = self.jobs.clone();
        let dir_pos = |dir_id: u32| dirs.iter().position(|(id, _)| *id == dir_id);
        for job in &jobs {
            if dir_pos(job.dir_id).is_none() {
                return Err(CatalogError::BadDirPos {
                    job_id: job.job_id,
                    pos: u32::MAX,
                });
            }
        }
        create_area::<JobRecord, _, _>(fifo_dir, JID_NAME, jobs.len(), 0, |slots| {
            for (slot, job) in slots.iter_mut().zip(&jobs) {
                slot.job_id = job.job_id;
                slot.dir_id = job.dir_id;
                slot.dir_id_pos = dir_pos(job.dir_id).unwrap() as u32;
                slot.priority = job.priority;
                slot.file_mask_id = job.file_mask_id;
                fixed::set(&mut slot.recipient, &job.recipient);
                slot.no_of_loptions = job.loptions.len() as u32;
                pack_nul_separated(&mut slot.loptions, &job.loptions);
                slot.no_of_soptions = job.soptions.len() as u32;
                fixed::set(&mut slot.soptions, &job.soptions.join("\n"));
            }
        })?;
        Ok(())
    }
}

fn pack_nul_separated(buf: &mut [u8], entries: &[String]) {
    let mut off = 0;
    for entry in entries {
        let bytes = entry.as_bytes();
        if off + bytes.len() + 1 > buf.len() {
            break;
        }
        buf[off..off + bytes.len()].copy_from_slice(bytes);
        off += bytes.len() + 1; // NUL separator stays zero
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn seed(tmp: &TempDir) -> Catalog {
        let mut b = CatalogBuilder::new();
        b.add_dir(0x12ab, "/data/in/wmo")
            .add_dir(0x77, "/data/in/other")
            .add_masks(1, &["*.dat", "!*.tmp"])
            .add_masks(2, &["!secret*", "*"])
            .add_job(JobEntry {
                job_id: 3,
                dir_id: 0x12ab,
                priority: 5,
                file_mask_id: 1,
                recipient: "ftp://anonymous@ducsfax//pub".to_string(),
                loptions: vec!["rename a.* b.*".to_string(), "exec bzip2 %s".to_string()],
                soptions: vec!["age-limit 3600".to_string(), "archive 7".to_string()],
            })
            .add_job(JobEntry {
                job_id: 9,
                dir_id: 0x12ab,
                priority: 9,
                file_mask_id: 2,
                recipient: "sftp://afd@backup//srv".to_string(),
                ..Default::default()
            })
            .write(tmp.path())
            .unwrap();
        Catalog::open(tmp.path()).unwrap()
    }

    #[test]
    fn test_lookup_job_and_views() {
        let tmp = TempDir::new().unwrap();
        let cat = seed(&tmp);
        let job = cat.lookup_job(3).unwrap().expect("job 3");
        assert_eq!(job.recipient(), "ftp://anonymous@ducsfax//pub");
        assert_eq!(job.priority(), 5);
        let lopts: Vec<&str> = job.loptions().collect();
        assert_eq!(lopts, vec!["rename a.* b.*", "exec bzip2 %s"]);
        assert_eq!(job.soptions(), "age-limit 3600\narchive 7");
        assert!(cat.lookup_job(999).unwrap().is_none());
        // Second lookup hits the position cache.
        assert_eq!(cat.lookup_job(3).unwrap().unwrap().job_id(), 3);
    }

    #[test]
    fn test_dir_lookups_and_invariant() {
        let tmp = TempDir::new().unwrap();
        let cat = seed(&tmp);
        cat.verify().unwrap();
        let dir = cat.lookup_dir(0x12ab).unwrap().expect("dir");
        assert_eq!(dir.dir_name(), "/data/in/wmo");
        let by_pos = cat
            .lookup_dir_by_pos(dir.pos as u32)
            .unwrap()
            .expect("by pos");
        assert_eq!(by_pos.dir_id(), 0x12ab);
        assert!(cat.lookup_dir(0xdead).unwrap().is_none());
    }

    #[test]
    fn test_resolve_by_filename() {
        let tmp = TempDir::new().unwrap();
        let cat = seed(&tmp);
        // a.dat matches job 3 (*.dat) and job 9 (catch-all).
        let jobs = cat.resolve_by_filename(0x12ab, "a.dat").unwrap();
        let ids: Vec<u32> = jobs.iter().map(|j| j.job_id()).collect();
        assert_eq!(ids, vec![3, 9]);
        // secret.dat is excluded from job 9 but still matches job 3.
        let jobs = cat.resolve_by_filename(0x12ab, "secret.dat").unwrap();
        let ids: Vec<u32> = jobs.iter().map(|j| j.job_id()).collect();
        assert_eq!(ids, vec![3]);
        // x.tmp relates to no mask of job 3 and is caught by job 9.
        let jobs = cat.resolve_by_filename(0x12ab, "x.tmp").unwrap();
        let ids: Vec<u32> = jobs.iter().map(|j| j.job_id()).collect();
        assert_eq!(ids, vec![9]);
        assert!(cat.resolve_by_filename(0x77, "a.dat").unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_mask_store_is_partial() {
        let tmp = TempDir::new().unwrap();
        let mut b = CatalogBuilder::new();
        b.add_dir(1, "/in").add_job(JobEntry {
            job_id: 1,
            dir_id: 1,
            ..Default::default()
        });
        b.write(tmp.path()).unwrap();
        // Remove the file-mask store before opening.
        for entry in std::fs::read_dir(tmp.path()).unwrap() {
            let p = entry.unwrap().path();
            if p.file_name().unwrap().to_string_lossy().starts_with("FILE_MASK_DATA") {
                std::fs::remove_file(p).unwrap();
            }
        }
        let cat = Catalog::open(tmp.path()).unwrap();
        assert!(cat.lookup_job(1).unwrap().is_some());
        assert!(cat.resolve_by_filename(1, "a.dat").unwrap().is_empty());
    }

    #[test]
    fn test_builder_rejects_unknown_dir() {
        let tmp = TempDir::new().unwrap();
        let mut b = CatalogBuilder::new();
        b.add_job(JobEntry {
            job_id: 1,
            dir_id: 5,
            ..Default::default()
        });
        assert!(matches!(
            b.write(tmp.path()).unwrap_err(),
            CatalogError::BadDirPos { job_id: 1, .. }
        ));
    }

    #[test]
    fn test_reopen_after_catalog_rewrite() {
        let tmp = TempDir::new().unwrap();
        let mut cat = seed(&tmp);
        assert!(cat.lookup_job(3).unwrap().is_some());
        // Rewrite with a different job set.
        let mut b = CatalogBuilder::new();
        b.add_dir(0x12ab, "/data/in/wmo").add_job(JobEntry {
            job_id: 11,
            dir_id: 0x12ab,
            ..Default::default()
        });
        b.write(tmp.path()).unwrap();
        assert!(matches!(
            cat.lookup_job(3).unwrap_err(),
            CatalogError::Area(AreaError::StaleSuperseded)
        ));
        assert!(cat.reopen_if_stale().unwrap());
        assert!(cat.lookup_job(11).unwrap().is_some());
        assert!(cat.lookup_job(3).unwrap().is_none());
    }
}
