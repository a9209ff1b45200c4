//! The joined per-file history.

use afd_log::{
    DeleteRecord, DistributionRecord, InputRecord, OutputRecord, ProductionRecord,
};

/// Everything the analyser learned about one file's trip through the
/// pipeline. Any stage may be absent; `outputs` holds every fan-out leg.
#[derive(Debug, Clone, Default)]
pub struct FileHistory {
    pub input: Option<InputRecord>,
    pub distribution: Option<DistributionRecord>,
    pub production: Vec<ProductionRecord>,
    pub outputs: Vec<OutputRecord>,
    pub delete: Option<DeleteRecord>,

    /// Catalog enrichment, when the JID/DNB stores are attached.
    pub recipient: Option<String>,
    pub directory: Option<String>,
    /// Resolved through the FSA for the first output leg's host alias.
    pub real_hostname: Option<String>,
}

impl FileHistory {
    /// The timestamp ordering this history in the emitted stream.
    pub fn primary_time(&self) -> u64 {
        if let Some(i) = &self.input {
            return i.time;
        }
        if let Some(u) = &self.distribution {
            return u.time;
        }
        if let Some(p) = self.production.first() {
            return p.input_time;
        }
        if let Some(o) = self.outputs.first() {
            return o.output_time;
        }
        self.delete.as_ref().map(|d| d.delete_time).unwrap_or(0)
    }

    /// The most specific filename known for the file.
    pub fn filename(&self) -> &str {
        if let Some(i) = &self.input {
            return &i.filename;
        }
        if let Some(u) = &self.distribution {
            return &u.filename;
        }
        if let Some(p) = self.production.first() {
            return &p.original_filename;
        }
        if let Some(o) = self.outputs.first() {
            return &o.local_filename;
        }
        self.delete.as_ref().map(|d| d.filename.as_str()).unwrap_or("")
    }

    pub fn size(&self) -> Option<u64> {
        self.input
            .as_ref()
            .map(|i| i.size)
            .or_else(|| self.distribution.as_ref().map(|u| u.size))
            .or_else(|| self.outputs.first().map(|o| o.size))
            .or_else(|| self.delete.as_ref().map(|d| d.size))
    }

    pub fn dir_id(&self) -> Option<u32> {
        self.input
            .as_ref()
            .map(|i| i.dir_id)
            .or_else(|| self.distribution.as_ref().map(|u| u.dir_id))
            .or_else(|| self.delete.as_ref().map(|d| d.dir_id))
            .or_else(|| self.outputs.first().and_then(|o| o.dir_id))
    }

    pub fn job_ids(&self) -> Vec<u32> {
        if let Some(u) = &self.distribution {
            return u.jobs.iter().map(|(j, _)| *j).collect();
        }
        let mut ids: Vec<u32> = self
            .production
            .iter()
            .map(|p| p.job_id)
            .chain(self.outputs.iter().map(|o| o.job_id))
            .chain(self.delete.iter().map(|d| d.job_id))
            .filter(|&j| j != 0)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
