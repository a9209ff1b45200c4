//! Cross-category join.
//!
//! The primary record stream is drawn from the leftmost enabled category
//! in pipeline order. For every primary the analyser searches the other
//! enabled categories' position caches within `max_diff_time` of the
//! primary's timestamp, using the key precedence
//! `(dir_id, input_time, unique_number)` then
//! `(job_id, input_time, unique_number, split_job_counter)` then the bare
//! filename. Joined rows are marked gotcha and never emitted twice.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use afd_area::{paths, MappedArea};
use afd_catalog::Catalog;
use afd_status::FsaRecord;
use afd_log::record::{
    AGE_INPUT, DUP_INPUT, HOST_DISABLED,
};
use afd_log::{
    DeleteRecord, DistributionRecord, DistributionType, InputRecord, LogCategory, LogRecord,
    OutputRecord, ProductionRecord,
};

use crate::cli::Options;
use crate::cursor::{load_fleet, read_records, FollowedLog, LogCache};
use crate::filters::Filters;
use crate::history::FileHistory;
use crate::Result;

/// Counters reported after a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub primaries: usize,
    pub emitted: usize,
    /// Set when `max_search_time` stopped the run before the window was
    /// exhausted.
    pub stopped_early: bool,
}

/// One record of the primary category.
#[derive(Debug, Clone)]
enum Primary {
    Input(InputRecord),
    Distribution(DistributionRecord),
    Production(ProductionRecord),
    Output(OutputRecord),
    Delete(DeleteRecord),
}

impl Primary {
    fn time(&self) -> u64 {
        match self {
            Primary::Input(r) => r.log_time(),
            Primary::Distribution(r) => r.log_time(),
            Primary::Production(r) => r.log_time(),
            Primary::Output(r) => r.log_time(),
            Primary::Delete(r) => r.log_time(),
        }
    }
}

pub struct Analyzer {
    /// Local log directory first, then one mirror directory per monitored
    /// remote AFD found under `remote_log/`.
    log_dirs: Vec<PathBuf>,
    categories: Vec<LogCategory>,
    max_diff_time: u64,
    max_search_time: Option<u64>,
    max_log_files: usize,
    filters: Filters,
    catalog: Option<Catalog>,
    fsa: Option<MappedArea<FsaRecord>>,

    /// End offset of the local live file per category, captured by the
    /// last one-shot scan. Indexed by `LogCategory as usize`.
    live_end: [u64; 5],

    input: LogCache<InputRecord>,
    dist: LogCache<DistributionRecord>,
    prod: LogCache<ProductionRecord>,
    output: LogCache<OutputRecord>,
    delete: LogCache<DeleteRecord>,
}

impl Analyzer {
    /// Attach to a working directory. A missing or unreadable catalog or
    /// FSA is tolerated; histories then go un-enriched. Log trees mirrored
    /// from monitored remote AFDs under `remote_log/<alias>/` are merged
    /// into every one-shot scan.
    pub fn open(work_dir: &Path, opts: &Options, filters: Filters) -> Self {
        let catalog = match Catalog::open(paths::fifo_dir(work_dir)) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "catalog unavailable, histories will not be enriched");
                None
            }
        };
        let fsa: Option<MappedArea<FsaRecord>> =
            MappedArea::open(paths::fifo_dir(work_dir), paths::FSA_NAME).ok();
        let mut log_dirs = vec![paths::log_dir(work_dir)];
        if let Ok(entries) = std::fs::read_dir(work_dir.join(paths::REMOTE_LOG_DIR)) {
            let mut aliases: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .filter_map(|e| e.file_name().into_string().ok())
                .collect();
            aliases.sort();
            if !aliases.is_empty() {
                info!(remotes = aliases.len(), "merging remote AFD log trees");
            }
            for alias in &aliases {
                log_dirs.push(paths::remote_log_dir(work_dir, alias));
            }
        }
        let n = opts.max_log_files;
        Self {
            log_dirs,
            categories: opts.categories.clone(),
            max_diff_time: opts.max_diff_time,
            max_search_time: opts.max_search_time,
            max_log_files: n,
            filters,
            catalog,
            fsa,
            live_end: [0; 5],
            input: LogCache::new(n),
            dist: LogCache::new(n),
            prod: LogCache::new(n),
            output: LogCache::new(n),
            delete: LogCache::new(n),
        }
    }

    fn enabled(&self, cat: LogCategory) -> bool {
        self.categories.contains(&cat)
    }

    fn primary_category(&self) -> Option<LogCategory> {
        self.categories.first().copied()
    }

    /// Load every enabled secondary category's fleet, widened by the join
    /// tolerance on both sides. Remote mirror trees are merged in after
    /// the local fleet.
    fn load_caches(&mut self, start: u64, end: u64) -> Result<()> {
        let min = start.saturating_sub(self.max_diff_time);
        let max = end.saturating_add(self.max_diff_time);
        let primary = self.primary_category();
        let dirs = self.log_dirs.clone();
        for cat in self.categories.clone() {
            if Some(cat) == primary {
                continue;
            }
            for (i, dir) in dirs.iter().enumerate() {
                let end_off = match cat {
                    LogCategory::Input => {
                        load_fleet(dir, self.max_log_files, min, max, &mut self.input)?
                    }
                    LogCategory::Distribution => {
                        load_fleet(dir, self.max_log_files, min, max, &mut self.dist)?
                    }
                    LogCategory::Production => {
                        load_fleet(dir, self.max_log_files, min, max, &mut self.prod)?
                    }
                    LogCategory::Output => {
                        load_fleet(dir, self.max_log_files, min, max, &mut self.output)?
                    }
                    LogCategory::Delete => {
                        load_fleet(dir, self.max_log_files, min, max, &mut self.delete)?
                    }
                };
                if i == 0 {
                    self.live_end[cat as usize] = end_off;
                }
            }
        }
        Ok(())
    }

    fn collect_primaries(&mut self, start: u64, end: u64) -> Result<Vec<Primary>> {
        let Some(cat) = self.primary_category() else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let dirs = self.log_dirs.clone();
        for (i, dir) in dirs.iter().enumerate() {
            for n in (0..self.max_log_files).rev() {
                let path = cat.rotation_path(dir, n);
                let end_off = match cat {
                    LogCategory::Input => read_records::<InputRecord, _>(&path, |_, r| {
                        if r.log_time() >= start && r.log_time() <= end {
                            out.push(Primary::Input(r));
                        }
                    })?,
                    LogCategory::Distribution => {
                        read_records::<DistributionRecord, _>(&path, |_, r| {
                            if r.log_time() >= start && r.log_time() <= end {
                                out.push(Primary::Distribution(r));
                            }
                        })?
                    }
                    LogCategory::Production => {
                        read_records::<ProductionRecord, _>(&path, |_, r| {
                            if r.log_time() >= start && r.log_time() <= end {
                                out.push(Primary::Production(r));
                            }
                        })?
                    }
                    LogCategory::Output => read_records::<OutputRecord, _>(&path, |_, r| {
                        if r.log_time() >= start && r.log_time() <= end {
                            out.push(Primary::Output(r));
                        }
                    })?,
                    LogCategory::Delete => read_records::<DeleteRecord, _>(&path, |_, r| {
                        if r.log_time() >= start && r.log_time() <= end {
                            out.push(Primary::Delete(r));
                        }
                    })?,
                };
                if i == 0 && n == 0 {
                    self.live_end[cat as usize] = end_off;
                }
            }
        }
        // Remote streams interleave with the local one by time.
        out.sort_by_key(Primary::time);
        Ok(out)
    }

    /// Forward one-shot: oldest to newest within `[start, end]`.
    pub fn run_forward<F>(&mut self, start: u64, end: u64, sink: &mut F) -> Result<RunStats>
    where
        F: FnMut(&FileHistory),
    {
        self.load_caches(start, end)?;
        let primaries = self.collect_primaries(start, end)?;
        self.drain(primaries, sink)
    }

    /// Backward one-shot: newest to oldest within `[start, end]`.
    pub fn run_backward<F>(&mut self, start: u64, end: u64, sink: &mut F) -> Result<RunStats>
    where
        F: FnMut(&FileHistory),
    {
        self.load_caches(start, end)?;
        let mut primaries = self.collect_primaries(start, end)?;
        primaries.reverse();
        self.drain(primaries, sink)
    }

    fn drain<F>(&mut self, primaries: Vec<Primary>, sink: &mut F) -> Result<RunStats>
    where
        F: FnMut(&FileHistory),
    {
        let began = Instant::now();
        let mut stats = RunStats::default();
        for primary in primaries {
            if let Some(budget) = self.max_search_time {
                if began.elapsed().as_secs() >= budget {
                    info!(budget, "search time budget exhausted, stopping");
                    stats.stopped_early = true;
                    break;
                }
            }
            stats.primaries += 1;
            let history = self.trace(primary);
            if self.filters.accepts(&history) {
                stats.emitted += 1;
                sink(&history);
            }
        }
        debug!(
            primaries = stats.primaries,
            emitted = stats.emitted,
            "pass complete"
        );
        Ok(stats)
    }

    /// Continuous follow: poll the live logs once a second until `stop`
    /// is raised. Every log starts at its current end; nothing already
    /// written is yielded.
    pub fn follow<F>(&mut self, stop: &AtomicBool, sink: &mut F) -> Result<RunStats>
    where
        F: FnMut(&FileHistory),
    {
        self.follow_inner(stop, sink, false)
    }

    /// Continuous follow picking up exactly where the preceding one-shot
    /// scan stopped reading each live file. A record appended between the
    /// scan and this call is yielded here instead of being lost.
    pub fn follow_after_scan<F>(&mut self, stop: &AtomicBool, sink: &mut F) -> Result<RunStats>
    where
        F: FnMut(&FileHistory),
    {
        self.follow_inner(stop, sink, true)
    }

    fn follow_inner<F>(&mut self, stop: &AtomicBool, sink: &mut F, resume: bool) -> Result<RunStats>
    where
        F: FnMut(&FileHistory),
    {
        let Some(primary_cat) = self.primary_category() else {
            return Ok(RunStats::default());
        };
        let mut stats = RunStats::default();

        let live_dir = self.log_dirs[0].clone();
        let mut f_input = FollowedLog::<InputRecord>::open(&live_dir);
        let mut f_dist = FollowedLog::<DistributionRecord>::open(&live_dir);
        let mut f_prod = FollowedLog::<ProductionRecord>::open(&live_dir);
        let mut f_output = FollowedLog::<OutputRecord>::open(&live_dir);
        let mut f_delete = FollowedLog::<DeleteRecord>::open(&live_dir);
        if resume {
            f_input.resume_from(self.live_end[LogCategory::Input as usize])?;
            f_dist.resume_from(self.live_end[LogCategory::Distribution as usize])?;
            f_prod.resume_from(self.live_end[LogCategory::Production as usize])?;
            f_output.resume_from(self.live_end[LogCategory::Output as usize])?;
            f_delete.resume_from(self.live_end[LogCategory::Delete as usize])?;
        } else {
            f_input.seek_to_end()?;
            f_dist.seek_to_end()?;
            f_prod.seek_to_end()?;
            f_output.seek_to_end()?;
            f_delete.seek_to_end()?;
        }

        while !stop.load(Ordering::Relaxed) {
            let mut progressed = false;
            let mut primaries = Vec::new();

            // Secondaries first so a primary arriving in the same cycle
            // can already join against them.
            for cat in self.categories.clone() {
                if cat == primary_cat {
                    continue;
                }
                match cat {
                    LogCategory::Input => {
                        for r in f_input.poll()? {
                            progressed = true;
                            self.input.push(0, r.log_time(), r);
                        }
                    }
                    LogCategory::Distribution => {
                        for r in f_dist.poll()? {
                            progressed = true;
                            self.dist.push(0, r.log_time(), r);
                        }
                    }
                    LogCategory::Production => {
                        for r in f_prod.poll()? {
                            progressed = true;
                            self.prod.push(0, r.log_time(), r);
                        }
                    }
                    LogCategory::Output => {
                        for r in f_output.poll()? {
                            progressed = true;
                            self.output.push(0, r.log_time(), r);
                        }
                    }
                    LogCategory::Delete => {
                        for r in f_delete.poll()? {
                            progressed = true;
                            self.delete.push(0, r.log_time(), r);
                        }
                    }
                }
            }
            match primary_cat {
                LogCategory::Input => {
                    primaries.extend(f_input.poll()?.into_iter().map(Primary::Input))
                }
                LogCategory::Distribution => {
                    primaries.extend(f_dist.poll()?.into_iter().map(Primary::Distribution))
                }
                LogCategory::Production => {
                    primaries.extend(f_prod.poll()?.into_iter().map(Primary::Production))
                }
                LogCategory::Output => {
                    primaries.extend(f_output.poll()?.into_iter().map(Primary::Output))
                }
                LogCategory::Delete => {
                    primaries.extend(f_delete.poll()?.into_iter().map(Primary::Delete))
                }
            }

            for primary in primaries.drain(..) {
                progressed = true;
                stats.primaries += 1;
                let history = self.trace(primary);
                if self.filters.accepts(&history) {
                    stats.emitted += 1;
                    sink(&history);
                }
            }

            if !progressed {
                std::thread::sleep(Duration::from_secs(1));
            }
        }
        Ok(stats)
    }

    fn trace(&mut self, primary: Primary) -> FileHistory {
        let mut h = FileHistory::default();
        match primary {
            Primary::Input(i) => self.trace_from_input(&mut h, i),
            Primary::Distribution(u) => {
                let t = u.time;
                let dir_id = u.dir_id;
                let unique = u.unique_number;
                let filename = u.filename.clone();
                h.distribution = Some(u);
                self.join_upstream_input(&mut h, t, dir_id, unique, &filename);
                self.trace_from_distribution(&mut h);
            }
            Primary::Production(p) => {
                h.production.push(p);
                self.trace_from_production(&mut h);
            }
            Primary::Output(o) => {
                h.outputs.push(o);
                self.trace_from_output(&mut h);
            }
            Primary::Delete(d) => {
                h.delete = Some(d);
            }
        }
        self.enrich(&mut h);
        h
    }

    fn trace_from_input(&mut self, h: &mut FileHistory, i: InputRecord) {
        let t = i.time;
        let lo = t;
        let hi = t.saturating_add(self.max_diff_time);
        let dir_id = i.dir_id;
        let unique = i.unique_number;
        let filename = i.filename.clone();
        h.input = Some(i);

        if self.enabled(LogCategory::Distribution) {
            h.distribution = self.dist.take_match(lo, hi, |u| {
                u.dir_id == dir_id && u.unique_number == unique && u.filename == filename
            });
        }
        self.trace_from_distribution(h);
    }

    /// Continue a trace whose input/distribution stages are settled.
    fn trace_from_distribution(&mut self, h: &mut FileHistory) {
        // Special distribution types end the pipeline right here.
        if let Some(u) = &h.distribution {
            match u.distribution_type() {
                Some(DistributionType::Disabled) => {
                    h.delete = Some(synthesize_from_distribution(u, HOST_DISABLED));
                    return;
                }
                Some(DistributionType::Dupcheck) => {
                    h.delete = Some(synthesize_from_distribution(u, DUP_INPUT));
                    return;
                }
                Some(DistributionType::AgeLimitDelete) => {
                    h.delete = Some(synthesize_from_distribution(u, AGE_INPUT));
                    return;
                }
                // The file is queued, nothing downstream exists yet.
                Some(DistributionType::QueueStopped) => return,
                _ => {}
            }
        }

        let t = h.primary_time();
        let lo = t;
        let hi = t.saturating_add(self.max_diff_time);
        let unique = unique_of(h);
        let input_time = h.input.as_ref().map(|i| i.time);
        let jobs: Vec<u32> = h
            .distribution
            .as_ref()
            .map(|u| u.jobs.iter().map(|(j, _)| *j).collect())
            .unwrap_or_default();
        let base_name = h.filename().to_string();

        if self.enabled(LogCategory::Production) {
            loop {
                let got = self.prod.take_match(lo, hi, |p| {
                    let key = unique.map(|u| p.unique_number == u).unwrap_or(false)
                        && input_time.map(|it| p.input_time == it).unwrap_or(true)
                        && (jobs.is_empty() || jobs.contains(&p.job_id));
                    key || p.original_filename == base_name
                });
                match got {
                    Some(p) => h.production.push(p),
                    None => break,
                }
            }
        }

        if self.enabled(LogCategory::Output) {
            self.join_outputs(h, lo, hi, &jobs);
        }

        self.settle_delete(h, lo, hi);
    }

    /// Collect the fan-out legs. A production record with `ratio_1 = N`
    /// announces N outputs for its job; otherwise one leg per job is
    /// expected. Collection is capped so one history cannot swallow an
    /// unrelated file's legs.
    fn join_outputs(&mut self, h: &mut FileHistory, lo: u64, hi: u64, jobs: &[u32]) {
        let unique = unique_of(h);
        let input_time = h.input.as_ref().map(|i| i.time);

        let mut legs: Vec<(Option<u32>, usize, Vec<String>)> = Vec::new();
        if jobs.is_empty() {
            let names: Vec<String> = std::iter::once(h.filename().to_string())
                .chain(h.production.iter().map(|p| p.new_filename.clone()))
                .collect();
            let expect = h
                .production
                .iter()
                .map(|p| p.ratio_1.max(1) as usize)
                .max()
                .unwrap_or(1);
            legs.push((None, expect, names));
        } else {
            for &job in jobs {
                let prods: Vec<&ProductionRecord> =
                    h.production.iter().filter(|p| p.job_id == job).collect();
                let expect = prods
                    .iter()
                    .map(|p| p.ratio_1.max(1) as usize)
                    .max()
                    .unwrap_or(1);
                let mut names = vec![h.filename().to_string()];
                names.extend(prods.iter().map(|p| p.new_filename.clone()));
                legs.push((Some(job), expect, names));
            }
        }

        for (job, expect, names) in legs {
            for _ in 0..expect {
                let got = self.output.take_match(lo, hi, |o| {
                    let key = unique.map(|u| o.unique_number == u).unwrap_or(false)
                        && input_time
                            .map(|it| o.creation_time == it)
                            .unwrap_or(true)
                        && job.map(|j| o.job_id == j).unwrap_or(true);
                    key || names.iter().any(|n| *n == o.local_filename)
                });
                match got {
                    Some(o) => h.outputs.push(o),
                    None => break,
                }
            }
        }
    }

    fn trace_from_production(&mut self, h: &mut FileHistory) {
        let p = h.production[0].clone();
        let lo = p.input_time;
        let hi = p.output_time.saturating_add(self.max_diff_time);
        self.join_upstream_input(h, p.input_time, 0, p.unique_number, &p.original_filename);
        if self.enabled(LogCategory::Output) {
            let jobs = [p.job_id];
            self.join_outputs(h, lo, hi, &jobs);
        }
        self.settle_delete(h, lo, hi);
    }

    fn trace_from_output(&mut self, h: &mut FileHistory) {
        let o = h.outputs[0].clone();
        let lo = o.creation_time.min(o.send_start_time);
        let hi = o.output_time.saturating_add(self.max_diff_time);
        self.join_upstream_input(
            h,
            o.output_time,
            o.dir_id.unwrap_or(0),
            o.unique_number,
            &o.local_filename,
        );
        self.settle_delete(h, lo, hi);
    }

    /// Seek back to the Input record that started the trail.
    fn join_upstream_input(
        &mut self,
        h: &mut FileHistory,
        at: u64,
        dir_id: u32,
        unique: u32,
        filename: &str,
    ) {
        if !self.enabled(LogCategory::Input) || h.input.is_some() {
            return;
        }
        let lo = at.saturating_sub(self.max_diff_time);
        h.input = self.input.take_match(lo, at, |i| {
            let key = i.unique_number == unique && (dir_id == 0 || i.dir_id == dir_id);
            key || i.filename == filename
        });
    }

    /// Find the real Delete record, or synthesise one from a deleting
    /// Output leg when the Delete log has nothing for this file.
    fn settle_delete(&mut self, h: &mut FileHistory, lo: u64, hi: u64) {
        if h.delete.is_some() {
            return;
        }
        if self.enabled(LogCategory::Delete) {
            let unique = unique_of(h);
            let dir_id = h.dir_id();
            let jobs = h.job_ids();
            let name = h.filename().to_string();
            h.delete = self.delete.take_match(lo, hi, |d| {
                let pre_split = unique.map(|u| d.unique_number == u).unwrap_or(false)
                    && dir_id.map(|id| d.dir_id == id).unwrap_or(false);
                let post_split = unique.map(|u| d.unique_number == u).unwrap_or(false)
                    && jobs.contains(&d.job_id);
                pre_split || post_split || d.filename == name
            });
        }
        if h.delete.is_none() {
            if let Some(o) = h
                .outputs
                .iter()
                .find(|o| o.effective_delete_reason().is_some())
            {
                h.delete = Some(synthesize_from_output(o));
            }
        }
    }

    /// Decode recipient and directory names from the catalog stores and
    /// resolve the delivery host's real name through the FSA.
    fn enrich(&mut self, h: &mut FileHistory) {
        if let Some(fsa) = &mut self.fsa {
            let _ = fsa.reopen_if_stale();
            let alias = h.outputs.first().map(|o| o.host_alias.clone());
            if let (Some(alias), Ok(records)) = (alias, fsa.records()) {
                if let Some(rec) = records.iter().find(|r| !r.is_group() && r.alias() == alias) {
                    let toggle = (rec.host_toggle as usize).saturating_sub(1);
                    let real = rec.real_hostname(toggle);
                    if !real.is_empty() {
                        h.real_hostname = Some(real.to_string());
                    }
                }
            }
        }
        let Some(catalog) = &mut self.catalog else {
            return;
        };
        if catalog.reopen_if_stale().is_err() {
            return;
        }
        if let Some(job) = h.job_ids().first() {
            if let Ok(Some(view)) = catalog.lookup_job(*job) {
                h.recipient = Some(view.recipient().to_string());
            }
        }
        if let Some(dir_id) = h.dir_id() {
            if let Ok(Some(view)) = catalog.lookup_dir(dir_id) {
                h.directory = Some(view.dir_name().to_string());
            }
        }
    }
}

fn unique_of(h: &FileHistory) -> Option<u32> {
    h.input
        .as_ref()
        .map(|i| i.unique_number)
        .or_else(|| h.distribution.as_ref().map(|u| u.unique_number))
        .or_else(|| h.production.first().map(|p| p.unique_number))
        .or_else(|| h.outputs.first().map(|o| o.unique_number))
}

fn synthesize_from_distribution(u: &DistributionRecord, reason: u16) -> DeleteRecord {
    DeleteRecord {
        delete_time: u.time,
        deletion_type: reason,
        filename: u.filename.clone(),
        size: u.size,
        job_id: u.jobs.first().map(|(j, _)| *j).unwrap_or(0),
        dir_id: u.dir_id,
        job_creation_time: u.time,
        unique_number: u.unique_number,
        split_job_counter: 0,
        user_process: String::new(),
        add_reason: String::new(),
    }
}

fn synthesize_from_output(o: &OutputRecord) -> DeleteRecord {
    DeleteRecord {
        delete_time: o.output_time,
        deletion_type: o.effective_delete_reason().unwrap_or(0),
        filename: o.local_filename.clone(),
        size: o.size,
        job_id: o.job_id,
        dir_id: o.dir_id.unwrap_or(0),
        job_creation_time: o.creation_time,
        unique_number: o.unique_number,
        split_job_counter: o.split_job_counter,
        user_process: String::new(),
        add_reason: String::new(),
    }
}
