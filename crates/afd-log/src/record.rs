//! Per-category record grammar.
//!
//! Every record starts with an 8-character hex seconds-since-epoch and ends
//! at `\n`; fields are `|`-separated and numbers are hex throughout. Lines
//! starting with `#` are comments, `#!#` head lines carry the field layout
//! of that rotation.

use crate::{
    LogCategory, LogError, Result, LOG_DATE_LENGTH, MAX_FILENAME_LENGTH, MAX_PROC_USER_LENGTH,
    SEPARATOR_CHAR,
};

/// A parseable, emittable record of one category.
pub trait LogRecord: Sized {
    const CATEGORY: LogCategory;

    /// The wall time ordering the record inside its log.
    fn log_time(&self) -> u64;

    /// Render the record without the trailing newline.
    fn format(&self) -> String;

    /// Parse one non-comment line.
    fn parse(line: &str) -> Result<Self>;

    /// The `#!#` head line written at the top of each rotation.
    fn metadata_line() -> String;

    /// Parse a raw line, skipping blanks, comments and metadata.
    fn parse_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        Self::parse(line).map(Some)
    }
}

/// Cause of a file's fan-out recorded in the Distribution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionType {
    Normal,
    TimeJob,
    QueueStopped,
    Disabled,
    Dupcheck,
    AgeLimitDelete,
}

impl DistributionType {
    pub fn to_id(self) -> u32 {
        match self {
            DistributionType::Normal => 0,
            DistributionType::TimeJob => 1,
            DistributionType::QueueStopped => 2,
            DistributionType::Disabled => 3,
            DistributionType::Dupcheck => 4,
            DistributionType::AgeLimitDelete => 5,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => DistributionType::Normal,
            1 => DistributionType::TimeJob,
            2 => DistributionType::QueueStopped,
            3 => DistributionType::Disabled,
            4 => DistributionType::Dupcheck,
            5 => DistributionType::AgeLimitDelete,
            _ => return None,
        })
    }
}

/// How an Output record left the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    NormalDelivered,
    AgeLimitDelete,
    DuplicateDelete,
    OtherProcDelete,
    AddressRejDelete,
}

impl OutputType {
    pub fn to_id(self) -> u32 {
        match self {
            OutputType::NormalDelivered => 0,
            OutputType::AgeLimitDelete => 1,
            OutputType::DuplicateDelete => 2,
            OutputType::OtherProcDelete => 3,
            OutputType::AddressRejDelete => 4,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => OutputType::NormalDelivered,
            1 => OutputType::AgeLimitDelete,
            2 => OutputType::DuplicateDelete,
            3 => OutputType::OtherProcDelete,
            4 => OutputType::AddressRejDelete,
            _ => return None,
        })
    }

    pub fn text(self) -> &'static str {
        match self {
            OutputType::NormalDelivered => "delivered",
            OutputType::AgeLimitDelete => "age limit delete",
            OutputType::DuplicateDelete => "duplicate delete",
            OutputType::OtherProcDelete => "other process delete",
            OutputType::AddressRejDelete => "address rejected delete",
        }
    }

    /// The Delete-log reason a deleting Output record stands for.
    pub fn delete_reason(self) -> Option<u16> {
        match self {
            OutputType::NormalDelivered => None,
            OutputType::AgeLimitDelete => Some(AGE_OUTPUT),
            OutputType::DuplicateDelete => Some(DUP_OUTPUT),
            OutputType::OtherProcDelete => Some(FILE_CURRENTLY_TRANSMITTED),
            OutputType::AddressRejDelete => Some(RECIPIENT_REJECTED),
        }
    }
}

/// Delete reason codes.
pub const AGE_OUTPUT: u16 = 0;
pub const AGE_INPUT: u16 = 1;
pub const USER_DEL: u16 = 2;
pub const EXEC_FAILED: u16 = 3;
pub const NO_MESSAGE_FILE_DEL: u16 = 4;
pub const DUP_INPUT: u16 = 5;
pub const DUP_OUTPUT: u16 = 6;
pub const FILE_CURRENTLY_TRANSMITTED: u16 = 7;
pub const RECIPIENT_REJECTED: u16 = 8;
pub const HOST_DISABLED: u16 = 9;
pub const DELETE_UNKNOWN_FILE: u16 = 10;
pub const DELETE_QUEUED_FILE: u16 = 11;

/// Old-form Output records carried a `dir_id` instead of a `job_id` for
/// these reasons.
pub const OLD_FORM_DIR_ID_REASONS: [u16; 3] = [AGE_OUTPUT, NO_MESSAGE_FILE_DEL, DUP_OUTPUT];

pub fn delete_reason_text(code: u16) -> &'static str {
    match code {
        AGE_OUTPUT => "age limit (output)",
        AGE_INPUT => "age limit (input)",
        USER_DEL => "deleted by user",
        EXEC_FAILED => "exec failed",
        NO_MESSAGE_FILE_DEL => "no message file",
        DUP_INPUT => "duplicate (input)",
        DUP_OUTPUT => "duplicate (output)",
        FILE_CURRENTLY_TRANSMITTED => "file currently transmitted",
        RECIPIENT_REJECTED => "recipient rejected",
        HOST_DISABLED => "host disabled",
        DELETE_UNKNOWN_FILE => "unknown file",
        DELETE_QUEUED_FILE => "queued file",
        _ => "unknown reason",
    }
}

fn fmt_time(t: u64) -> String {
    format!("{t:0width$x}", width = LOG_DATE_LENGTH)
}

/// Truncate an overlong field to its ceiling, marking it with `>`.
fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut n = max - 1;
        while n > 0 && !s.is_char_boundary(n) {
            n -= 1;
        }
        format!("{}>", &s[..n])
    }
}

struct Fields<'a> {
    category: LogCategory,
    iter: std::str::Split<'a, char>,
}

impl<'a> Fields<'a> {
    fn new(category: LogCategory, line: &'a str) -> Self {
        Self {
            category,
            iter: line.split(SEPARATOR_CHAR),
        }
    }

    fn next_str(&mut self, field: &'static str) -> Result<&'a str> {
        self.iter.next().ok_or(LogError::MissingField {
            category: self.category,
            field,
        })
    }

    fn next_opt(&mut self) -> Option<&'a str> {
        self.iter.next()
    }

    fn next_hex(&mut self, field: &'static str) -> Result<u64> {
        let raw = self.next_str(field)?;
        u64::from_str_radix(raw, 16).map_err(|_| LogError::BadField {
            category: self.category,
            field,
            value: raw.to_string(),
        })
    }

    fn next_hex_u32(&mut self, field: &'static str) -> Result<u32> {
        let raw = self.next_str(field)?;
        u32::from_str_radix(raw, 16).map_err(|_| LogError::BadField {
            category: self.category,
            field,
            value: raw.to_string(),
        })
    }

    /// An 8-hex-char time immediately followed by a hex duration.
    fn next_time_dur(&mut self, field: &'static str) -> Result<(u64, u64)> {
        let raw = self.next_str(field)?;
        if raw.len() < LOG_DATE_LENGTH {
            return Err(LogError::BadField {
                category: self.category,
                field,
                value: raw.to_string(),
            });
        }
        let time = u64::from_str_radix(&raw[..LOG_DATE_LENGTH], 16).map_err(|_| {
            LogError::BadField {
                category: self.category,
                field,
                value: raw.to_string(),
            }
        })?;
        let dur = if raw.len() == LOG_DATE_LENGTH {
            0
        } else {
            u64::from_str_radix(&raw[LOG_DATE_LENGTH..], 16).map_err(|_| LogError::BadField {
                category: self.category,
                field,
                value: raw.to_string(),
            })?
        };
        Ok((time, dur))
    }
}

/// `T|filename|size|dir_id|unique_number`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputRecord {
    pub time: u64,
    pub filename: String,
    pub size: u64,
    pub dir_id: u32,
    pub unique_number: u32,
}

impl LogRecord for InputRecord {
    const CATEGORY: LogCategory = LogCategory::Input;

    fn log_time(&self) -> u64 {
        self.time
    }

    fn format(&self) -> String {
        format!(
            "{}|{}|{:x}|{:x}|{:x}",
            fmt_time(self.time),
            clip(&self.filename, MAX_FILENAME_LENGTH),
            self.size,
            self.dir_id,
            self.unique_number
        )
    }

    fn parse(line: &str) -> Result<Self> {
        let mut f = Fields::new(Self::CATEGORY, line);
        Ok(Self {
            time: f.next_hex("time")?,
            filename: f.next_str("filename")?.to_string(),
            size: f.next_hex("size")?,
            dir_id: f.next_hex_u32("dir_id")?,
            unique_number: f.next_hex_u32("unique_number")?,
        })
    }

    fn metadata_line() -> String {
        "#!# 1 time|filename|size|dir_id|unique_number".to_string()
    }
}

/// `T|filename|size|dir_id|unique|dist_type|n_jobs|job,..|cycles,..`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistributionRecord {
    pub time: u64,
    pub filename: String,
    pub size: u64,
    pub dir_id: u32,
    pub unique_number: u32,
    pub dist_type: u32,
    /// Per fan-out target: `(job_id, proc_cycles)`.
    pub jobs: Vec<(u32, u32)>,
}

impl DistributionRecord {
    pub fn distribution_type(&self) -> Option<DistributionType> {
        DistributionType::from_id(self.dist_type)
    }
}

impl LogRecord for DistributionRecord {
    const CATEGORY: LogCategory = LogCategory::Distribution;

    fn log_time(&self) -> u64 {
        self.time
    }

    fn format(&self) -> String {
        let ids: Vec<String> = self.jobs.iter().map(|(j, _)| format!("{j:x}")).collect();
        let cycles: Vec<String> = self.jobs.iter().map(|(_, c)| format!("{c:x}")).collect();
        format!(
            "{}|{}|{:x}|{:x}|{:x}|{:x}|{:x}|{}|{}",
            fmt_time(self.time),
            clip(&self.filename, MAX_FILENAME_LENGTH),
            self.size,
            self.dir_id,
            self.unique_number,
            self.dist_type,
            self.jobs.len(),
            ids.join(","),
            cycles.join(",")
        )
    }

    fn parse(line: &str) -> Result<Self> {
        let mut f = Fields::new(Self::CATEGORY, line);
        let time = f.next_hex("time")?;
        let filename = f.next_str("filename")?.to_string();
        let size = f.next_hex("size")?;
        let dir_id = f.next_hex_u32("dir_id")?;
        let unique_number = f.next_hex_u32("unique_number")?;
        let dist_type = f.next_hex_u32("dist_type")?;
        let n_jobs = f.next_hex_u32("n_jobs")? as usize;
        let ids_raw = f.next_str("job_id_list")?;
        let cycles_raw = f.next_opt().unwrap_or("");
        let mut jobs = Vec::with_capacity(n_jobs);
        let mut cycles = cycles_raw.split(',');
        for raw in ids_raw.split(',').filter(|s| !s.is_empty()) {
            let id = u32::from_str_radix(raw, 16).map_err(|_| LogError::BadField {
                category: Self::CATEGORY,
                field: "job_id_list",
                value: raw.to_string(),
            })?;
            let cyc = cycles
                .next()
                .and_then(|c| u32::from_str_radix(c, 16).ok())
                .unwrap_or(0);
            jobs.push((id, cyc));
        }
        if jobs.len() != n_jobs {
            return Err(LogError::BadField {
                category: Self::CATEGORY,
                field: "n_jobs",
                value: format!("{n_jobs} vs {}", jobs.len()),
            });
        }
        Ok(Self {
            time,
            filename,
            size,
            dir_id,
            unique_number,
            dist_type,
            jobs,
        })
    }

    fn metadata_line() -> String {
        "#!# 1 time|filename|size|dir_id|unique_number|dist_type|n_jobs|job_id_list|proc_cycles"
            .to_string()
    }
}

/// `Ti|ToD|original|new|orig_size|new_size|ratio1|ratio2|job_id|unique|split|rc|what_done`
///
/// The second field is the 8-hex output time immediately followed by the
/// hex production duration in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProductionRecord {
    pub input_time: u64,
    pub output_time: u64,
    pub duration_ms: u64,
    pub original_filename: String,
    pub new_filename: String,
    pub original_size: u64,
    pub new_size: u64,
    pub ratio_1: u32,
    pub ratio_2: u32,
    pub job_id: u32,
    pub unique_number: u32,
    pub split_job_counter: u32,
    pub return_code: u32,
    pub what_done: String,
}

impl LogRecord for ProductionRecord {
    const CATEGORY: LogCategory = LogCategory::Production;

    fn log_time(&self) -> u64 {
        self.output_time
    }

    fn format(&self) -> String {
        format!(
            "{}|{}{:x}|{}|{}|{:x}|{:x}|{:x}|{:x}|{:x}|{:x}|{:x}|{:x}|{}",
            fmt_time(self.input_time),
            fmt_time(self.output_time),
            self.duration_ms,
            clip(&self.original_filename, MAX_FILENAME_LENGTH),
            clip(&self.new_filename, MAX_FILENAME_LENGTH),
            self.original_size,
            self.new_size,
            self.ratio_1,
            self.ratio_2,
            self.job_id,
            self.unique_number,
            self.split_job_counter,
            self.return_code,
            self.what_done
        )
    }

    fn parse(line: &str) -> Result<Self> {
        let mut f = Fields::new(Self::CATEGORY, line);
        let input_time = f.next_hex("input_time")?;
        let (output_time, duration_ms) = f.next_time_dur("output_time")?;
        Ok(Self {
            input_time,
            output_time,
            duration_ms,
            original_filename: f.next_str("original_filename")?.to_string(),
            new_filename: f.next_str("new_filename")?.to_string(),
            original_size: f.next_hex("original_size")?,
            new_size: f.next_hex("new_size")?,
            ratio_1: f.next_hex_u32("ratio_1")?,
            ratio_2: f.next_hex_u32("ratio_2")?,
            job_id: f.next_hex_u32("job_id")?,
            unique_number: f.next_hex_u32("unique_number")?,
            split_job_counter: f.next_hex_u32("split_job_counter")?,
            return_code: f.next_hex_u32("return_code")?,
            what_done: f.next_opt().unwrap_or("").to_string(),
        })
    }

    fn metadata_line() -> String {
        "#!# 1 input_time|output_time+dur|original|new|orig_size|new_size|ratio1|ratio2|job_id|unique_number|split|rc|what_done"
            .to_string()
    }
}

/// `[RRR|]Ts|ToD|host|protocol|local|remote|size|job_id|creation_time|unique|split|retries|output_type|archive_dir`
///
/// The optional three-hex-digit prefix is a delete reason. Old logs omitted
/// it and, for the reasons in [`OLD_FORM_DIR_ID_REASONS`], stored a
/// `dir_id` in the job-id position. Both readings are accepted; only the
/// prefixed form is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputRecord {
    pub delete_reason: Option<u16>,
    pub send_start_time: u64,
    pub output_time: u64,
    pub duration_ms: u64,
    pub host_alias: String,
    pub protocol: String,
    pub local_filename: String,
    pub remote_name: String,
    pub size: u64,
    pub job_id: u32,
    /// Only set when an old-form record carried a dir id instead.
    pub dir_id: Option<u32>,
    pub creation_time: u64,
    pub unique_number: u32,
    pub split_job_counter: u32,
    pub retries: u32,
    pub output_type: u32,
    pub archive_dir: String,
}

impl OutputRecord {
    pub fn output_type(&self) -> Option<OutputType> {
        OutputType::from_id(self.output_type)
    }

    /// The effective delete reason: the explicit prefix if present, else
    /// the one implied by a deleting output type.
    pub fn effective_delete_reason(&self) -> Option<u16> {
        self.delete_reason
            .or_else(|| self.output_type().and_then(OutputType::delete_reason))
    }
}

impl LogRecord for OutputRecord {
    const CATEGORY: LogCategory = LogCategory::Output;

    fn log_time(&self) -> u64 {
        self.output_time
    }

    fn format(&self) -> String {
        let mut out = String::new();
        if let Some(reason) = self.effective_delete_reason() {
            out.push_str(&format!("{reason:03x}|"));
        }
        out.push_str(&format!(
            "{}|{}{:x}|{}|{}|{}|{}|{:x}|{:x}|{}|{:x}|{:x}|{:x}|{:x}|{}",
            fmt_time(self.send_start_time),
            fmt_time(self.output_time),
            self.duration_ms,
            self.host_alias,
            self.protocol,
            clip(&self.local_filename, MAX_FILENAME_LENGTH),
            clip(&self.remote_name, MAX_FILENAME_LENGTH),
            self.size,
            self.job_id,
            fmt_time(self.creation_time),
            self.unique_number,
            self.split_job_counter,
            self.retries,
            self.output_type,
            self.archive_dir
        ));
        out
    }

    fn parse(line: &str) -> Result<Self> {
        // New form: 3 hex digits and a separator in front.
        let bytes = line.as_bytes();
        let prefixed = bytes.len() > 4
            && bytes[3] == SEPARATOR_CHAR as u8
            && bytes[..3].iter().all(u8::is_ascii_hexdigit);
        let (delete_reason, rest) = if prefixed {
            let code = u16::from_str_radix(&line[..3], 16).map_err(|_| LogError::BadField {
                category: Self::CATEGORY,
                field: "delete_reason",
                value: line[..3].to_string(),
            })?;
            (Some(code), &line[4..])
        } else {
            (None, line)
        };

        let mut f = Fields::new(Self::CATEGORY, rest);
        let send_start_time = f.next_hex("send_start_time")?;
        let (output_time, duration_ms) = f.next_time_dur("output_time")?;
        let host_alias = f.next_str("host_alias")?.to_string();
        let protocol = f.next_str("protocol")?.to_string();
        let local_filename = f.next_str("local_filename")?.to_string();
        let remote_name = f.next_str("remote_name")?.to_string();
        let size = f.next_hex("size")?;
        let id = f.next_hex_u32("job_id")?;
        let creation_time = f.next_hex("creation_time")?;
        let unique_number = f.next_hex_u32("unique_number")?;
        let split_job_counter = f.next_hex_u32("split_job_counter")?;
        let retries = f.next_hex_u32("retries")?;
        let output_type = f.next_hex_u32("output_type")?;
        let archive_dir = f.next_opt().unwrap_or("").to_string();

        let mut rec = Self {
            delete_reason,
            send_start_time,
            output_time,
            duration_ms,
            host_alias,
            protocol,
            local_filename,
            remote_name,
            size,
            job_id: id,
            dir_id: None,
            creation_time,
            unique_number,
            split_job_counter,
            retries,
            output_type,
            archive_dir,
        };
        if !prefixed {
            // Pre-prefix form: for some delete reasons the id field held
            // the dir id, not the job id.
            if let Some(reason) = rec.output_type().and_then(OutputType::delete_reason) {
                if OLD_FORM_DIR_ID_REASONS.contains(&reason) {
                    rec.dir_id = Some(id);
                    rec.job_id = 0;
                }
            }
        }
        Ok(rec)
    }

    fn metadata_line() -> String {
        "#!# 1 [reason|]send_start_time|output_time+dur|host|protocol|local|remote|size|job_id|creation_time|unique_number|split|retries|output_type|archive_dir"
            .to_string()
    }
}

/// `T|reason|filename|size|job_id|dir_id|creation_time|unique|split|user_proc|extra_reason`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeleteRecord {
    pub delete_time: u64,
    pub deletion_type: u16,
    pub filename: String,
    pub size: u64,
    pub job_id: u32,
    pub dir_id: u32,
    pub job_creation_time: u64,
    pub unique_number: u32,
    pub split_job_counter: u32,
    pub user_process: String,
    pub add_reason: String,
}

impl LogRecord for DeleteRecord {
    const CATEGORY: LogCategory = LogCategory::Delete;

    fn log_time(&self) -> u64 {
        self.delete_time
    }

    fn format(&self) -> String {
        format!(
            "{}|{:03x}|{}|{:x}|{:x}|{:x}|{}|{:x}|{:x}|{}|{}",
            fmt_time(self.delete_time),
            self.deletion_type,
            clip(&self.filename, MAX_FILENAME_LENGTH),
            self.size,
            self.job_id,
            self.dir_id,
            fmt_time(self.job_creation_time),
            self.unique_number,
            self.split_job_counter,
            clip(&self.user_process, MAX_PROC_USER_LENGTH),
            self.add_reason
        )
    }

    fn parse(line: &str) -> Result<Self> {
        let mut f = Fields::new(Self::CATEGORY, line);
        Ok(Self {
            delete_time: f.next_hex("delete_time")?,
            deletion_type: f.next_hex_u32("deletion_type")? as u16,
            filename: f.next_str("filename")?.to_string(),
            size: f.next_hex("size")?,
            job_id: f.next_hex_u32("job_id")?,
            dir_id: f.next_hex_u32("dir_id")?,
            job_creation_time: f.next_hex("creation_time")?,
            unique_number: f.next_hex_u32("unique_number")?,
            split_job_counter: f.next_hex_u32("split_job_counter")?,
            user_process: f.next_str("user_process")?.to_string(),
            add_reason: f.next_opt().unwrap_or("").to_string(),
        })
    }

    fn metadata_line() -> String {
        "#!# 1 delete_time|reason|filename|size|job_id|dir_id|creation_time|unique_number|split|user_process|add_reason"
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_round_trip() {
        let rec = InputRecord {
            time: 0x5f3a2b01,
            filename: "a.dat".to_string(),
            size: 0x400,
            dir_id: 0x12ab,
            unique_number: 7,
        };
        let line = rec.format();
        assert_eq!(line, "5f3a2b01|a.dat|400|12ab|7");
        assert_eq!(InputRecord::parse(&line).unwrap(), rec);
    }

    #[test]
    fn test_comment_and_metadata_lines_skipped() {
        assert!(InputRecord::parse_line("# a comment\n").unwrap().is_none());
        assert!(InputRecord::parse_line(&InputRecord::metadata_line())
            .unwrap()
            .is_none());
        assert!(InputRecord::parse_line("\n").unwrap().is_none());
        assert!(InputRecord::parse_line("5f3a2b01|x|1|2|3\n")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_distribution_round_trip() {
        let rec = DistributionRecord {
            time: 0x5f3a2b02,
            filename: "a.dat".to_string(),
            size: 0x400,
            dir_id: 0x12ab,
            unique_number: 7,
            dist_type: DistributionType::Normal.to_id(),
            jobs: vec![(3, 1), (0x1f, 2)],
        };
        let line = rec.format();
        assert_eq!(line, "5f3a2b02|a.dat|400|12ab|7|0|2|3,1f|1,2");
        assert_eq!(DistributionRecord::parse(&line).unwrap(), rec);
    }

    #[test]
    fn test_distribution_job_count_mismatch() {
        let err = DistributionRecord::parse("5f3a2b02|a|1|2|3|0|3|1,2|1,1").unwrap_err();
        assert!(matches!(err, LogError::BadField { field: "n_jobs", .. }));
    }

    #[test]
    fn test_production_round_trip_with_duration() {
        let rec = ProductionRecord {
            input_time: 0x5f3a2b01,
            output_time: 0x5f3a2b0a,
            duration_ms: 0x1f4,
            original_filename: "a.dat".to_string(),
            new_filename: "a.bz2".to_string(),
            original_size: 0x400,
            new_size: 0x200,
            ratio_1: 1,
            ratio_2: 1,
            job_id: 3,
            unique_number: 7,
            split_job_counter: 0,
            return_code: 0,
            what_done: "exec bzip2".to_string(),
        };
        let line = rec.format();
        let parsed = ProductionRecord::parse(&line).unwrap();
        assert_eq!(parsed, rec);
        assert_eq!(parsed.duration_ms, 500);
    }

    #[test]
    fn test_output_new_form_round_trip() {
        let rec = OutputRecord {
            delete_reason: None,
            send_start_time: 0x5f3a2b0a,
            output_time: 0x5f3a2b0c,
            duration_ms: 0x64,
            host_alias: "ducsfax".to_string(),
            protocol: "ftp".to_string(),
            local_filename: "a.dat".to_string(),
            remote_name: "a.dat".to_string(),
            size: 0x400,
            job_id: 3,
            dir_id: None,
            creation_time: 0x5f3a2b01,
            unique_number: 7,
            split_job_counter: 0,
            retries: 0,
            output_type: OutputType::NormalDelivered.to_id(),
            archive_dir: "ducsfax/3/5f3a2b01_7_0".to_string(),
        };
        let parsed = OutputRecord::parse(&rec.format()).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn test_output_deleting_record_gets_reason_prefix() {
        let rec = OutputRecord {
            output_type: OutputType::AgeLimitDelete.to_id(),
            host_alias: "h".to_string(),
            protocol: "ftp".to_string(),
            local_filename: "a".to_string(),
            remote_name: String::new(),
            ..Default::default()
        };
        let line = rec.format();
        assert!(line.starts_with("000|"));
        let parsed = OutputRecord::parse(&line).unwrap();
        assert_eq!(parsed.delete_reason, Some(AGE_OUTPUT));
        // Prefixed records keep the id field as a job id.
        assert!(parsed.dir_id.is_none());
    }

    #[test]
    fn test_output_old_form_dir_id_reading() {
        // Unprefixed record whose output type maps to AGE_OUTPUT: the id
        // field must be read as a dir id.
        let line = format!(
            "{}|{}{:x}|h|ftp|a.dat||400|12ab|{}|7|0|0|{:x}|",
            "5f3a2b0a",
            "5f3a2b0c",
            0x64,
            "5f3a2b01",
            OutputType::AgeLimitDelete.to_id()
        );
        let parsed = OutputRecord::parse(&line).unwrap();
        assert_eq!(parsed.dir_id, Some(0x12ab));
        assert_eq!(parsed.job_id, 0);
        assert_eq!(parsed.effective_delete_reason(), Some(AGE_OUTPUT));

        // Same shape but a normal delivery: the id stays a job id.
        let line = line.replace(
            &format!("|0|{:x}|", OutputType::AgeLimitDelete.to_id()),
            "|0|0|",
        );
        let parsed = OutputRecord::parse(&line).unwrap();
        assert_eq!(parsed.dir_id, None);
        assert_eq!(parsed.job_id, 0x12ab);
    }

    #[test]
    fn test_delete_round_trip() {
        let rec = DeleteRecord {
            delete_time: 0x5f3a2b10,
            deletion_type: AGE_INPUT,
            filename: "a.dat".to_string(),
            size: 0x400,
            job_id: 3,
            dir_id: 0x12ab,
            job_creation_time: 0x5f3a2b01,
            unique_number: 7,
            split_job_counter: 0,
            user_process: "AMG".to_string(),
            add_reason: "file too old".to_string(),
        };
        assert_eq!(DeleteRecord::parse(&rec.format()).unwrap(), rec);
    }

    #[test]
    fn test_overlong_filename_clipped_with_sentinel() {
        let rec = InputRecord {
            time: 1,
            filename: "x".repeat(MAX_FILENAME_LENGTH + 50),
            size: 1,
            dir_id: 1,
            unique_number: 1,
        };
        let line = rec.format();
        let parsed = InputRecord::parse(&line).unwrap();
        assert_eq!(parsed.filename.len(), MAX_FILENAME_LENGTH);
        assert!(parsed.filename.ends_with('>'));
    }
}
