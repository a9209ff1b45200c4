//! Format-string DSL for rendering joined histories.
//!
//! Tokens are `%[-][width][.prec]<cat><field>[subopt]` where `cat` picks
//! the pipeline stage (`I`, `U`, `P`, `O`, `D`) or `J` for catalog
//! enrichment, and `field` one value of that stage. Numeric ids accept a
//! base suboption (`d`/`x`/`o`), sizes a unit suffix, durations a unit
//! letter, and string fields a character range like `[1,3-5,$]`.

use afd_log::{delete_reason_text, OutputType};

use crate::history::FileHistory;
use crate::{AldaError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Sub {
    None,
    Base(char),
    SizeUnit(char),
    DurUnit(char),
    Range(Vec<RangePart>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RangePart {
    One(usize),
    Span(usize, usize),
    Last,
}

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Literal(String),
    Token {
        left: bool,
        width: Option<usize>,
        prec: Option<usize>,
        cat: char,
        field: char,
        sub: Sub,
    },
}

/// What a `(cat, field)` pair yields, deciding which suboptions apply.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Time,
    Num,
    Size,
    Duration,
    Str,
}

fn field_kind(cat: char, field: char) -> Option<Kind> {
    let kind = match (cat, field) {
        ('I', 'T') => Kind::Time,
        ('I', 'F') => Kind::Str,
        ('I', 'S') => Kind::Size,
        ('I', 'I') | ('I', 'U') => Kind::Num,

        ('U', 'T') => Kind::Time,
        ('U', 'F') => Kind::Str,
        ('U', 'S') => Kind::Size,
        ('U', 'n') | ('U', 't') => Kind::Num,
        ('U', 'j') | ('U', 'c') => Kind::Str,

        ('P', 'T') => Kind::Time,
        ('P', 'D') => Kind::Duration,
        ('P', 'f') | ('P', 'F') => Kind::Str,
        ('P', 'S') | ('P', 's') => Kind::Size,
        ('P', 'J') => Kind::Num,

        ('O', 'T') | ('O', 't') => Kind::Time,
        ('O', 'D') => Kind::Duration,
        ('O', 'f') | ('O', 'F') | ('O', 'E') => Kind::Str,
        ('O', 'P') | ('O', 'H') | ('O', 'h') => Kind::Str,
        ('O', 'S') => Kind::Size,
        ('O', 'J') | ('O', 'o') | ('O', 'r') | ('O', 'p') => Kind::Num,
        ('O', 'O') => Kind::Str,
        ('O', 'A') => Kind::Str,

        ('D', 'T') => Kind::Time,
        ('D', 'R') | ('D', 'F') | ('D', 'A') | ('D', 'W') => Kind::Str,
        ('D', 'r') | ('D', 'J') | ('D', 'I') => Kind::Num,
        ('D', 'S') => Kind::Size,

        ('J', 'R') | ('J', 'D') => Kind::Str,

        _ => return None,
    };
    Some(kind)
}

/// A compiled format string.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFormat {
    items: Vec<Item>,
}

impl OutputFormat {
    pub fn compile(fmt: &str) -> Result<Self> {
        let mut items = Vec::new();
        let mut lit = String::new();
        let mut i = 0;
        while i < fmt.len() {
            let c = fmt[i..].chars().next().unwrap();
            match c {
                '\\' if i + 1 < fmt.len() => {
                    let next = fmt[i + 1..].chars().next().unwrap();
                    match next {
                        'n' => lit.push('\n'),
                        't' => lit.push('\t'),
                        other => lit.push(other),
                    }
                    i += 1 + next.len_utf8();
                }
                '%' if fmt[i + 1..].starts_with('%') => {
                    lit.push('%');
                    i += 2;
                }
                '%' => {
                    if !lit.is_empty() {
                        items.push(Item::Literal(std::mem::take(&mut lit)));
                    }
                    let (token, next) = parse_token(fmt, i)?;
                    items.push(token);
                    i = next;
                }
                c => {
                    lit.push(c);
                    i += c.len_utf8();
                }
            }
        }
        if !lit.is_empty() {
            items.push(Item::Literal(lit));
        }
        Ok(Self { items })
    }

    pub fn render(&self, h: &FileHistory) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                Item::Literal(s) => out.push_str(s),
                Item::Token {
                    left,
                    width,
                    prec,
                    cat,
                    field,
                    sub,
                } => {
                    let mut value = field_value(h, *cat, *field, sub);
                    if let Some(p) = prec {
                        if field_kind(*cat, *field) == Some(Kind::Str) {
                            value.truncate(*p);
                        } else if value.len() < *p {
                            value = format!("{}{}", "0".repeat(*p - value.len()), value);
                        }
                    }
                    match width {
                        Some(w) => {
                            let w = *w;
                            if *left {
                                out.push_str(&format!("{value:<w$}"));
                            } else {
                                out.push_str(&format!("{value:>w$}"));
                            }
                        }
                        None => out.push_str(&value),
                    }
                }
            }
        }
        out
    }
}

fn parse_token(fmt: &str, at: usize) -> Result<(Item, usize)> {
    let bytes = fmt.as_bytes();
    let bad = |at: usize, reason: &str| AldaError::BadFormat {
        at,
        reason: reason.to_string(),
    };
    let mut i = at + 1;
    let mut left = false;
    if bytes.get(i) == Some(&b'-') {
        left = true;
        i += 1;
    }
    let mut width = None;
    let w_start = i;
    while bytes.get(i).map(u8::is_ascii_digit).unwrap_or(false) {
        i += 1;
    }
    if i > w_start {
        width = Some(fmt[w_start..i].parse().unwrap());
    }
    let mut prec = None;
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        let p_start = i;
        while bytes.get(i).map(u8::is_ascii_digit).unwrap_or(false) {
            i += 1;
        }
        if i == p_start {
            return Err(bad(i, "expected digits after '.'"));
        }
        prec = Some(fmt[p_start..i].parse().unwrap());
    }
    let cat = *bytes.get(i).ok_or_else(|| bad(i, "missing category"))? as char;
    i += 1;
    let field = *bytes.get(i).ok_or_else(|| bad(i, "missing field"))? as char;
    i += 1;
    let kind = field_kind(cat, field)
        .ok_or_else(|| bad(at, &format!("unknown token %{cat}{field}")))?;

    let sub = match (kind, bytes.get(i).copied()) {
        (Kind::Num, Some(c @ (b'd' | b'x' | b'o'))) => {
            i += 1;
            Sub::Base(c as char)
        }
        (Kind::Size, Some(c))
            if b"aAbBkKmMgGtTpPeE".contains(&c) =>
        {
            i += 1;
            Sub::SizeUnit(c as char)
        }
        (Kind::Duration, Some(c)) if b"ADHMSXY".contains(&c) => {
            i += 1;
            Sub::DurUnit(c as char)
        }
        (Kind::Str, Some(b'[')) => {
            let end = fmt[i..]
                .find(']')
                .ok_or_else(|| bad(i, "unterminated character range"))?;
            let parts = parse_range(&fmt[i + 1..i + end])
                .ok_or_else(|| bad(i, "bad character range"))?;
            i += end + 1;
            Sub::Range(parts)
        }
        _ => Sub::None,
    };
    Ok((
        Item::Token {
            left,
            width,
            prec,
            cat,
            field,
            sub,
        },
        i,
    ))
}

fn parse_range(spec: &str) -> Option<Vec<RangePart>> {
    let mut parts = Vec::new();
    for item in spec.split(',') {
        let item = item.trim();
        if item == "$" {
            parts.push(RangePart::Last);
        } else if let Some((a, b)) = item.split_once('-') {
            parts.push(RangePart::Span(a.parse().ok()?, b.parse().ok()?));
        } else {
            parts.push(RangePart::One(item.parse().ok()?));
        }
    }
    Some(parts)
}

fn apply_range(s: &str, parts: &[RangePart]) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let pick = |i: usize| chars.get(i.wrapping_sub(1)).copied();
    for part in parts {
        match part {
            RangePart::One(i) => {
                if let Some(c) = pick(*i) {
                    out.push(c);
                }
            }
            RangePart::Span(a, b) => {
                for i in *a..=*b {
                    if let Some(c) = pick(i) {
                        out.push(c);
                    }
                }
            }
            RangePart::Last => {
                if let Some(c) = chars.last() {
                    out.push(*c);
                }
            }
        }
    }
    out
}

fn field_value(h: &FileHistory, cat: char, field: char, sub: &Sub) -> String {
    let num = |v: u64| match sub {
        Sub::Base('x') => format!("{v:x}"),
        Sub::Base('o') => format!("{v:o}"),
        _ => v.to_string(),
    };
    let size = |v: u64| match sub {
        Sub::SizeUnit(u) => format_size(v, *u),
        _ => v.to_string(),
    };
    let dur = |v: u64| match sub {
        Sub::DurUnit(u) => format_duration(v, *u),
        _ => v.to_string(),
    };
    let st = |s: &str| match sub {
        Sub::Range(parts) => apply_range(s, parts),
        _ => s.to_string(),
    };

    let o = h.outputs.first();
    let p = h.production.first();
    match (cat, field) {
        ('I', 'T') => h.input.as_ref().map(|i| i.time.to_string()),
        ('I', 'F') => h.input.as_ref().map(|i| st(&i.filename)),
        ('I', 'S') => h.input.as_ref().map(|i| size(i.size)),
        ('I', 'I') => h.input.as_ref().map(|i| num(i.dir_id as u64)),
        ('I', 'U') => h.input.as_ref().map(|i| num(i.unique_number as u64)),

        ('U', 'T') => h.distribution.as_ref().map(|u| u.time.to_string()),
        ('U', 'F') => h.distribution.as_ref().map(|u| st(&u.filename)),
        ('U', 'S') => h.distribution.as_ref().map(|u| size(u.size)),
        ('U', 'n') => h.distribution.as_ref().map(|u| num(u.jobs.len() as u64)),
        ('U', 't') => h.distribution.as_ref().map(|u| num(u.dist_type as u64)),
        ('U', 'j') => h.distribution.as_ref().map(|u| {
            st(&u
                .jobs
                .iter()
                .map(|(j, _)| format!("{j:x}"))
                .collect::<Vec<_>>()
                .join(","))
        }),
        ('U', 'c') => h.distribution.as_ref().map(|u| {
            st(&u
                .jobs
                .iter()
                .map(|(_, c)| c.to_string())
                .collect::<Vec<_>>()
                .join(","))
        }),

        ('P', 'T') => p.map(|p| p.output_time.to_string()),
        ('P', 'D') => p.map(|p| dur(p.duration_ms / 1000)),
        ('P', 'f') => p.map(|p| st(&p.original_filename)),
        ('P', 'F') => p.map(|p| st(&p.new_filename)),
        ('P', 'S') => p.map(|p| size(p.new_size)),
        ('P', 's') => p.map(|p| size(p.original_size)),
        ('P', 'J') => p.map(|p| num(p.job_id as u64)),

        ('O', 'T') => o.map(|o| o.output_time.to_string()),
        ('O', 't') => o.map(|o| o.send_start_time.to_string()),
        ('O', 'D') => o.map(|o| dur(o.duration_ms / 1000)),
        ('O', 'f') => o.map(|o| st(&o.local_filename)),
        ('O', 'F') => o.map(|o| st(&o.remote_name)),
        ('O', 'E') => o.map(|o| {
            st(if o.remote_name.is_empty() {
                &o.local_filename
            } else {
                &o.remote_name
            })
        }),
        ('O', 'P') => o.map(|o| st(&o.protocol)),
        ('O', 'p') => o.map(|o| {
            let id = protocol_id(&o.protocol);
            match sub {
                Sub::Base('d') => id.to_string(),
                Sub::Base('o') => format!("{id:o}"),
                _ => format!("{id:x}"),
            }
        }),
        ('O', 'H') => o.map(|o| st(&o.host_alias)),
        ('O', 'h') => o.map(|o| st(h.real_hostname.as_deref().unwrap_or(&o.host_alias))),
        ('O', 'S') => o.map(|o| size(o.size)),
        ('O', 'J') => o.map(|o| num(o.job_id as u64)),
        ('O', 'o') => o.map(|o| num(o.output_type as u64)),
        ('O', 'r') => o.map(|o| num(o.retries as u64)),
        ('O', 'O') => o.map(|o| {
            st(o.output_type()
                .map(OutputType::text)
                .unwrap_or("unknown"))
        }),
        ('O', 'A') => o.map(|o| st(&o.archive_dir)),

        ('D', 'T') => h.delete.as_ref().map(|d| d.delete_time.to_string()),
        ('D', 'R') => h
            .delete
            .as_ref()
            .map(|d| st(delete_reason_text(d.deletion_type))),
        ('D', 'r') => h.delete.as_ref().map(|d| num(d.deletion_type as u64)),
        ('D', 'F') => h.delete.as_ref().map(|d| st(&d.filename)),
        ('D', 'S') => h.delete.as_ref().map(|d| size(d.size)),
        ('D', 'J') => h.delete.as_ref().map(|d| num(d.job_id as u64)),
        ('D', 'I') => h.delete.as_ref().map(|d| num(d.dir_id as u64)),
        ('D', 'A') => h.delete.as_ref().map(|d| st(&d.add_reason)),
        ('D', 'W') => h.delete.as_ref().map(|d| st(&d.user_process)),

        ('J', 'R') => h.recipient.as_deref().map(st),
        ('J', 'D') => h.directory.as_deref().map(st),

        _ => None,
    }
    .unwrap_or_default()
}

/// Numeric scheme id of a transfer protocol, hex by default like every
/// other id in the logs. Unknown schemes render as `ff`.
fn protocol_id(scheme: &str) -> u64 {
    match scheme {
        "ftp" => 0,
        "loc" | "file" => 1,
        "smtp" | "mailto" => 2,
        "sftp" => 3,
        "scp" => 4,
        "http" => 5,
        "https" => 6,
        "ftps" => 7,
        "wmo" => 8,
        "exec" => 9,
        "dfax" => 10,
        _ => 0xff,
    }
}

const SI: [(u64, char); 6] = [
    (1_000_000_000_000_000_000, 'e'),
    (1_000_000_000_000_000, 'p'),
    (1_000_000_000_000, 't'),
    (1_000_000_000, 'g'),
    (1_000_000, 'm'),
    (1_000, 'k'),
];

const IEC: [(u64, char); 6] = [
    (1 << 60, 'E'),
    (1 << 50, 'P'),
    (1 << 40, 'T'),
    (1 << 30, 'G'),
    (1 << 20, 'M'),
    (1 << 10, 'K'),
];

fn format_size(v: u64, unit: char) -> String {
    let scaled = |div: u64, suffix: char| {
        if v % div == 0 {
            format!("{}{}", v / div, suffix)
        } else {
            format!("{:.1}{}", v as f64 / div as f64, suffix)
        }
    };
    match unit {
        'b' | 'B' => v.to_string(),
        'a' => SI
            .iter()
            .find(|(div, _)| v >= *div)
            .map(|&(div, s)| scaled(div, s))
            .unwrap_or_else(|| v.to_string()),
        'A' => IEC
            .iter()
            .find(|(div, _)| v >= *div)
            .map(|&(div, s)| scaled(div, s))
            .unwrap_or_else(|| v.to_string()),
        'k' => scaled(1_000, 'k'),
        'm' => scaled(1_000_000, 'm'),
        'g' => scaled(1_000_000_000, 'g'),
        't' => scaled(1_000_000_000_000, 't'),
        'p' => scaled(1_000_000_000_000_000, 'p'),
        'e' => scaled(1_000_000_000_000_000_000, 'e'),
        'K' => scaled(1 << 10, 'K'),
        'M' => scaled(1 << 20, 'M'),
        'G' => scaled(1 << 30, 'G'),
        'T' => scaled(1 << 40, 'T'),
        'P' => scaled(1 << 50, 'P'),
        'E' => scaled(1 << 60, 'E'),
        _ => v.to_string(),
    }
}

fn format_duration(secs: u64, unit: char) -> String {
    match unit {
        'S' => secs.to_string(),
        'M' => (secs / 60).to_string(),
        'H' => (secs / 3600).to_string(),
        'D' => (secs / 86_400).to_string(),
        'A' => {
            if secs >= 86_400 {
                format!("{}d", secs / 86_400)
            } else if secs >= 3600 {
                format!("{}h", secs / 3600)
            } else if secs >= 60 {
                format!("{}m", secs / 60)
            } else {
                format!("{secs}s")
            }
        }
        'X' => format!(
            "{}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        ),
        'Y' => format!(
            "{}:{:02}:{:02}",
            secs / 86_400,
            (secs % 86_400) / 3600,
            (secs % 3600) / 60
        ),
        _ => secs.to_string(),
    }
}
