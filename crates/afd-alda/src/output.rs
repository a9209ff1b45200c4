//! Where rendered histories go: stdout, or a rotating output file with
//! optional header and footer emitted once per run.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::Result;

enum Dest {
    Stdout(io::Stdout),
    File {
        path: PathBuf,
        out: BufWriter<File>,
        opened: Instant,
        rotate_every: Option<Duration>,
    },
}

pub struct OutputSink {
    dest: Dest,
    header: Option<PathBuf>,
    footer: Option<PathBuf>,
    wrote_header: bool,
}

impl OutputSink {
    pub fn stdout(header: Option<PathBuf>, footer: Option<PathBuf>) -> Self {
        Self {
            dest: Dest::Stdout(io::stdout()),
            header,
            footer,
            wrote_header: false,
        }
    }

    pub fn file(
        path: &Path,
        rotate_every: Option<Duration>,
        header: Option<PathBuf>,
        footer: Option<PathBuf>,
    ) -> Result<Self> {
        Ok(Self {
            dest: Dest::File {
                path: path.to_path_buf(),
                out: BufWriter::new(open_append(path)?),
                opened: Instant::now(),
                rotate_every,
            },
            header,
            footer,
            wrote_header: false,
        })
    }

    /// Write one rendered history. The header file, if any, goes out in
    /// front of the first line only.
    pub fn emit(&mut self, rendered: &str) -> Result<()> {
        if !self.wrote_header {
            self.wrote_header = true;
            if let Some(path) = self.header.take() {
                let text = fs::read_to_string(&path)?;
                self.write_all(text.as_bytes())?;
            }
        }
        self.maybe_rotate()?;
        self.write_all(rendered.as_bytes())?;
        if !rendered.ends_with('\n') {
            self.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Emit the footer, if any, and flush. Call once at end of run.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(path) = self.footer.take() {
            let text = fs::read_to_string(&path)?;
            self.write_all(text.as_bytes())?;
        }
        match &mut self.dest {
            Dest::Stdout(out) => out.flush()?,
            Dest::File { out, .. } => out.flush()?,
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.dest {
            Dest::Stdout(out) => out.write_all(bytes)?,
            Dest::File { out, .. } => out.write_all(bytes)?,
        }
        Ok(())
    }

    /// Shift the output file aside once the rotation interval elapsed.
    fn maybe_rotate(&mut self) -> Result<()> {
        let Dest::File {
            path,
            out,
            opened,
            rotate_every: Some(every),
        } = &mut self.dest
        else {
            return Ok(());
        };
        if opened.elapsed() < *every {
            return Ok(());
        }
        out.flush()?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let aside = path.with_extension(format!("{stamp}"));
        fs::rename(&path, &aside)?;
        debug!(from = %path.display(), to = %aside.display(), "output rotated");
        *out = BufWriter::new(open_append(path)?);
        *opened = Instant::now();
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_with_header_and_footer() {
        let dir = tempfile::tempdir().unwrap();
        let head = dir.path().join("head");
        let foot = dir.path().join("foot");
        fs::write(&head, "== report ==\n").unwrap();
        fs::write(&foot, "== end ==\n").unwrap();
        let out = dir.path().join("out.txt");

        let mut sink =
            OutputSink::file(&out, None, Some(head), Some(foot)).unwrap();
        sink.emit("line one").unwrap();
        sink.emit("line two\n").unwrap();
        sink.finish().unwrap();

        let text = fs::read_to_string(&out).unwrap();
        assert_eq!(text, "== report ==\nline one\nline two\n== end ==\n");
    }

    #[test]
    fn test_header_skipped_when_nothing_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let head = dir.path().join("head");
        fs::write(&head, "header\n").unwrap();
        let out = dir.path().join("out.txt");

        let mut sink = OutputSink::file(&out, None, Some(head), None).unwrap();
        sink.finish().unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn test_rotation_moves_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let mut sink =
            OutputSink::file(&out, Some(Duration::from_secs(0)), None, None).unwrap();
        sink.emit("first").unwrap();
        sink.emit("second").unwrap();
        sink.finish().unwrap();

        let aside: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "out.txt")
            .collect();
        assert_eq!(aside.len(), 1);
        assert_eq!(fs::read_to_string(&out).unwrap(), "second\n");
    }
}
