// src/logging.rs

//! Log file plumbing.
//!
//! The binary installs `env_logger` with [`TeeWriter`] as its target so
//! every line reaches stderr and the append-only application log. Alerts
//! attach the tail of that file through [`recent_lines`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::error::Result;

/// Writer duplicating output to stderr and a log file.
pub struct TeeWriter {
    file: Option<File>,
}

impl TeeWriter {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Some(file) })
    }

    /// Writer that only reaches stderr.
    pub fn stderr_only() -> Self {
        Self { file: None }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            // Stop teeing after the first failed write.
            if file.write_all(buf).is_err() {
                self.file = None;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        io::stderr().flush()
    }
}

/// Last `n` lines of the log file; empty when it does not exist.
pub fn recent_lines(path: &Path, n: usize) -> Vec<String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("Could not read log file {}: {}", path.display(), e);
            }
            return Vec::new();
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_lines_returns_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/app.log");

        let mut writer = TeeWriter::open(&path).unwrap();
        for i in 1..=5 {
            writeln!(writer, "line {i}").unwrap();
        }
        writer.flush().unwrap();

        assert_eq!(recent_lines(&path, 2), vec!["line 4", "line 5"]);
        assert_eq!(recent_lines(&path, 50).len(), 5);
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");

        writeln!(TeeWriter::open(&path).unwrap(), "first").unwrap();
        writeln!(TeeWriter::open(&path).unwrap(), "second").unwrap();
        assert_eq!(recent_lines(&path, 10), vec!["first", "second"]);
    }

    #[test]
    fn missing_file_has_no_lines() {
        let dir = tempfile::tempdir().unwrap();
        assert!(recent_lines(&dir.path().join("nope.log"), 50).is_empty());
    }
}
