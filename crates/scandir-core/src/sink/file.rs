//! Rotating JSON-lines log file.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::model::ResultRecord;

/// Appended to a log file's name when it is rotated out.
pub const ROTATED_SUFFIX: &str = ".old";

/// The name a log file is renamed to on rotation: `results.jsonl` →
/// `results.jsonl.old`. An earlier backup with that name is replaced.
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(ROTATED_SUFFIX);
    PathBuf::from(name)
}

/// Rename `path` to its rotated name, replacing any earlier backup.
fn move_aside(path: &Path) -> io::Result<PathBuf> {
    let backup = rotated_path(path);
    match fs::remove_file(&backup) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(path, &backup)?;
    Ok(backup)
}

/// Fail if `path` cannot be opened for appending. Existing contents are
/// left alone.
pub(crate) fn check_writable(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

/// An open log file and the number of records written since it was opened.
pub(crate) struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
    count: u64,
}

impl LogFile {
    /// Open a fresh, empty log file at `path`. A non-empty file already there
    /// (e.g. from a previous run) is moved aside to the rotated name first.
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false) {
            move_aside(path)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        debug!("Opened result log file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            count: 0,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// Write one record as a JSON line and flush it.
    pub(crate) fn append(&mut self, record: &ResultRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.count += 1;
        Ok(())
    }

    /// Close the file and rename it to the rotated name. Returns that name.
    pub(crate) fn rotate(self) -> io::Result<PathBuf> {
        let path = self.path.clone();
        self.close()?;
        let backup = move_aside(&path)?;
        debug!("Rotated result log {} -> {}", path.display(), backup.display());
        Ok(backup)
    }

    /// Flush and close without renaming.
    pub(crate) fn close(mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}
