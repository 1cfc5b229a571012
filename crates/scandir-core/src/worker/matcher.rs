//! Match predicates: decide which directory entries a worker cares about.

use glob::Pattern;
use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;

use crate::config::FileMatchConfig;
use crate::error::{Error, Result};

/// Boolean test applied to every child entry a worker lists.
///
/// Return `true` for directories that should be descended into as well as
/// for files that match. Implemented for plain closures.
pub trait FileMatcher: Send + Sync {
    fn matches(&self, path: &Path, metadata: &Metadata) -> bool;
}

impl<F> FileMatcher for F
where
    F: Fn(&Path, &Metadata) -> bool + Send + Sync,
{
    fn matches(&self, path: &Path, metadata: &Metadata) -> bool {
        self(path, metadata)
    }
}

/// Matcher built from [`FileMatchConfig`]. Directories always match.
#[derive(Debug, Clone, Default)]
pub struct FileMatch {
    pattern: Option<Pattern>,
    size_exceeds: u64,
    modified_before: Option<SystemTime>,
    modified_after: Option<SystemTime>,
}

impl FileMatch {
    /// Matches every file.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FileMatchConfig) -> Result<Self> {
        let pattern = config
            .file_pattern
            .as_deref()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| Error::IllegalArgument(format!("file pattern {p:?}: {e}")))
            })
            .transpose()?;
        Ok(Self {
            pattern,
            size_exceeds: config.size_exceeds_max_bytes,
            modified_before: config.last_modified_before.map(SystemTime::from),
            modified_after: config.last_modified_after.map(SystemTime::from),
        })
    }
}

impl FileMatcher for FileMatch {
    fn matches(&self, path: &Path, metadata: &Metadata) -> bool {
        if metadata.is_dir() {
            return true;
        }

        if let Some(pattern) = &self.pattern {
            let Some(name) = path.file_name() else {
                return false;
            };
            if !pattern.matches(&name.to_string_lossy()) {
                return false;
            }
        }

        if self.size_exceeds > 0 && metadata.len() <= self.size_exceeds {
            return false;
        }

        if self.modified_before.is_some() || self.modified_after.is_some() {
            let Ok(modified) = metadata.modified() else {
                return false;
            };
            if self.modified_before.is_some_and(|t| modified >= t) {
                return false;
            }
            if self.modified_after.is_some_and(|t| modified <= t) {
                return false;
            }
        }

        true
    }
}
