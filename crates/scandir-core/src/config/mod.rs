//! Session configuration: plain serde structs consumed by the controller.
//!
//! The controller never reads files itself; it takes a [`SessionConfig`]
//! from a [`ConfigStore`], which may reload it from disk first.
pub mod store;

pub use store::ConfigStore;

use chrono::{DateTime, Local};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::ActionSet;

/// Default number of records kept by the memory log.
pub const DEFAULT_MEMORY_MAX_RECORDS: usize = 1_024;

/// Default number of records per log file before rotation.
pub const DEFAULT_LOG_FILE_MAX_RECORDS: u64 = 10_000;

/// Everything needed to (re)build a session's workers and result log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Display name of the session.
    pub name: CompactString,
    /// One entry per scanned root, in scan order.
    pub workers: Vec<WorkerConfig>,
    /// Result log capacities and file name.
    pub result_log: ResultLogConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: CompactString::new("scandir"),
            workers: Vec::new(),
            result_log: ResultLogConfig::default(),
        }
    }
}

/// One directory worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Unique name; used in events, records and log output.
    pub name: CompactString,
    /// Directory to scan. Must exist when the configuration is applied.
    pub root_dir: PathBuf,
    /// Criteria files must meet to match.
    #[serde(default)]
    pub file_match: FileMatchConfig,
    /// What to do with each match.
    #[serde(default)]
    pub actions: ActionSet,
}

/// Match criteria. Every set criterion must hold; unset criteria are ignored.
/// Directories always pass so traversal can descend into them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMatchConfig {
    /// Glob matched against the file name (not the full path), e.g. `*.log`.
    pub file_pattern: Option<String>,
    /// Match only files strictly larger than this many bytes. 0 = any size.
    pub size_exceeds_max_bytes: u64,
    /// Match only files last modified before this instant.
    pub last_modified_before: Option<DateTime<Local>>,
    /// Match only files last modified after this instant.
    pub last_modified_after: Option<DateTime<Local>>,
}

/// Result log settings pushed to the `ResultLog` by `apply_configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultLogConfig {
    /// Memory log capacity. 0 disables memory logging.
    pub memory_max_records: usize,
    /// File sink base name. `None` disables file logging.
    pub log_file_name: Option<PathBuf>,
    /// Records per file before rotation. 0 = never rotate by count.
    pub log_file_max_records: u64,
}

impl Default for ResultLogConfig {
    fn default() -> Self {
        Self {
            memory_max_records: DEFAULT_MEMORY_MAX_RECORDS,
            log_file_name: None,
            log_file_max_records: DEFAULT_LOG_FILE_MAX_RECORDS,
        }
    }
}
