//! One matched file and what was done about it.

use chrono::{DateTime, Local};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ActionSet;

/// Immutable outcome of a single match, handed to the result log.
///
/// Written to the file sink as one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Name of the worker that matched the file.
    pub worker: CompactString,
    /// Actions that actually succeeded for this file.
    pub actions: ActionSet,
    /// Path of the matched file.
    pub file: PathBuf,
    /// When the match was processed.
    pub timestamp: DateTime<Local>,
}

impl ResultRecord {
    pub fn new(worker: impl Into<CompactString>, actions: ActionSet, file: PathBuf) -> Self {
        Self {
            worker: worker.into(),
            actions,
            file,
            timestamp: Local::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;

    #[test]
    fn json_line_has_no_newlines() {
        let record = ResultRecord::new(
            "tmp-cleaner",
            ActionSet::from([Action::Delete, Action::LogResult]),
            PathBuf::from("/tmp/old.log"),
        );
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""worker":"tmp-cleaner""#));
        assert!(line.contains(r#""actions":["DELETE","LOGRESULT"]"#));
    }
}
