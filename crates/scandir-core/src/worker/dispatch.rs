//! Per-match action dispatch.

use std::fs;
use std::path::Path;
use tracing::{debug, trace};

use super::Worker;
use crate::events::Event;
use crate::model::{Action, ActionSet, ResultRecord};

impl Worker {
    /// Apply the configured actions to one matched file.
    ///
    /// `Delete` and `Notify` are attempted independently. `LogResult` runs
    /// last and records the set that succeeded, itself included; if the log
    /// write fails the record is simply lost and the sweep goes on.
    pub(super) fn dispatch(&self, path: &Path) -> ActionSet {
        let mut taken = ActionSet::EMPTY;

        if self.actions.contains(Action::Delete) {
            match fs::remove_file(path) {
                Ok(()) => {
                    taken.insert(Action::Delete);
                    self.counters.increment_deleted();
                }
                Err(e) => trace!(worker = %self.name, "Cannot delete {}: {e}", path.display()),
            }
        }

        if self.actions.contains(Action::Notify) {
            self.events.publish(Event::FileMatched {
                worker: self.name.clone(),
                path: path.to_path_buf(),
            });
            taken.insert(Action::Notify);
            self.counters.increment_notified();
        }

        if self.actions.contains(Action::LogResult) {
            let record = ResultRecord::new(
                self.name.clone(),
                taken.with(Action::LogResult),
                path.to_path_buf(),
            );
            match self.log.log(record) {
                Ok(()) => {
                    taken.insert(Action::LogResult);
                    self.counters.increment_logged();
                }
                Err(e) => debug!(worker = %self.name, "Cannot log {}: {e}", path.display()),
            }
        }

        trace!(worker = %self.name, "{} -> {taken}", path.display());
        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::session::state::SessionCell;
    use crate::session::SessionState;
    use crate::sink::ResultLog;
    use crate::worker::FileMatch;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn worker_in(tmp: &TempDir, actions: ActionSet, log: Arc<ResultLog>) -> Worker {
        Worker::new(
            "dispatch".into(),
            tmp.path().to_path_buf(),
            actions,
            Arc::new(FileMatch::any()),
            Arc::new(SessionCell::new(SessionState::Running)),
            log,
            EventBus::new(),
        )
        .unwrap()
    }

    #[test]
    fn failed_delete_does_not_block_notify_or_log() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(ResultLog::new(10, EventBus::new()));
        let w = worker_in(&tmp, ActionSet::from(Action::ALL), log.clone());

        // The file does not exist, so the delete fails.
        let taken = w.dispatch(&tmp.path().join("vanished.tmp"));
        assert_eq!(taken, ActionSet::from([Action::Notify, Action::LogResult]));

        let records = log.memory_log();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actions, taken);
    }

    #[test]
    fn failed_log_write_drops_logresult() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(ResultLog::new(0, EventBus::new()));
        let log_path = tmp.path().join("results.jsonl");
        log.new_log_file(Some(log_path.as_path()), 0).unwrap();
        // With the file full and its directory gone, the rotation on the
        // next write fails.
        log.set_log_file_capacity(1);
        log.log(ResultRecord::new("x", ActionSet::EMPTY, "/x".into()))
            .unwrap();
        fs::remove_dir_all(tmp.path()).unwrap();

        let w = Worker::new(
            "dispatch".into(),
            std::env::temp_dir(),
            ActionSet::from([Action::Notify, Action::LogResult]),
            Arc::new(FileMatch::any()),
            Arc::new(SessionCell::new(SessionState::Running)),
            log,
            EventBus::new(),
        )
        .unwrap();
        let taken = w.dispatch(Path::new("/not/really/there"));
        assert_eq!(taken, ActionSet::from([Action::Notify]));
        assert_eq!(w.stats().logged, 0);
    }
}
