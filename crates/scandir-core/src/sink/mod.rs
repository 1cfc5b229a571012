//! Result log: where workers record what they matched.
//!
//! Two sinks, each independently configurable and usable together:
//!
//! - **Memory:** a bounded FIFO of the most recent records. The first eviction
//!   after creation or a clear publishes [`Event::MemoryLogFull`].
//! - **File:** JSON lines appended to a base file. When the record count
//!   reaches the file capacity the file is rotated: renamed with
//!   [`ROTATED_SUFFIX`] and replaced by a fresh empty file under the base
//!   name. `new_log_file` and `clear_logs` rotate unconditionally.
//!
//! All state lives behind one mutex. Events are collected while it is held
//! and published only after the guard is dropped, so listeners may call back
//! into the log.
pub mod file;
mod memory;

pub use file::{rotated_path, ROTATED_SUFFIX};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::model::ResultRecord;
use file::LogFile;
use memory::MemoryLog;

struct SinkState {
    memory: MemoryLog,
    file: Option<LogFile>,
    file_capacity: u64,
}

impl SinkState {
    /// Append to the file sink, rotating first if the current file is full.
    fn write_file(&mut self, record: &ResultRecord, events: &mut Vec<Event>) -> Result<()> {
        let needs_rotation = match &self.file {
            None => return Ok(()),
            Some(file) => self.file_capacity > 0 && file.count() >= self.file_capacity,
        };
        if needs_rotation {
            let base = self.file.as_ref().map(|f| f.path().to_path_buf());
            debug!(capacity = self.file_capacity, "result log file full; rotating");
            self.switch_file(base, events)?;
        }
        match self.file.as_mut() {
            Some(file) => file.append(record),
            None => Ok(()),
        }
    }

    /// Close (and rotate) the current file, then open `next` fresh.
    ///
    /// Records a `LogFileSwitched` event, even on failure, unless file logging
    /// was off before and still is.
    fn switch_file(&mut self, next: Option<PathBuf>, events: &mut Vec<Event>) -> Result<()> {
        let mut first_err = None;
        let had_file = self.file.is_some();

        if let Some(current) = self.file.take() {
            if let Err(e) = current.rotate() {
                warn!("Failed to rotate result log file: {e}");
                first_err = Some(e);
            }
        }

        if let Some(path) = next {
            match LogFile::create(&path) {
                Ok(file) => self.file = Some(file),
                Err(e) => {
                    warn!("Failed to open result log file {}: {e}", path.display());
                    first_err.get_or_insert(e);
                }
            }
        }

        if had_file || self.file.is_some() {
            events.push(Event::LogFileSwitched {
                file: self.file.as_ref().map(|f| f.path().to_path_buf()),
            });
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Thread-safe result log shared by every worker of a session.
pub struct ResultLog {
    state: Mutex<SinkState>,
    events: EventBus,
}

impl ResultLog {
    /// A log with the memory sink at `memory_capacity` and no file sink.
    pub fn new(memory_capacity: usize, events: EventBus) -> Self {
        Self {
            state: Mutex::new(SinkState {
                memory: MemoryLog::new(memory_capacity),
                file: None,
                file_capacity: 0,
            }),
            events,
        }
    }

    /// Record one result in every enabled sink.
    ///
    /// A file write failure is returned to the caller; the memory sink has
    /// already been updated by then.
    pub fn log(&self, record: ResultRecord) -> Result<()> {
        let mut pending = Vec::new();
        let result = {
            let mut state = self.state.lock();
            if state.memory.is_enabled() {
                let capacity = state.memory.capacity();
                if state.memory.push(record.clone()) {
                    pending.push(Event::MemoryLogFull { capacity });
                }
            }
            state.write_file(&record, &mut pending)
        };
        self.publish(pending);
        result
    }

    /// Switch file logging to `file` (or disable it with `None`) and set the
    /// per-file record capacity. Always rotates the current file, even when
    /// `file` names the same path.
    pub fn new_log_file(&self, file: Option<&Path>, max_records: u64) -> Result<()> {
        let mut pending = Vec::new();
        let result = {
            let mut state = self.state.lock();
            state.file_capacity = max_records;
            state.switch_file(file.map(Path::to_path_buf), &mut pending)
        };
        match file {
            Some(path) => info!(
                "Result log file set to {} (max {} records)",
                path.display(),
                max_records
            ),
            None => info!("Result log file disabled"),
        }
        self.publish(pending);
        result
    }

    /// Check that `path` can be opened as a log file without touching any
    /// log state. Creates missing parent directories.
    pub fn check_log_file(path: &Path) -> Result<()> {
        file::check_writable(path)?;
        Ok(())
    }

    /// Set the memory log capacity. 0 disables memory logging.
    pub fn set_memory_log_capacity(&self, capacity: usize) {
        self.state.lock().memory.set_capacity(capacity);
        debug!(capacity, "memory log capacity changed");
    }

    /// Set the per-file record capacity. 0 means never rotate by count.
    pub fn set_log_file_capacity(&self, capacity: u64) {
        self.state.lock().file_capacity = capacity;
        debug!(capacity, "log file capacity changed");
    }

    /// Empty the memory log and rotate the current log file, if any.
    pub fn clear_logs(&self) -> Result<()> {
        let mut pending = vec![Event::MemoryLogCleared];
        let result = {
            let mut state = self.state.lock();
            state.memory.clear();
            match state.file.as_ref().map(|f| f.path().to_path_buf()) {
                Some(base) => state.switch_file(Some(base), &mut pending),
                None => Ok(()),
            }
        };
        info!("Result logs cleared");
        self.publish(pending);
        result
    }

    /// Flush and close the log file without rotating it.
    pub fn close(&self) -> Result<()> {
        let closed = self.state.lock().file.take();
        let Some(file) = closed else {
            return Ok(());
        };
        let result = file.close();
        self.publish(vec![Event::LogFileSwitched { file: None }]);
        Ok(result?)
    }

    /// Copy of the memory log, oldest first.
    pub fn memory_log(&self) -> Vec<ResultRecord> {
        self.state.lock().memory.snapshot()
    }

    pub fn memory_log_len(&self) -> usize {
        self.state.lock().memory.len()
    }

    pub fn memory_log_capacity(&self) -> usize {
        self.state.lock().memory.capacity()
    }

    pub fn log_file_capacity(&self) -> u64 {
        self.state.lock().file_capacity
    }

    /// Base name of the current log file, if file logging is enabled.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.state.lock().file.as_ref().map(|f| f.path().to_path_buf())
    }

    /// Records written to the current log file since it was opened.
    pub fn log_file_record_count(&self) -> u64 {
        self.state.lock().file.as_ref().map_or(0, |f| f.count())
    }

    fn publish(&self, events: Vec<Event>) {
        for event in events {
            self.events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, ActionSet};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(i: usize) -> ResultRecord {
        ResultRecord::new(
            "w",
            ActionSet::from([Action::LogResult]),
            PathBuf::from(format!("/data/f{i}")),
        )
    }

    fn drain(sub: &crate::events::Subscription) -> Vec<Event> {
        sub.receiver.try_iter().collect()
    }

    #[test]
    fn memory_capacity_keeps_latest_and_fires_full_once() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let log = ResultLog::new(3, bus);

        for i in 0..4 {
            log.log(record(i)).unwrap();
        }

        let kept: Vec<PathBuf> = log.memory_log().into_iter().map(|r| r.file).collect();
        assert_eq!(
            kept,
            vec![
                PathBuf::from("/data/f1"),
                PathBuf::from("/data/f2"),
                PathBuf::from("/data/f3")
            ]
        );
        let full_events = drain(&sub)
            .into_iter()
            .filter(|e| matches!(e, Event::MemoryLogFull { .. }))
            .count();
        assert_eq!(full_events, 1);
    }

    #[test]
    fn file_rotates_on_the_write_after_capacity() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("results.jsonl");
        let bus = EventBus::new();
        let log = ResultLog::new(0, bus.clone());
        log.new_log_file(Some(base.as_path()), 3).unwrap();
        let sub = bus.subscribe();

        for i in 0..3 {
            log.log(record(i)).unwrap();
        }
        assert_eq!(log.log_file_record_count(), 3);
        assert!(drain(&sub).is_empty());

        log.log(record(3)).unwrap();
        assert_eq!(log.log_file_record_count(), 1);
        assert_eq!(
            drain(&sub),
            vec![Event::LogFileSwitched {
                file: Some(base.clone())
            }]
        );

        let old = fs::read_to_string(rotated_path(&base)).unwrap();
        let new = fs::read_to_string(&base).unwrap();
        assert_eq!(old.lines().count(), 3);
        assert_eq!(new.lines().count(), 1);
        assert!(new.contains("/data/f3"));
    }

    #[test]
    fn new_log_file_with_same_name_still_rotates() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("results.jsonl");
        let log = ResultLog::new(0, EventBus::new());
        log.new_log_file(Some(base.as_path()), 0).unwrap();
        log.log(record(0)).unwrap();

        log.new_log_file(Some(base.as_path()), 0).unwrap();
        assert_eq!(log.log_file_record_count(), 0);
        assert_eq!(
            fs::read_to_string(rotated_path(&base)).unwrap().lines().count(),
            1
        );
    }

    #[test]
    fn unbounded_file_never_rotates() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("results.jsonl");
        let log = ResultLog::new(0, EventBus::new());
        log.new_log_file(Some(base.as_path()), 0).unwrap();
        for i in 0..50 {
            log.log(record(i)).unwrap();
        }
        assert_eq!(log.log_file_record_count(), 50);
        assert!(!rotated_path(&base).exists());
    }

    #[test]
    fn disabling_file_logging_reports_none() {
        let tmp = TempDir::new().unwrap();
        let bus = EventBus::new();
        let log = ResultLog::new(0, bus.clone());
        log.new_log_file(Some(tmp.path().join("r.jsonl").as_path()), 10).unwrap();
        let sub = bus.subscribe();

        log.new_log_file(None, 10).unwrap();
        assert_eq!(log.log_file(), None);
        assert_eq!(drain(&sub), vec![Event::LogFileSwitched { file: None }]);
        // Logging with no sinks enabled is a no-op, not an error.
        log.log(record(0)).unwrap();
    }

    #[test]
    fn disabling_when_already_disabled_is_silent() {
        let bus = EventBus::new();
        let log = ResultLog::new(0, bus.clone());
        let sub = bus.subscribe();

        log.new_log_file(None, 10).unwrap();
        log.clear_logs().unwrap();
        assert_eq!(drain(&sub), vec![Event::MemoryLogCleared]);
    }

    #[test]
    fn check_log_file_rejects_directories_only() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("taken");
        fs::create_dir(&dir).unwrap();
        assert!(ResultLog::check_log_file(&dir).is_err());

        let fresh = tmp.path().join("nested").join("r.jsonl");
        ResultLog::check_log_file(&fresh).unwrap();
        assert!(fresh.exists());
    }

    #[test]
    fn clear_logs_empties_memory_and_rotates_file() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("results.jsonl");
        let bus = EventBus::new();
        let log = ResultLog::new(2, bus.clone());
        log.new_log_file(Some(base.as_path()), 100).unwrap();
        for i in 0..3 {
            log.log(record(i)).unwrap();
        }
        let sub = bus.subscribe();

        log.clear_logs().unwrap();
        assert_eq!(log.memory_log_len(), 0);
        assert_eq!(log.log_file_record_count(), 0);
        assert_eq!(
            drain(&sub),
            vec![
                Event::MemoryLogCleared,
                Event::LogFileSwitched {
                    file: Some(base.clone())
                }
            ]
        );

        // The full flag is re-armed by the clear.
        for i in 0..3 {
            log.log(record(i)).unwrap();
        }
        assert!(drain(&sub)
            .iter()
            .any(|e| matches!(e, Event::MemoryLogFull { capacity: 2 })));
    }

    #[test]
    fn listener_can_reenter_the_log() {
        let bus = EventBus::new();
        let log = Arc::new(ResultLog::new(1, bus.clone()));
        let reentrant = Arc::clone(&log);
        bus.subscribe_fn(move |event| {
            if let Event::MemoryLogFull { .. } = event {
                // Would deadlock if events were published under the sink lock.
                let _ = reentrant.memory_log_len();
                reentrant.set_memory_log_capacity(2);
            }
        });

        log.log(record(0)).unwrap();
        log.log(record(1)).unwrap();
        assert_eq!(log.memory_log_capacity(), 2);
    }

    #[test]
    fn open_failure_is_reported_and_disables_file() {
        let tmp = TempDir::new().unwrap();
        // A directory cannot be opened as a log file.
        let dir = tmp.path().join("taken");
        fs::create_dir(&dir).unwrap();
        let log = ResultLog::new(0, EventBus::new());
        assert!(log.new_log_file(Some(dir.as_path()), 10).is_err());
        assert_eq!(log.log_file(), None);
    }
}
