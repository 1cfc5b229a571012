//! Directory workers: one per configured root.
//!
//! A worker sweeps its subtree depth-first, pre-order, with an explicit
//! pending queue instead of recursion:
//!
//! 1. The queue starts as `[root]`.
//! 2. Pop the front entry and count it as scanned.
//! 3. A regular file counts as a match and gets the configured actions.
//! 4. A directory's children that pass the match predicate are sorted by name
//!    and inserted, as one block, at the *front* of the queue. A subdirectory
//!    is therefore exhausted before its later siblings are reached.
//!
//! Symbolic links are not followed. A link that passes the predicate is
//! counted as scanned when popped but is neither matched nor descended into.
//!
//! Cancellation is cooperative: the worker checks its own state and the
//! session state before every pop. A stop request never interrupts an entry
//! that is already being processed.
mod dispatch;
pub mod matcher;
mod stats;

pub use matcher::{FileMatch, FileMatcher};
pub use stats::ScanStats;

use compact_str::CompactString;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::model::size::{format_elapsed, plural};
use crate::model::ActionSet;
use crate::session::state::{AtomicState, Packed, SessionCell};
use crate::sink::ResultLog;
use stats::ScanCounters;

/// Lifecycle of one worker.
///
/// `Scheduled` mirrors the session state of the same name; workers are
/// scanned directly by the sweep and never enter it themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Stopped,
    Scheduled,
    Running,
    Completed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerState::Stopped => "STOPPED",
            WorkerState::Scheduled => "SCHEDULED",
            WorkerState::Running => "RUNNING",
            WorkerState::Completed => "COMPLETED",
        })
    }
}

impl Packed for WorkerState {
    fn pack(self) -> u8 {
        self as u8
    }

    fn unpack(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Stopped,
            1 => WorkerState::Scheduled,
            2 => WorkerState::Running,
            _ => WorkerState::Completed,
        }
    }
}

/// Why a sweep loop returned.
enum SweepEnd {
    Exhausted,
    Stopped,
}

/// A file-tree scanner bound to one root directory.
pub struct Worker {
    name: CompactString,
    root: PathBuf,
    actions: ActionSet,
    matcher: Arc<dyn FileMatcher>,
    session: Arc<SessionCell>,
    log: Arc<ResultLog>,
    events: EventBus,
    state: AtomicState<WorkerState>,
    counters: ScanCounters,
    last_error: Mutex<Option<String>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("actions", &self.actions)
            .field("state", &self.state())
            .finish()
    }
}

impl Worker {
    /// Validate `config` and build a worker using [`FileMatch`] as predicate.
    pub(crate) fn from_config(
        config: &WorkerConfig,
        session: Arc<SessionCell>,
        log: Arc<ResultLog>,
        events: EventBus,
    ) -> Result<Self> {
        let matcher = Arc::new(FileMatch::from_config(&config.file_match)?);
        Self::new(
            config.name.clone(),
            config.root_dir.clone(),
            config.actions,
            matcher,
            session,
            log,
            events,
        )
    }

    pub(crate) fn new(
        name: CompactString,
        root: PathBuf,
        actions: ActionSet,
        matcher: Arc<dyn FileMatcher>,
        session: Arc<SessionCell>,
        log: Arc<ResultLog>,
        events: EventBus,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::IllegalArgument("worker name must not be empty".into()));
        }
        if root.as_os_str().is_empty() {
            return Err(Error::IllegalArgument(format!(
                "worker {name:?} has no root directory"
            )));
        }
        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::IllegalArgument(format!(
                    "{}: not a directory",
                    root.display()
                )))
            }
            Err(e) => {
                return Err(Error::IllegalArgument(format!("{}: {e}", root.display())));
            }
        }

        Ok(Self {
            name,
            root,
            actions,
            matcher,
            session,
            log,
            events,
            state: AtomicState::new(WorkerState::Stopped),
            counters: ScanCounters::default(),
            last_error: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn actions(&self) -> ActionSet {
        self.actions
    }

    pub fn state(&self) -> WorkerState {
        self.state.load()
    }

    pub fn stats(&self) -> ScanStats {
        self.counters.snapshot()
    }

    /// Message of the last unrecoverable failure, cleared when a scan starts.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// One-line human summary of the current or last sweep.
    pub fn current_scan_info(&self) -> String {
        let stats = self.stats();
        let mut info = format!(
            "{} [{}] {}: scanned {}, {} matched",
            self.name,
            self.state(),
            self.root.display(),
            plural(stats.scanned, "entry", "entries"),
            stats.matching,
        );
        if !self.actions.is_empty() {
            info.push_str(&format!(
                " ({} deleted, {} notified, {} logged)",
                stats.deleted, stats.notified, stats.logged
            ));
        }
        info.push_str(&format!(" in {}", format_elapsed(stats.elapsed)));
        if let Some(err) = self.last_error() {
            info.push_str(&format!("; failed: {err}"));
        }
        info
    }

    /// Sweep the subtree once, synchronously.
    ///
    /// Fails with `IllegalState` when the session is stopped or closed, or
    /// when this worker is neither `Stopped` nor `Completed`. Ends in
    /// `Completed` when the queue is exhausted and in `Stopped` when a stop
    /// was observed. A panic raised by the match predicate or an action is
    /// turned into `Error::Unrecoverable` and leaves the worker `Stopped`.
    pub fn scan(&self) -> Result<()> {
        self.scan_until(&|| false)
    }

    /// [`scan`](Self::scan), additionally giving up as soon as `halted`
    /// returns true. The session uses it to tie a scan to the sweep that
    /// started it.
    pub(crate) fn scan_until(&self, halted: &dyn Fn() -> bool) -> Result<()> {
        if halted() {
            return Err(Error::illegal_state("scan", "the sweep was stopped"));
        }
        let session = self.session.load();
        if session.is_halted() {
            return Err(Error::illegal_state("scan", format_args!("session is {session}")));
        }
        let current = self.state();
        if !matches!(current, WorkerState::Stopped | WorkerState::Completed) {
            return Err(Error::illegal_state("scan", format_args!("worker is {current}")));
        }
        self.transition(current, WorkerState::Running)
            .map_err(|actual| Error::illegal_state("scan", format_args!("worker is {actual}")))?;

        *self.last_error.lock() = None;
        self.counters.begin();
        info!(worker = %self.name, "Scanning {}", self.root.display());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.sweep(halted)));
        self.counters.end();

        match outcome {
            Ok(SweepEnd::Exhausted) => {
                // A concurrent stop() may already have moved us to Stopped.
                let _ = self.transition(WorkerState::Running, WorkerState::Completed);
                info!(worker = %self.name, "{}", self.current_scan_info());
                Ok(())
            }
            Ok(SweepEnd::Stopped) => {
                let _ = self.transition(WorkerState::Running, WorkerState::Stopped);
                info!(worker = %self.name, "Scan stopped: {}", self.current_scan_info());
                Ok(())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(worker = %self.name, "Scan aborted: {message}");
                *self.last_error.lock() = Some(message.clone());
                self.force(WorkerState::Stopped);
                Err(Error::Unrecoverable(format!("{}: {message}", self.name)))
            }
        }
    }

    /// Request cooperative cancellation. Always accepted; the running sweep
    /// notices it before its next pop.
    pub fn stop(&self) -> Result<()> {
        let old = self.force(WorkerState::Stopped);
        if old != WorkerState::Stopped {
            debug!(worker = %self.name, "Stop requested while {old}");
        }
        Ok(())
    }

    fn sweep(&self, halted: &dyn Fn() -> bool) -> SweepEnd {
        let mut pending: VecDeque<PathBuf> = VecDeque::from([self.root.clone()]);
        loop {
            if self.should_stop() || halted() {
                return SweepEnd::Stopped;
            }
            let Some(path) = pending.pop_front() else {
                return SweepEnd::Exhausted;
            };
            self.counters.increment_scanned();

            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    trace!("Skipping {}: {e}", path.display());
                    continue;
                }
            };

            if meta.is_file() {
                self.counters.increment_matching();
                self.dispatch(&path);
            } else if meta.is_dir() {
                let children = self.matching_children(&path);
                for child in children.into_iter().rev() {
                    pending.push_front(child);
                }
            }
        }
    }

    /// Children of `dir` accepted by the predicate, sorted by file name.
    /// An unreadable directory has no children.
    fn matching_children(&self, dir: &Path) -> Vec<PathBuf> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                trace!("Cannot list {}: {e}", dir.display());
                return Vec::new();
            }
        };

        let mut children: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    trace!("Bad entry in {}: {e}", dir.display());
                    None
                }
            })
            .filter_map(|entry| {
                let path = entry.path();
                let meta = entry.metadata().ok()?;
                self.matcher.matches(&path, &meta).then_some(path)
            })
            .collect();
        children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        children
    }

    fn should_stop(&self) -> bool {
        self.state() != WorkerState::Running || self.session.load().is_halted()
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> Result<(), WorkerState> {
        self.state.transition(from, to)?;
        self.announce(from, to);
        Ok(())
    }

    /// Set the state unconditionally; returns the previous one.
    fn force(&self, to: WorkerState) -> WorkerState {
        let old = self.state.swap(to);
        self.announce(old, to);
        old
    }

    fn announce(&self, old: WorkerState, new: WorkerState) {
        if old == new {
            return;
        }
        debug!(worker = %self.name, "{old} -> {new}");
        self.events.publish(Event::WorkerStateChanged {
            worker: self.name.clone(),
            old,
            new,
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;
    use crate::session::SessionState;
    use std::fs::Metadata;
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        session: Arc<SessionCell>,
        log: Arc<ResultLog>,
        events: EventBus,
    }

    /// ```text
    /// root/
    ///   a
    ///   b
    ///   sub/
    ///     c
    /// ```
    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        for path in [root.join("a"), root.join("b"), root.join("sub").join("c")] {
            let mut f = fs::File::create(path).unwrap();
            f.write_all(b"data").unwrap();
        }
        let events = EventBus::new();
        Fixture {
            _tmp: tmp,
            root,
            session: Arc::new(SessionCell::new(SessionState::Running)),
            log: Arc::new(ResultLog::new(100, events.clone())),
            events,
        }
    }

    fn worker(fx: &Fixture, actions: ActionSet, matcher: Arc<dyn FileMatcher>) -> Worker {
        Worker::new(
            "test".into(),
            fx.root.clone(),
            actions,
            matcher,
            fx.session.clone(),
            fx.log.clone(),
            fx.events.clone(),
        )
        .unwrap()
    }

    fn matched_names(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::FileMatched { path, .. } => {
                    Some(path.file_name().unwrap().to_string_lossy().into_owned())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sweep_counts_every_entry_and_completes() {
        let fx = fixture();
        let sub = fx.events.subscribe();
        let w = worker(&fx, ActionSet::from([Action::Notify]), Arc::new(FileMatch::any()));

        w.scan().unwrap();

        assert_eq!(w.state(), WorkerState::Completed);
        let stats = w.stats();
        assert_eq!(stats.scanned, 5);
        assert_eq!(stats.matching, 3);
        assert_eq!(stats.notified, 3);
        let events: Vec<Event> = sub.receiver.try_iter().collect();
        assert_eq!(matched_names(&events), vec!["a", "b", "c"]);
    }

    #[test]
    fn subdirectory_is_exhausted_before_later_siblings() {
        let fx = fixture();
        // "sub" sorts before "z", so c must be reached before z.
        fs::write(fx.root.join("z"), "late").unwrap();
        let sub = fx.events.subscribe();
        let w = worker(&fx, ActionSet::from([Action::Notify]), Arc::new(FileMatch::any()));

        w.scan().unwrap();
        let events: Vec<Event> = sub.receiver.try_iter().collect();
        assert_eq!(matched_names(&events), vec!["a", "b", "c", "z"]);
    }

    #[test]
    fn predicate_filters_children_before_queueing() {
        let fx = fixture();
        let not_b = |p: &Path, _: &Metadata| p.file_name().is_some_and(|n| n != "b");
        let w = worker(&fx, ActionSet::EMPTY, Arc::new(not_b));

        w.scan().unwrap();
        let stats = w.stats();
        assert_eq!(stats.scanned, 4);
        assert_eq!(stats.matching, 2);
    }

    #[test]
    fn delete_and_log_record_succeeded_actions() {
        let fx = fixture();
        let w = worker(
            &fx,
            ActionSet::from([Action::Delete, Action::LogResult]),
            Arc::new(FileMatch::any()),
        );

        w.scan().unwrap();
        assert!(!fx.root.join("a").exists());
        assert!(!fx.root.join("sub").join("c").exists());
        let records = fx.log.memory_log();
        assert_eq!(records.len(), 3);
        for record in records {
            assert_eq!(
                record.actions,
                ActionSet::from([Action::Delete, Action::LogResult])
            );
            assert_eq!(record.worker, "test");
        }
        assert_eq!(w.stats().deleted, 3);
    }

    #[test]
    fn scan_rejected_while_session_stopped() {
        let fx = fixture();
        fx.session.swap(SessionState::Stopped);
        let w = worker(&fx, ActionSet::EMPTY, Arc::new(FileMatch::any()));
        let err = w.scan().unwrap_err();
        assert!(err.is_illegal_state());
        assert_eq!(w.state(), WorkerState::Stopped);
    }

    #[test]
    fn completed_worker_can_scan_again() {
        let fx = fixture();
        let w = worker(&fx, ActionSet::EMPTY, Arc::new(FileMatch::any()));
        w.scan().unwrap();
        w.scan().unwrap();
        assert_eq!(w.state(), WorkerState::Completed);
        assert_eq!(w.stats().scanned, 5);
    }

    #[test]
    fn panicking_predicate_is_unrecoverable() {
        let fx = fixture();
        let explode = |_: &Path, _: &Metadata| -> bool { panic!("predicate exploded") };
        let w = worker(&fx, ActionSet::EMPTY, Arc::new(explode));

        let err = w.scan().unwrap_err();
        assert!(matches!(err, Error::Unrecoverable(_)));
        assert_eq!(w.state(), WorkerState::Stopped);
        assert_eq!(w.last_error().as_deref(), Some("predicate exploded"));
        assert!(w.current_scan_info().contains("failed: predicate exploded"));
    }

    #[test]
    fn missing_root_is_illegal_argument() {
        let fx = fixture();
        let err = Worker::new(
            "ghost".into(),
            fx.root.join("missing"),
            ActionSet::EMPTY,
            Arc::new(FileMatch::any()),
            fx.session.clone(),
            fx.log.clone(),
            fx.events.clone(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_scanned_but_not_followed() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("dir")).unwrap();
        fs::write(root.join("dir").join("inner"), "x").unwrap();
        fs::write(root.join("real.txt"), "x").unwrap();
        symlink(root.join("real.txt"), root.join("link_file")).unwrap();
        symlink(root.join("dir"), root.join("link_dir")).unwrap();

        let events = EventBus::new();
        let sub = events.subscribe();
        let w = Worker::new(
            "links".into(),
            root,
            ActionSet::from([Action::Notify]),
            Arc::new(FileMatch::any()),
            Arc::new(SessionCell::new(SessionState::Running)),
            Arc::new(ResultLog::new(10, events.clone())),
            events,
        )
        .unwrap();

        w.scan().unwrap();
        let stats = w.stats();
        // root, dir, dir/inner, link_dir, link_file, real.txt
        assert_eq!(stats.scanned, 6);
        assert_eq!(stats.matching, 2);
        let events: Vec<Event> = sub.receiver.try_iter().collect();
        assert_eq!(matched_names(&events), vec!["inner", "real.txt"]);
    }

    #[test]
    fn halted_scan_stops_before_first_entry() {
        let fx = fixture();
        let w = worker(&fx, ActionSet::from([Action::Delete]), Arc::new(FileMatch::any()));

        let err = w.scan_until(&|| true).unwrap_err();
        assert!(err.is_illegal_state());
        assert_eq!(w.state(), WorkerState::Stopped);
        assert!(fx.root.join("a").exists());
    }

    #[test]
    fn scan_info_mentions_counts() {
        let fx = fixture();
        let w = worker(&fx, ActionSet::from([Action::Notify]), Arc::new(FileMatch::any()));
        w.scan().unwrap();
        let info = w.current_scan_info();
        assert!(info.starts_with("test [COMPLETED]"), "{info}");
        assert!(info.contains("scanned 5 entries"), "{info}");
        assert!(info.contains("3 matched"), "{info}");
        assert!(info.contains("3 notified"), "{info}");
    }
}
