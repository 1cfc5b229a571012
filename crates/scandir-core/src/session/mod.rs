//! Session controller: the state machine that drives every worker.
//!
//! Administrative operations (`schedule`, `stop`, `close`,
//! `apply_configuration`, `register_worker`) share one non-blocking gate. A
//! caller that finds the gate held gets [`Error::Busy`] immediately. Reads
//! such as [`SessionController::state`] never touch the gate.
//!
//! Sweeps run on a dedicated scheduler lane. When an armed task fires it
//! takes the gate (blocking, the admin sections are short), checks that it
//! was not cancelled and that the session is still `Scheduled`, then releases
//! the gate and scans each worker in registration order. Finishing a sweep
//! arms the next one when an interval is configured.
mod scheduler;
pub mod state;

pub use state::SessionState;

use parking_lot::{Mutex, MutexGuard, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, SessionConfig, DEFAULT_MEMORY_MAX_RECORDS};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::model::size::{format_elapsed, plural};
use crate::model::ActionSet;
use crate::sink::ResultLog;
use crate::worker::{FileMatcher, Worker};
use scheduler::{SchedulerLane, TaskId};
use state::SessionCell;

const LANE_THREAD_NAME: &str = "scandir-scheduler";

/// The task currently armed on the lane, if any.
struct ArmedTask {
    id: TaskId,
    cancelled: Arc<AtomicBool>,
}

/// State only touched while holding the administrative gate.
struct Admin {
    armed: Option<ArmedTask>,
    interval: Duration,
}

struct Shared {
    state: Arc<SessionCell>,
    gate: Mutex<Admin>,
    /// Replaced only under the gate; read freely.
    workers: RwLock<Vec<Arc<Worker>>>,
    log: Arc<ResultLog>,
    events: EventBus,
    lane: SchedulerLane,
    /// Bumped by every `stop`. A sweep only acts while the value it
    /// started under is still current.
    run: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Owns the session state, the worker registry, the result log and the
/// scheduler lane.
///
/// Cloning yields another handle to the same session. The lane thread stops
/// on [`close`](Self::close) or when the last handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// New `Stopped` session with no workers and a fresh event bus.
    pub fn new() -> Result<Self> {
        Self::with_events(EventBus::new())
    }

    /// New session publishing on an existing bus.
    pub fn with_events(events: EventBus) -> Result<Self> {
        let lane = SchedulerLane::spawn(LANE_THREAD_NAME)?;
        let log = Arc::new(ResultLog::new(DEFAULT_MEMORY_MAX_RECORDS, events.clone()));
        Ok(Self {
            shared: Arc::new(Shared {
                state: Arc::new(SessionCell::new(SessionState::Stopped)),
                gate: Mutex::new(Admin {
                    armed: None,
                    interval: Duration::ZERO,
                }),
                workers: RwLock::new(Vec::new()),
                log,
                events,
                lane,
                run: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }),
        })
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Current state. Lock-free.
    pub fn state(&self) -> SessionState {
        self.shared.state.load()
    }

    /// Registered workers in scan order.
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.shared.workers.read().clone()
    }

    pub fn worker(&self, name: &str) -> Option<Arc<Worker>> {
        self.shared
            .workers
            .read()
            .iter()
            .find(|w| w.name() == name)
            .cloned()
    }

    pub fn result_log(&self) -> &Arc<ResultLog> {
        &self.shared.log
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Message of the last unrecoverable sweep failure.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().clone()
    }

    // ── Administrative operations ─────────────────────────────────

    /// Arm a sweep after `delay`. With a non-zero `interval` every finished
    /// sweep arms the next one `interval` after it ended.
    pub fn schedule(&self, delay: Duration, interval: Duration) -> Result<()> {
        let mut admin = self.gate()?;
        let state = self.state();
        if !state.is_idle() {
            return Err(Error::illegal_state("schedule", state));
        }

        admin.interval = interval;
        self.arm(&mut admin, delay)?;
        let old = self.shared.state.swap(SessionState::Scheduled);
        drop(admin);

        info!(
            "Session scheduled in {} (interval {})",
            format_elapsed(delay),
            if interval.is_zero() {
                "none".to_string()
            } else {
                format_elapsed(interval)
            }
        );
        self.announce(old, SessionState::Scheduled);
        Ok(())
    }

    /// Run one sweep now.
    pub fn start(&self) -> Result<()> {
        self.schedule(Duration::ZERO, Duration::ZERO)
    }

    /// Cancel the armed task, stop every worker and enter `Stopped`.
    ///
    /// Every worker is asked to stop even if an earlier step failed; all
    /// failures come back together as [`Error::Aggregate`]. A closed
    /// session stays closed.
    pub fn stop(&self) -> Result<()> {
        let mut admin = self.gate()?;
        if self.state() == SessionState::Closed {
            return Ok(());
        }

        let mut errors = Vec::new();
        if let Some(task) = admin.armed.take() {
            task.cancelled.store(true, Ordering::Release);
            if let Err(e) = self.shared.lane.cancel(task.id) {
                errors.push(e);
            }
        }
        self.shared.run.fetch_add(1, Ordering::AcqRel);
        let old = self.shared.state.swap(SessionState::Stopped);
        for worker in self.shared.workers.read().iter() {
            if let Err(e) = worker.stop() {
                errors.push(e);
            }
        }
        drop(admin);

        if old != SessionState::Stopped {
            info!("Session stopped (was {old})");
        }
        self.announce(old, SessionState::Stopped);

        if errors.is_empty() {
            Ok(())
        } else {
            warn!("Stop finished with {}", plural(errors.len() as u64, "error", "errors"));
            Err(Error::Aggregate(errors))
        }
    }

    /// Enter the terminal `Closed` state, drop the workers and shut the lane
    /// down. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut admin = self.gate()?;
        let state = self.state();
        match state {
            SessionState::Closed => return Ok(()),
            SessionState::Stopped | SessionState::Completed => {}
            _ => return Err(Error::illegal_state("close", state)),
        }

        admin.armed = None;
        let old = self.shared.state.swap(SessionState::Closed);
        let workers = std::mem::take(&mut *self.shared.workers.write());
        drop(admin);

        self.announce(old, SessionState::Closed);
        self.shared.lane.shutdown();
        if let Err(e) = self.shared.log.close() {
            warn!("Result log did not close cleanly: {e}");
        }
        info!(
            "Session closed ({} released)",
            plural(workers.len() as u64, "worker", "workers")
        );
        Ok(())
    }

    /// Rebuild the worker registry and result log settings from `store`.
    ///
    /// With `from_memory == false` the store reloads its file first. Every
    /// worker and the log file are validated before anything is touched, so
    /// a bad root or an unwritable log file leaves the previous
    /// configuration in place.
    pub fn apply_configuration(&self, from_memory: bool, store: &ConfigStore) -> Result<()> {
        let _admin = self.gate()?;
        let state = self.state();
        if !state.is_idle() {
            return Err(Error::illegal_state("apply configuration", state));
        }

        let config = if from_memory {
            store.config()
        } else {
            store.load()?
        };
        let workers = self.build_workers(&config)?;
        let sink = &config.result_log;
        if let Some(path) = &sink.log_file_name {
            ResultLog::check_log_file(path)?;
        }

        let count = workers.len();
        *self.shared.workers.write() = workers;
        self.shared.log.set_memory_log_capacity(sink.memory_max_records);
        self.shared
            .log
            .new_log_file(sink.log_file_name.as_deref(), sink.log_file_max_records)?;

        info!(
            "Applied configuration {:?}: {}",
            config.name,
            plural(count as u64, "worker", "workers")
        );
        Ok(())
    }

    /// Add one worker with a caller-supplied predicate.
    pub fn register_worker(
        &self,
        name: &str,
        root: impl Into<PathBuf>,
        actions: ActionSet,
        matcher: Arc<dyn FileMatcher>,
    ) -> Result<Arc<Worker>> {
        let _admin = self.gate()?;
        let state = self.state();
        if !state.is_idle() {
            return Err(Error::illegal_state("register a worker", state));
        }
        if self.worker(name).is_some() {
            return Err(Error::IllegalArgument(format!(
                "worker {name:?} is already registered"
            )));
        }

        let worker = Arc::new(Worker::new(
            name.into(),
            root.into(),
            actions,
            matcher,
            self.shared.state.clone(),
            self.shared.log.clone(),
            self.shared.events.clone(),
        )?);
        self.shared.workers.write().push(worker.clone());
        debug!(worker = name, "Registered {}", worker.root().display());
        Ok(worker)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn gate(&self) -> Result<MutexGuard<'_, Admin>> {
        self.shared.gate.try_lock().ok_or_else(|| {
            debug!("Administrative gate busy");
            Error::Busy
        })
    }

    fn build_workers(&self, config: &SessionConfig) -> Result<Vec<Arc<Worker>>> {
        let mut workers: Vec<Arc<Worker>> = Vec::with_capacity(config.workers.len());
        for wc in &config.workers {
            if workers.iter().any(|w| w.name() == wc.name) {
                return Err(Error::IllegalArgument(format!(
                    "duplicate worker name {:?}",
                    wc.name
                )));
            }
            workers.push(Arc::new(Worker::from_config(
                wc,
                self.shared.state.clone(),
                self.shared.log.clone(),
                self.shared.events.clone(),
            )?));
        }
        Ok(workers)
    }

    /// Arm the sweep task on the lane. Caller holds the gate.
    fn arm(&self, admin: &mut Admin, delay: Duration) -> Result<()> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let session: Weak<Shared> = Arc::downgrade(&self.shared);
        let id = self.shared.lane.arm(
            delay,
            Box::new(move || {
                if let Some(shared) = session.upgrade() {
                    SessionController { shared }.fire(&flag);
                }
            }),
        )?;
        admin.armed = Some(ArmedTask { id, cancelled });
        Ok(())
    }

    /// Body of every armed task. Runs on the lane thread.
    fn fire(&self, cancelled: &AtomicBool) {
        let (run, workers) = {
            let mut admin = self.shared.gate.lock();
            if cancelled.load(Ordering::Acquire) {
                debug!("Armed sweep was cancelled before it fired");
                return;
            }
            admin.armed = None;
            if let Err(actual) = self
                .shared
                .state
                .transition(SessionState::Scheduled, SessionState::Running)
            {
                debug!("Armed sweep skipped: session is {actual}");
                return;
            }
            (self.shared.run.load(Ordering::Acquire), self.workers())
        };
        self.announce(SessionState::Scheduled, SessionState::Running);

        info!("Sweep started: {}", plural(workers.len() as u64, "worker", "workers"));
        let started = Instant::now();
        let outcome = self.sweep(run, &workers);
        let elapsed = started.elapsed();

        let mut admin = self.shared.gate.lock();
        if let Err(e) = &outcome {
            error!("Sweep aborted after {}: {e}", format_elapsed(elapsed));
            *self.shared.last_error.lock() = Some(e.to_string());
        }
        // A stop (and perhaps a new schedule) took over while we swept.
        if !self.is_current(run) {
            debug!("Sweep ended after the session left RUNNING");
            return;
        }
        let next = match outcome {
            Err(_) => SessionState::Stopped,
            Ok(()) if admin.interval.is_zero() => SessionState::Completed,
            Ok(()) => {
                let interval = admin.interval;
                match self.arm(&mut admin, interval) {
                    Ok(()) => SessionState::Scheduled,
                    Err(e) => {
                        error!("Cannot re-arm sweep: {e}");
                        *self.shared.last_error.lock() = Some(e.to_string());
                        SessionState::Stopped
                    }
                }
            }
        };
        let old = self.shared.state.swap(next);
        drop(admin);

        info!("Sweep finished in {} -> {next}", format_elapsed(elapsed));
        self.announce(old, next);
    }

    /// Scan each worker in order until the list ends or the run is stopped.
    fn sweep(&self, run: u64, workers: &[Arc<Worker>]) -> Result<()> {
        let halted = || !self.is_current(run);
        for worker in workers {
            if halted() {
                debug!("Sweep interrupted before {}", worker.name());
                break;
            }
            match worker.scan_until(&halted) {
                Ok(()) => {}
                Err(e @ Error::Unrecoverable(_)) => return Err(e),
                Err(e) => debug!(worker = worker.name(), "Skipped: {e}"),
            }
        }
        Ok(())
    }

    /// True while the sweep started under `run` still owns the session.
    fn is_current(&self, run: u64) -> bool {
        self.shared.run.load(Ordering::Acquire) == run && self.state() == SessionState::Running
    }

    fn announce(&self, old: SessionState, new: SessionState) {
        if old == new {
            return;
        }
        debug!("Session {old} -> {new}");
        self.shared
            .events
            .publish(Event::SessionStateChanged { old, new });
    }
}
