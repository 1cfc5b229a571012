//! Single-lane delayed-task scheduler.
//!
//! One background thread holds at most one armed task. Arming replaces the
//! current task; the thread sleeps on its command channel until the task is
//! due, then runs it synchronously. While a task runs, the lane does nothing
//! else, so tasks never overlap. A task that wants a successor arms it
//! itself before returning.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

use crate::error::{Error, Result};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Identifies an armed task for [`SchedulerLane::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskId(u64);

enum LaneCommand {
    Arm { id: TaskId, due: Instant, job: Job },
    Cancel(TaskId),
    Shutdown,
}

struct Armed {
    id: TaskId,
    due: Instant,
    job: Job,
}

pub(crate) struct SchedulerLane {
    tx: Sender<LaneCommand>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerLane {
    pub(crate) fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<LaneCommand>();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run_lane(rx))?;
        Ok(Self {
            tx,
            next_id: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Arm `job` to run after `delay`, replacing any armed task.
    pub(crate) fn arm(&self, delay: Duration, job: Job) -> Result<TaskId> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let due = Instant::now() + delay;
        self.tx
            .send(LaneCommand::Arm { id, due, job })
            .map_err(|_| Error::LaneClosed)?;
        Ok(id)
    }

    /// Drop task `id` if it is still armed. A task that already fired is
    /// unaffected.
    pub(crate) fn cancel(&self, id: TaskId) -> Result<()> {
        self.tx
            .send(LaneCommand::Cancel(id))
            .map_err(|_| Error::LaneClosed)
    }

    /// Stop the lane thread and wait for it, unless called from the lane
    /// itself (a task tearing down its own session).
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(LaneCommand::Shutdown);
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Scheduler lane thread panicked");
        }
    }
}

impl Drop for SchedulerLane {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_lane(rx: Receiver<LaneCommand>) {
    let mut armed: Option<Armed> = None;

    loop {
        let command = match &armed {
            Some(task) => match rx.recv_deadline(task.due) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            None => {
                if let Some(task) = armed.take() {
                    trace!(task = task.id.0, "Running scheduled task");
                    if panic::catch_unwind(AssertUnwindSafe(task.job)).is_err() {
                        error!(task = task.id.0, "Scheduled task panicked");
                    }
                }
            }
            Some(LaneCommand::Arm { id, due, job }) => {
                if let Some(previous) = armed.replace(Armed { id, due, job }) {
                    debug!(replaced = previous.id.0, by = id.0, "Re-armed scheduler lane");
                }
            }
            Some(LaneCommand::Cancel(id)) => {
                if armed.as_ref().is_some_and(|task| task.id == id) {
                    armed = None;
                    trace!(task = id.0, "Cancelled scheduled task");
                }
            }
            Some(LaneCommand::Shutdown) => break,
        }
    }

    debug!("Scheduler lane stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn runs_armed_task_after_delay() {
        let lane = SchedulerLane::spawn("test-lane").unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let armed_at = Instant::now();
        lane.arm(
            Duration::from_millis(30),
            Box::new(move || {
                let _ = tx.send(Instant::now());
            }),
        )
        .unwrap();
        let fired_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired_at - armed_at >= Duration::from_millis(30));
    }

    #[test]
    fn cancelled_task_never_runs() {
        let lane = SchedulerLane::spawn("test-lane").unwrap();
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let id = lane
            .arm(
                Duration::from_millis(50),
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .unwrap();
        lane.cancel(id).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn arming_replaces_previous_task() {
        let lane = SchedulerLane::spawn("test-lane").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded::<u32>();
        let first = tx.clone();
        lane.arm(
            Duration::from_millis(50),
            Box::new(move || {
                let _ = first.send(1);
            }),
        )
        .unwrap();
        lane.arm(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(2);
            }),
        )
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn task_can_arm_its_successor() {
        let lane = Arc::new(SchedulerLane::spawn("test-lane").unwrap());
        let (tx, rx) = crossbeam_channel::unbounded::<u32>();
        let lane_ref = Arc::downgrade(&lane);
        lane.arm(
            Duration::ZERO,
            Box::new(move || {
                let _ = tx.send(1);
                if let Some(lane) = lane_ref.upgrade() {
                    let tx = tx.clone();
                    let _ = lane.arm(
                        Duration::from_millis(5),
                        Box::new(move || {
                            let _ = tx.send(2);
                        }),
                    );
                }
            }),
        )
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    }

    #[test]
    fn panicking_task_does_not_kill_the_lane() {
        let lane = SchedulerLane::spawn("test-lane").unwrap();
        lane.arm(Duration::ZERO, Box::new(|| panic!("boom"))).unwrap();
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        std::thread::sleep(Duration::from_millis(20));
        lane.arm(
            Duration::ZERO,
            Box::new(move || {
                let _ = tx.send(());
            }),
        )
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn arm_after_shutdown_reports_lane_closed() {
        let lane = SchedulerLane::spawn("test-lane").unwrap();
        lane.shutdown();
        assert!(matches!(
            lane.arm(Duration::ZERO, Box::new(|| {})),
            Err(Error::LaneClosed)
        ));
    }
}
