//! Per-sweep counters: updated by the scanning thread, read from anywhere.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters for the current (or last) sweep of one worker.
#[derive(Debug, Default)]
pub(crate) struct ScanCounters {
    scanned: AtomicU64,
    matching: AtomicU64,
    deleted: AtomicU64,
    notified: AtomicU64,
    logged: AtomicU64,
    /// Start instant and, once finished, the final elapsed time.
    timing: Mutex<(Option<Instant>, Option<Duration>)>,
}

impl ScanCounters {
    /// Zero every counter and start the clock.
    pub(crate) fn begin(&self) {
        for counter in [
            &self.scanned,
            &self.matching,
            &self.deleted,
            &self.notified,
            &self.logged,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.timing.lock() = (Some(Instant::now()), None);
    }

    /// Freeze the elapsed time.
    pub(crate) fn end(&self) {
        let mut timing = self.timing.lock();
        if let (Some(start), None) = *timing {
            timing.1 = Some(start.elapsed());
        }
    }

    pub(crate) fn increment_scanned(&self) {
        self.scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_matching(&self) {
        self.matching.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_notified(&self) {
        self.notified.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_logged(&self) {
        self.logged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ScanStats {
        let elapsed = match *self.timing.lock() {
            (_, Some(done)) => done,
            (Some(start), None) => start.elapsed(),
            (None, None) => Duration::ZERO,
        };
        ScanStats {
            scanned: self.scanned.load(Ordering::Relaxed),
            matching: self.matching.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            notified: self.notified.load(Ordering::Relaxed),
            logged: self.logged.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Point-in-time copy of a worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Entries popped from the pending queue (files, directories, other).
    pub scanned: u64,
    /// Regular files reached, i.e. files that passed the match predicate.
    pub matching: u64,
    pub deleted: u64,
    pub notified: u64,
    pub logged: u64,
    /// Duration of the sweep so far, or of the last finished sweep.
    pub elapsed: Duration,
}
