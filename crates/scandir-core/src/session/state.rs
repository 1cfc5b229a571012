//! Session state and the lock-free cell it lives in.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a session. `Stopped` is initial, `Closed` is terminal.
///
/// ```text
/// Stopped/Completed --schedule--> Scheduled --fires--> Running
/// Running --sweep ends, interval > 0--> Scheduled
/// Running --sweep ends, interval = 0--> Completed
/// any (except Closed) --stop--> Stopped
/// Stopped/Completed/Closed --close--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Stopped,
    Scheduled,
    Running,
    Completed,
    Closed,
}

impl SessionState {
    /// States from which `schedule` and `apply_configuration` are allowed.
    pub fn is_idle(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Completed)
    }

    /// States in which workers must not scan.
    pub fn is_halted(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Stopped => "STOPPED",
            SessionState::Scheduled => "SCHEDULED",
            SessionState::Running => "RUNNING",
            SessionState::Completed => "COMPLETED",
            SessionState::Closed => "CLOSED",
        })
    }
}

/// A state enum that fits in one byte.
pub(crate) trait Packed: Copy + PartialEq {
    fn pack(self) -> u8;
    fn unpack(raw: u8) -> Self;
}

impl Packed for SessionState {
    fn pack(self) -> u8 {
        self as u8
    }

    fn unpack(raw: u8) -> Self {
        match raw {
            0 => SessionState::Stopped,
            1 => SessionState::Scheduled,
            2 => SessionState::Running,
            3 => SessionState::Completed,
            _ => SessionState::Closed,
        }
    }
}

/// Atomic holder for a [`Packed`] state. Reads never block.
pub(crate) struct AtomicState<S: Packed> {
    raw: AtomicU8,
    _state: PhantomData<S>,
}

impl<S: Packed> AtomicState<S> {
    pub(crate) fn new(initial: S) -> Self {
        Self {
            raw: AtomicU8::new(initial.pack()),
            _state: PhantomData,
        }
    }

    pub(crate) fn load(&self) -> S {
        S::unpack(self.raw.load(Ordering::Acquire))
    }

    /// Store `new`, returning the previous state.
    pub(crate) fn swap(&self, new: S) -> S {
        S::unpack(self.raw.swap(new.pack(), Ordering::AcqRel))
    }

    /// Move from `current` to `new` only if nobody changed the state meanwhile.
    pub(crate) fn transition(&self, current: S, new: S) -> Result<S, S> {
        self.raw
            .compare_exchange(current.pack(), new.pack(), Ordering::AcqRel, Ordering::Acquire)
            .map(S::unpack)
            .map_err(S::unpack)
    }
}

/// The session state cell shared with every worker of the session.
pub(crate) type SessionCell = AtomicState<SessionState>;
