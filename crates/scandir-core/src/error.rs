//! Error type shared by every scandir component.

use std::fmt;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything a session, worker, or result log can report to its caller.
///
/// `IllegalState` and `Busy` form the "illegal state" class: the operation was
/// not valid right now and the caller may retry later. Nothing in this crate
/// retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation is not valid for the current session or worker state.
    #[error("cannot {operation} while {state}")]
    IllegalState {
        operation: &'static str,
        state: String,
    },

    /// Another administrative operation currently holds the gate.
    #[error("another administrative operation is in progress")]
    Busy,

    /// Invalid configuration input (missing root, bad pattern, empty name).
    #[error("invalid argument: {0}")]
    IllegalArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// A sweep failed in a way that cannot be skipped over.
    #[error("unrecoverable scan failure: {0}")]
    Unrecoverable(String),

    /// The scheduling lane thread is no longer running.
    #[error("scheduling lane has shut down")]
    LaneClosed,

    /// Several failures collected by one operation (see `SessionController::stop`).
    #[error("{}", AggregateDisplay(.0))]
    Aggregate(Vec<Error>),
}

impl Error {
    pub(crate) fn illegal_state(operation: &'static str, state: impl fmt::Display) -> Self {
        Error::IllegalState {
            operation,
            state: state.to_string(),
        }
    }

    /// True for errors in the illegal-state class (`IllegalState` and `Busy`).
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState { .. } | Error::Busy)
    }
}

struct AggregateDisplay<'a>(&'a [Error]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s):", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            write!(f, " [{}] {err}", i + 1)?;
        }
        Ok(())
    }
}
