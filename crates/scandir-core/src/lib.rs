//! scandir core: scan-session scheduling, directory workers, and result logging.
//!
//! This crate contains all business logic with zero CLI dependencies.
//! A [`SessionController`] is an explicit owned context: create as many as
//! needed, nothing is process-global.
//!
//! # Modules
//!
//! - [`session`]: Session state machine, administrative gate, and the
//!   single-lane delayed-task scheduler.
//! - [`worker`]: Per-root directory traversal, match predicates, and actions.
//! - [`sink`]: Capacity-bounded memory log and rotating file log.
//! - [`events`]: Ordered multi-listener event broadcast.
//! - [`config`]: Plain configuration structs and a JSON-backed store.
//! - [`model`]: Small shared value types and formatting helpers.
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod session;
pub mod sink;
pub mod worker;

pub use config::{ConfigStore, FileMatchConfig, ResultLogConfig, SessionConfig, WorkerConfig};
pub use error::{Error, Result};
pub use events::{Event, EventBus, Subscription, SubscriberId};
pub use model::{Action, ActionSet, ResultRecord};
pub use session::{SessionController, SessionState};
pub use sink::ResultLog;
pub use worker::{FileMatch, FileMatcher, ScanStats, Worker, WorkerState};
