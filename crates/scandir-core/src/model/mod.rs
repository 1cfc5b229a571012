//! Shared value types: actions, result records, and display helpers.
pub mod action;
pub mod record;
pub mod size;

pub use action::{Action, ActionSet};
pub use record::ResultRecord;
