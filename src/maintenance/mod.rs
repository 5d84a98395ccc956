//! Scheduled background maintenance.

mod scheduler;
mod tasks;

pub use scheduler::{MaintenanceScheduler, TaskFn, TaskOutcome, TaskStatus};
pub use tasks::{prune_logs, register_builtin_tasks, trim_cache};
