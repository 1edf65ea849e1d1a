//! `queue` crate — the run dispatcher and everything that feeds it: run
//! creation, cron scheduling and retention cleanup.

pub mod dispatcher;
pub mod error;
pub mod retention;
pub mod schedule;
pub mod scheduler;
pub mod service;

pub use dispatcher::{DispatcherConfig, DispatcherStatistics, WorkflowDispatcher};
pub use error::DispatchError;
pub use retention::{cleanup, register_retention, RetentionReport};
pub use schedule::{job_id, WorkflowScheduler};
pub use scheduler::{CronScheduler, JobInfo};
pub use service::start_workflow_run;
