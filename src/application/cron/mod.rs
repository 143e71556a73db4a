//! Recurring background jobs owned by modules

pub mod schedule;
pub mod service;

pub use schedule::{CustomSchedule, Schedule};
pub use service::{Clock, CronService, JobHandler, JobInfo, DEFAULT_CHECK_INTERVAL};
