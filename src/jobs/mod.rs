//! Processing jobs
//!
//! Every stopped recording becomes a job. The manager names jobs, runs their
//! pipelines in the background and tracks their progress.

pub mod job;
pub mod manager;

pub use job::{Job, JobSummary};
pub use manager::JobManager;
