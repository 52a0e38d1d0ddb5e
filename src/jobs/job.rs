//! A processing job: one finished recording session and its pipeline state

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{Config, JobPaths};
use crate::processing::JobState;

pub struct Job {
    paths: JobPaths,
    /// Configuration the session was recorded with
    recorded_with: Config,
    state: RwLock<JobState>,
}

impl Job {
    pub fn new(paths: JobPaths, recorded_with: Config) -> Self {
        Self {
            paths,
            recorded_with,
            state: RwLock::new(JobState::NotStarted),
        }
    }

    pub fn name(&self) -> &str {
        self.paths.name()
    }

    pub fn directory(&self) -> &Path {
        self.paths.directory()
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    pub fn recorded_with(&self) -> &Config {
        &self.recorded_with
    }

    /// Where the final video is written
    pub fn output_path(&self) -> PathBuf {
        self.paths.output(&self.recorded_with)
    }

    pub fn state(&self) -> JobState {
        self.state.read().clone()
    }

    pub fn set_state(&self, state: JobState) {
        tracing::debug!("Job '{}': {}", self.name(), state.progress_message());
        *self.state.write() = state;
    }

    /// Claim the job for a pipeline run. Succeeds for jobs that have not been
    /// started or were halted by a failure; the check and the transition
    /// happen under one lock so a job is never run twice at once.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            JobState::NotStarted | JobState::Failed { .. } => {
                *state = JobState::ExtractingAudio;
                true
            }
            _ => false,
        }
    }

    pub fn summary(&self) -> JobSummary {
        let state = self.state();
        JobSummary {
            name: self.name().to_string(),
            message: state.progress_message(),
            started: state.is_started(),
            finished: state.is_finished(),
            failed: state.is_failed(),
        }
    }
}

/// One row of the job listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub name: String,
    pub message: String,
    pub started: bool,
    pub finished: bool,
    pub failed: bool,
}
