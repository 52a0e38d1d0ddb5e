//! Recording state management
//!
//! Defines the recorder state machine and the live session it owns.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::capture::CaptureProcess;
use crate::config::{Config, DeviceSlot};

/// The capture processes of one recording, exclusively owned until stop
pub struct RecordingSession {
    directory: PathBuf,
    processes: Vec<Box<dyn CaptureProcess>>,
    started_at: Instant,
    started_unix_ms: i64,
}

impl RecordingSession {
    pub fn new(directory: impl Into<PathBuf>, processes: Vec<Box<dyn CaptureProcess>>) -> Self {
        Self {
            directory: directory.into(),
            processes,
            started_at: Instant::now(),
            started_unix_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Slots with a live capture process
    pub fn slots(&self) -> Vec<DeviceSlot> {
        self.processes.iter().map(|p| p.slot()).collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn started_unix_ms(&self) -> i64 {
        self.started_unix_ms
    }

    pub(crate) fn into_processes(self) -> Vec<Box<dyn CaptureProcess>> {
        self.processes
    }
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("directory", &self.directory)
            .field("slots", &self.slots())
            .field("started_unix_ms", &self.started_unix_ms)
            .finish()
    }
}

/// Current state of the recorder. Only start and stop transition it.
#[derive(Debug, Default)]
pub enum RecorderState {
    /// No recording in progress
    #[default]
    Idle,
    /// Capture processes are running for `job_name`, configured by `config`
    Recording {
        job_name: String,
        session: RecordingSession,
        config: Box<Config>,
    },
}

impl RecorderState {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecorderState::Recording { .. })
    }

    pub fn status(&self) -> RecordingStatus {
        match self {
            RecorderState::Idle => RecordingStatus::default(),
            RecorderState::Recording {
                job_name, session, ..
            } => RecordingStatus {
                recording: true,
                job_name: Some(job_name.clone()),
                devices: session.slots(),
                started_unix_ms: Some(session.started_unix_ms()),
                elapsed_ms: session.elapsed().as_millis() as u64,
            },
        }
    }
}

/// Recording status as reported to the API layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub recording: bool,
    pub job_name: Option<String>,
    pub devices: Vec<DeviceSlot>,
    pub started_unix_ms: Option<i64>,
    pub elapsed_ms: u64,
}

/// How one capture process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildStopOutcome {
    pub slot: DeviceSlot,
    /// Exited on its own within the grace delay
    pub graceful: bool,
    /// Had to be terminated
    pub killed: bool,
    /// Failures met along the way, logged and otherwise ignored
    pub errors: Vec<String>,
}

/// Per-process outcomes of a stop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    pub outcomes: Vec<ChildStopOutcome>,
}

impl StopReport {
    pub fn outcome(&self, slot: DeviceSlot) -> Option<&ChildStopOutcome> {
        self.outcomes.iter().find(|o| o.slot == slot)
    }

    pub fn all_graceful(&self) -> bool {
        self.outcomes.iter().all(|o| o.graceful)
    }
}
