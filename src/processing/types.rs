//! Processing types
//!
//! This module defines the job state machine, the pipeline stages and the
//! errors raised inside a stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::DeviceSlot;

/// The ordered stages of a processing job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStage {
    ExtractAudio,
    CorrectPerspective,
    Stack,
    CopyOutput,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::ExtractAudio => "extract audio",
            PipelineStage::CorrectPerspective => "correct perspective",
            PipelineStage::Stack => "stack",
            PipelineStage::CopyOutput => "copy output",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a job.
///
/// `NotStarted -> ExtractingAudio -> CorrectingPerspective -> Stacking ->
/// CopyingOutput (optional) -> Finished`. A stage failure parks the job in
/// `Failed` until it is run again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum JobState {
    NotStarted,
    ExtractingAudio,
    CorrectingPerspective {
        slot: DeviceSlot,
        frames_written: u64,
    },
    Stacking,
    CopyingOutput,
    Finished,
    Failed {
        stage: PipelineStage,
        message: String,
    },
}

impl Default for JobState {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl JobState {
    /// Human-readable progress line shown in job listings
    pub fn progress_message(&self) -> String {
        match self {
            JobState::NotStarted => "Not started".to_string(),
            JobState::ExtractingAudio => "Extracting audio".to_string(),
            JobState::CorrectingPerspective {
                slot,
                frames_written,
            } => format!(
                "Processing recording ({}: {} frames)",
                slot, frames_written
            ),
            JobState::Stacking => "Stacking output".to_string(),
            JobState::CopyingOutput => "Copying output".to_string(),
            JobState::Finished => "Finished".to_string(),
            JobState::Failed { stage, message } => {
                format!("Failed during {}: {}", stage, message)
            }
        }
    }

    pub fn is_started(&self) -> bool {
        !matches!(self, JobState::NotStarted)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Finished)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobState::Failed { .. })
    }

    /// Started, not finished and not halted by a failure
    pub fn is_running(&self) -> bool {
        self.is_started() && !self.is_finished() && !self.is_failed()
    }
}

/// Errors raised inside a pipeline stage
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Calibration error: {0}")]
    Calibration(String),
}
