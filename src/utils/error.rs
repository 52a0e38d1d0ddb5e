//! Error types and handling
//!
//! Common error types used across the recorder, processing and calibration code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DeviceSlot;
use crate::processing::types::{PipelineStage, ProcessingError};

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    Toml(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Invalid calibration: {0}")]
    CalibrationInvalid(String),

    #[error("Expected 4 markers from one set (0-3 or 4-7) for {slot}, found {found:?}")]
    MarkerCountMismatch { slot: DeviceSlot, found: Vec<u32> },

    #[error("Image encoding error: {0}")]
    ImageEncoding(String),

    #[error("Pipeline stage '{stage}' failed: {source}")]
    PipelineStageFailed {
        stage: PipelineStage,
        #[source]
        source: ProcessingError,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job is still running: {0}")]
    JobRunning(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,
}

impl AppError {
    /// Wrap a processing failure with the stage it happened in
    pub fn stage(stage: PipelineStage) -> impl FnOnce(ProcessingError) -> AppError {
        move |source| AppError::PipelineStageFailed { stage, source }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(e: toml::de::Error) -> Self {
        AppError::Toml(e.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(e: toml::ser::Error) -> Self {
        AppError::Toml(e.to_string())
    }
}

/// Error response for the API layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Toml(_) => "CONFIG_FILE_ERROR",
            AppError::ConfigurationInvalid(_) => "CONFIGURATION_INVALID",
            AppError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            AppError::CalibrationInvalid(_) => "CALIBRATION_INVALID",
            AppError::MarkerCountMismatch { .. } => "MARKER_COUNT_MISMATCH",
            AppError::ImageEncoding(_) => "IMAGE_ENCODING_ERROR",
            AppError::PipelineStageFailed { .. } => "PIPELINE_STAGE_FAILED",
            AppError::JobNotFound(_) => "JOB_NOT_FOUND",
            AppError::JobRunning(_) => "JOB_RUNNING",
            AppError::AlreadyRecording => "ALREADY_RECORDING",
            AppError::NotRecording => "NOT_RECORDING",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
