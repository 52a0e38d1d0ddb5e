//! Post-recording processing
//!
//! Perspective correction and stacking of a finished recording session.

pub mod ffmpeg;
pub mod pipeline;
pub mod types;

pub use ffmpeg::{FfmpegToolkit, FrameReader, FrameWriter, MediaToolkit};
pub use pipeline::ProcessingPipeline;
pub use types::{JobState, PipelineStage, ProcessingError};
