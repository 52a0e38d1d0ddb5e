//! Camera capture
//!
//! Process launching for recording sessions, plus single-frame grabs for
//! preview and calibration.

pub mod ffmpeg;
pub mod preview;
pub mod traits;

pub use ffmpeg::{build_capture_command, FfmpegCaptureBackend, Platform};
pub use preview::{FfmpegFrameGrabber, FrameGrabber, PreviewService};
pub use traits::{CaptureBackend, CaptureCommand, CaptureProcess};
