//! Recording sessions
//!
//! The supervisor starts one capture process per enabled camera and stops
//! them together; the state types track the single live session.

pub mod state;
pub mod supervisor;

pub use state::{ChildStopOutcome, RecorderState, RecordingSession, RecordingStatus, StopReport};
pub use supervisor::CaptureSupervisor;
