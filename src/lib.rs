//! Whiteboard Recorder - lecture capture from one or two whiteboard cameras.
//!
//! Records each camera with ffmpeg, flattens the board's perspective using the
//! calibration corners found from printed markers, and stacks the streams with
//! the audio into a single video. An API layer drives it through
//! [`jobs::JobManager`], [`capture::PreviewService`] and [`config::ConfigStore`].

pub mod calibration;
pub mod capture;
pub mod config;
pub mod geometry;
pub mod jobs;
pub mod processing;
pub mod recorder;
pub mod utils;

#[cfg(test)]
mod test_support;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging. Later calls leave the installed subscriber in place.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whiteboard_recorder_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_ok() {
        tracing::info!("Starting Whiteboard Recorder v{}", env!("CARGO_PKG_VERSION"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::debug!("still logging");
    }
}
