//! Capture supervisor
//!
//! Launches one capture process per enabled device and runs the stop
//! protocol across all of them.

use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::state::{ChildStopOutcome, RecordingSession, StopReport};
use crate::capture::{build_capture_command, CaptureBackend, CaptureProcess, Platform};
use crate::config::{Config, JobPaths};
use crate::utils::error::{AppError, AppResult};

/// Owns the capture backend and turns sessions on and off
pub struct CaptureSupervisor {
    backend: Arc<dyn CaptureBackend>,
    platform: Platform,
}

impl CaptureSupervisor {
    pub fn new(backend: Arc<dyn CaptureBackend>, platform: Platform) -> Self {
        Self { backend, platform }
    }

    /// Start capturing every enabled device into `paths.directory()`.
    ///
    /// Stale artifacts from an earlier aborted session are removed first. If
    /// any device fails to start, the processes already running are stopped
    /// and the session is not created.
    pub async fn start_session(&self, config: &Config, paths: &JobPaths) -> AppResult<RecordingSession> {
        fs::create_dir_all(paths.directory())?;
        clear_artifacts(config, paths)?;

        let mut processes: Vec<Box<dyn CaptureProcess>> = Vec::new();

        for slot in config.enabled_slots() {
            let device = config.device(slot);

            if device.focus.is_some() {
                if let Err(e) = self.backend.apply_focus(device).await {
                    tracing::warn!("Failed to set focus for {}: {:#}", slot, e);
                }
            }

            let output = paths.raw_video(config, slot);
            let command = build_capture_command(self.platform, slot, device, &config.audio, &output);

            match self.backend.spawn(&command).await {
                Ok(process) => processes.push(process),
                Err(e) => {
                    tracing::error!("Failed to start capture for {}: {:#}", slot, e);
                    let partial = RecordingSession::new(paths.directory(), processes);
                    self.stop_session(partial, Duration::ZERO).await;
                    return Err(AppError::DeviceUnavailable(format!(
                        "{} ({}): {:#}",
                        slot,
                        device.device_name(),
                        e
                    )));
                }
            }
        }

        let session = RecordingSession::new(paths.directory(), processes);
        tracing::info!(
            "Recording session started in {:?} for {:?}",
            session.directory(),
            session.slots()
        );
        Ok(session)
    }

    /// Ask every process to stop, wait `grace`, then kill whatever is left.
    ///
    /// Processes are stopped concurrently and independently; a failure on
    /// one never prevents stopping the others.
    pub async fn stop_session(&self, session: RecordingSession, grace: Duration) -> StopReport {
        tracing::info!("Stopping recording session in {:?}", session.directory());

        let mut tasks = JoinSet::new();
        for process in session.into_processes() {
            tasks.spawn(stop_process(process, grace));
        }

        let mut report = StopReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => tracing::error!("Stop task failed: {}", e),
            }
        }
        report.outcomes.sort_by_key(|o| o.slot);

        tracing::info!("Recording session stopped: {:?}", report.outcomes);
        report
    }
}

async fn stop_process(mut process: Box<dyn CaptureProcess>, grace: Duration) -> ChildStopOutcome {
    let slot = process.slot();
    let mut outcome = ChildStopOutcome {
        slot,
        graceful: false,
        killed: false,
        errors: Vec::new(),
    };

    if let Err(e) = process.request_stop().await {
        tracing::warn!("Graceful stop of {} failed: {:#}", slot, e);
        outcome.errors.push(format!("graceful stop: {:#}", e));
    }

    tokio::time::sleep(grace).await;

    let running = match process.is_running().await {
        Ok(running) => running,
        Err(e) => {
            tracing::warn!("Could not query {} capture process: {:#}", slot, e);
            outcome.errors.push(format!("status: {:#}", e));
            true
        }
    };

    if !running {
        outcome.graceful = true;
        return outcome;
    }

    match process.kill().await {
        Ok(()) => {
            tracing::warn!("Capture process for {} did not exit in {:?}, killed", slot, grace);
            outcome.killed = true;
        }
        Err(e) => {
            tracing::error!("Failed to kill capture process for {}: {:#}", slot, e);
            outcome.errors.push(format!("kill: {:#}", e));
        }
    }
    outcome
}

/// Remove files a previous session may have left in the job directory.
/// Files that are already gone are fine.
fn clear_artifacts(config: &Config, paths: &JobPaths) -> AppResult<()> {
    for file in paths.artifacts(config) {
        match fs::remove_file(&file) {
            Ok(()) => tracing::debug!("Removed stale artifact {:?}", file),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSlot;
    use crate::test_support::FakeCaptureBackend;
    use tempfile::tempdir;

    fn two_devices(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.files.recording_directory = root.to_path_buf();
        config.video1.enabled = true;
        config.video1.video_device.name = "/dev/video1".to_string();
        config
    }

    #[tokio::test]
    async fn test_start_clears_stale_artifacts_and_spawns_per_device() {
        let dir = tempdir().unwrap();
        let config = two_devices(dir.path());
        let paths = JobPaths::for_job(&config, "job");
        fs::create_dir_all(paths.directory()).unwrap();
        fs::write(paths.output(&config), b"old").unwrap();
        fs::write(paths.audio(&config), b"old").unwrap();

        let backend = FakeCaptureBackend::new();
        let supervisor = CaptureSupervisor::new(Arc::new(backend.clone()), Platform::Linux);
        let session = supervisor.start_session(&config, &paths).await.unwrap();

        assert!(!paths.output(&config).exists());
        assert!(!paths.audio(&config).exists());
        assert_eq!(session.slots(), vec![DeviceSlot::Video0, DeviceSlot::Video1]);

        let spawned = backend.spawned();
        assert_eq!(spawned.len(), 2);
        assert_eq!(spawned[1].output, paths.raw_video(&config, DeviceSlot::Video1));
        assert!(spawned[1].args.contains(&"/dev/video1".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_failure_stops_started_processes() {
        let dir = tempdir().unwrap();
        let config = two_devices(dir.path());
        let paths = JobPaths::for_job(&config, "job");

        let backend = FakeCaptureBackend::new().fail_spawn_for(DeviceSlot::Video1);
        let supervisor = CaptureSupervisor::new(Arc::new(backend.clone()), Platform::Linux);
        let result = supervisor.start_session(&config, &paths).await;

        assert!(matches!(result, Err(AppError::DeviceUnavailable(_))));
        assert_eq!(backend.events(), vec!["stop video0".to_string()]);
    }

    #[tokio::test]
    async fn test_focus_failure_is_tolerated() {
        let dir = tempdir().unwrap();
        let mut config = two_devices(dir.path());
        config.video0.focus = Some(-1);
        let paths = JobPaths::for_job(&config, "job");

        let backend = FakeCaptureBackend::new().fail_focus();
        let supervisor = CaptureSupervisor::new(Arc::new(backend.clone()), Platform::Linux);
        let session = supervisor.start_session(&config, &paths).await.unwrap();

        assert_eq!(backend.focused(), vec!["/dev/video0".to_string()]);
        assert_eq!(session.slots().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_is_best_effort_across_devices() {
        let dir = tempdir().unwrap();
        let config = two_devices(dir.path());
        let paths = JobPaths::for_job(&config, "job");

        // video0 rejects the stop request and keeps running; video1 behaves
        let backend = FakeCaptureBackend::new()
            .fail_stop_for(DeviceSlot::Video0)
            .ignore_stop_for(DeviceSlot::Video0);
        let supervisor = CaptureSupervisor::new(Arc::new(backend.clone()), Platform::Linux);
        let session = supervisor.start_session(&config, &paths).await.unwrap();

        let report = supervisor
            .stop_session(session, Duration::from_millis(10))
            .await;

        let first = report.outcome(DeviceSlot::Video0).unwrap();
        assert!(!first.graceful);
        assert!(first.killed);
        assert_eq!(first.errors.len(), 1);

        let second = report.outcome(DeviceSlot::Video1).unwrap();
        assert!(second.graceful);
        assert!(!second.killed);

        let events = backend.events();
        assert!(events.contains(&"kill video0".to_string()));
        assert!(!events.contains(&"kill video1".to_string()));
    }
}
