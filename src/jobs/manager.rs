//! Job manager
//!
//! Owns the recorder state and the list of jobs. Starting a recording names a
//! new job; stopping it queues the job for processing. Pipelines run on the
//! blocking pool, one task per job, and report back through the job's state.

use chrono::Local;
use parking_lot::RwLock;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::job::{Job, JobSummary};
use crate::capture::{CaptureBackend, FfmpegCaptureBackend, Platform};
use crate::config::{Config, ConfigStore, DeviceSlot, JobPaths};
use crate::geometry::DEFAULT_SQUARE_SIZE;
use crate::processing::{FfmpegToolkit, JobState, MediaToolkit, PipelineStage, ProcessingPipeline};
use crate::recorder::{CaptureSupervisor, RecorderState, RecordingStatus};
use crate::utils::error::{AppError, AppResult};

pub struct JobManager {
    config: Arc<ConfigStore>,
    supervisor: CaptureSupervisor,
    toolkit: Arc<dyn MediaToolkit>,
    /// Held across start and stop so the two never interleave
    recorder: Mutex<RecorderState>,
    jobs: RwLock<Vec<Arc<Job>>>,
    square_size: u32,
}

impl JobManager {
    pub fn new(
        config: Arc<ConfigStore>,
        backend: Arc<dyn CaptureBackend>,
        platform: Platform,
        toolkit: Arc<dyn MediaToolkit>,
    ) -> Self {
        Self {
            config,
            supervisor: CaptureSupervisor::new(backend, platform),
            toolkit,
            recorder: Mutex::new(RecorderState::Idle),
            jobs: RwLock::new(Vec::new()),
            square_size: DEFAULT_SQUARE_SIZE,
        }
    }

    /// Manager backed by the system's ffmpeg for both capture and processing
    pub fn with_ffmpeg(config: Arc<ConfigStore>) -> AppResult<Self> {
        let platform = Platform::current().ok_or_else(|| {
            AppError::DeviceUnavailable("camera capture is not supported on this platform".to_string())
        })?;

        Ok(Self::new(
            config,
            Arc::new(FfmpegCaptureBackend::new(platform)),
            platform,
            Arc::new(FfmpegToolkit::default()),
        ))
    }

    /// Side of the intermediate square the whiteboard is warped onto
    pub fn with_square_size(mut self, square_size: u32) -> Self {
        self.square_size = square_size;
        self
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Start capturing every enabled device into a freshly named job directory
    pub async fn start_recording(&self) -> AppResult<RecordingStatus> {
        let mut recorder = self.recorder.lock().await;
        if recorder.is_recording() {
            return Err(AppError::AlreadyRecording);
        }

        let config = self.config.snapshot();
        if config.enabled_slots().is_empty() {
            return Err(AppError::ConfigurationInvalid(
                "no video device is enabled".to_string(),
            ));
        }

        let job_name = self.unique_job_name(&config)?;
        let paths = JobPaths::for_job(&config, &job_name);
        let session = self.supervisor.start_session(&config, &paths).await?;

        tracing::info!("Recording job '{}'", job_name);
        *recorder = RecorderState::Recording {
            job_name,
            session,
            config: Box::new(config),
        };
        Ok(recorder.status())
    }

    /// Stop the live session and queue it as a job. The job starts right away
    /// when auto-processing is on.
    pub async fn stop_recording(&self) -> AppResult<JobSummary> {
        let mut recorder = self.recorder.lock().await;
        let RecorderState::Recording {
            job_name,
            session,
            config,
        } = std::mem::take(&mut *recorder)
        else {
            return Err(AppError::NotRecording);
        };

        let grace =
            Duration::try_from_secs_f64(config.end_recording_delay).unwrap_or(Duration::ZERO);
        let report = self.supervisor.stop_session(session, grace).await;
        if !report.all_graceful() {
            tracing::warn!("Job '{}' stopped uncleanly: {:?}", job_name, report.outcomes);
        }

        let job = Arc::new(Job::new(JobPaths::for_job(&config, &job_name), *config));
        let auto_process = self.config.snapshot().auto_process;
        let claimed = {
            let mut jobs = self.jobs.write();
            jobs.push(job.clone());
            auto_process && job.try_begin()
        };

        if claimed {
            self.spawn_job(job.clone());
        }

        Ok(job.summary())
    }

    pub async fn recording_status(&self) -> RecordingStatus {
        self.recorder.lock().await.status()
    }

    /// Job name from the configured strftime format, suffixed with the period
    /// and made unique against known jobs and existing directories.
    fn unique_job_name(&self, config: &Config) -> AppResult<String> {
        let mut base = String::new();
        write!(base, "{}", Local::now().format(&config.job_name_format)).map_err(|_| {
            AppError::ConfigurationInvalid(format!(
                "invalid job name format '{}'",
                config.job_name_format
            ))
        })?;

        if let Some(period) = config.period.as_deref().filter(|p| !p.is_empty()) {
            base.push('_');
            base.push_str(period);
        }

        if base.trim().is_empty() || base == "." || base == ".." || base.contains(['/', '\\']) {
            return Err(AppError::ConfigurationInvalid(format!(
                "job name '{}' is not a valid directory name",
                base
            )));
        }

        let jobs = self.jobs.read();
        let taken = |name: &str| {
            jobs.iter().any(|job| job.name() == name)
                || config.files.recording_directory.join(name).exists()
        };

        let mut name = base.clone();
        let mut suffix = 2;
        while taken(&name) {
            name = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        Ok(name)
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    pub fn list_jobs(&self) -> Vec<JobSummary> {
        self.jobs.read().iter().map(|job| job.summary()).collect()
    }

    fn find(&self, name: &str) -> AppResult<Arc<Job>> {
        self.jobs
            .read()
            .iter()
            .find(|job| job.name() == name)
            .cloned()
            .ok_or_else(|| AppError::JobNotFound(name.to_string()))
    }

    pub fn job_status(&self, name: &str) -> AppResult<JobSummary> {
        Ok(self.find(name)?.summary())
    }

    pub fn job_output_path(&self, name: &str) -> AppResult<PathBuf> {
        Ok(self.find(name)?.output_path())
    }

    pub fn job_directory(&self, name: &str) -> AppResult<PathBuf> {
        Ok(self.find(name)?.directory().to_path_buf())
    }

    /// Process one job in the background. Failed jobs are retried; finished
    /// jobs are left alone.
    pub async fn run_job(&self, name: &str) -> AppResult<()> {
        // Claimed under the list lock so a concurrent remove cannot drop it
        let claimed = {
            let jobs = self.jobs.read();
            let job = jobs
                .iter()
                .find(|job| job.name() == name)
                .ok_or_else(|| AppError::JobNotFound(name.to_string()))?;

            if job.try_begin() {
                Some(job.clone())
            } else if job.state().is_running() {
                return Err(AppError::JobRunning(name.to_string()));
            } else {
                None
            }
        };

        match claimed {
            Some(job) => self.spawn_job(job),
            None => tracing::debug!("Job '{}' already finished, not running it again", name),
        }
        Ok(())
    }

    /// Process every job that has never been started, concurrently. Returns
    /// how many began.
    pub async fn run_all_jobs(&self) -> usize {
        let claimed: Vec<Arc<Job>> = self
            .jobs
            .read()
            .iter()
            .filter(|job| job.state() == JobState::NotStarted && job.try_begin())
            .cloned()
            .collect();

        let started = claimed.len();
        for job in claimed {
            self.spawn_job(job);
        }
        started
    }

    /// Forget a job that was never started or has finished. Its files stay
    /// on disk.
    pub fn remove_job(&self, name: &str) -> AppResult<()> {
        let mut jobs = self.jobs.write();
        let index = jobs
            .iter()
            .position(|job| job.name() == name)
            .ok_or_else(|| AppError::JobNotFound(name.to_string()))?;

        let state = jobs[index].state();
        if state.is_started() && !state.is_finished() {
            return Err(AppError::JobRunning(name.to_string()));
        }
        jobs.remove(index);
        tracing::info!("Removed job '{}'", name);
        Ok(())
    }

    /// Forget every finished job. Returns how many were removed.
    pub fn clear_finished_jobs(&self) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|job| !job.state().is_finished());
        before - jobs.len()
    }

    /// Delete the whole recording directory and forget every job in it.
    /// Refused while recording or while any job is processing.
    pub async fn purge_recording_directory(&self) -> AppResult<()> {
        let recorder = self.recorder.lock().await;
        if recorder.is_recording() {
            return Err(AppError::AlreadyRecording);
        }

        // Unlisted jobs cannot be run while their files are deleted
        let taken = {
            let mut jobs = self.jobs.write();
            if let Some(running) = jobs.iter().find(|job| job.state().is_running()) {
                return Err(AppError::JobRunning(running.name().to_string()));
            }
            std::mem::take(&mut *jobs)
        };

        let directory = self.config.snapshot().files.recording_directory;
        match tokio::fs::remove_dir_all(&directory).await {
            Ok(()) => tracing::info!("Purged recording directory {:?}", directory),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!("Failed to purge {:?}: {}", directory, e);
                let mut jobs = self.jobs.write();
                let added = std::mem::replace(&mut *jobs, taken);
                jobs.extend(added);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Configuration a job is processed with: what it was recorded with, plus
    /// the current calibration and stack layout so a board calibrated after
    /// the recording still applies.
    fn processing_config(&self, job: &Job) -> Config {
        let current = self.config.snapshot();
        let mut config = job.recorded_with().clone();
        for slot in DeviceSlot::ALL {
            config.device_mut(slot).corners = current.device(slot).corners;
        }
        config.stack = current.stack;
        config.files.copy_output_directory = current.files.copy_output_directory;
        config
    }

    /// Run the pipeline for a job already claimed with `try_begin`
    fn spawn_job(&self, job: Arc<Job>) {
        let pipeline = ProcessingPipeline::new(
            self.processing_config(&job),
            job.paths().clone(),
            self.toolkit.clone(),
        )
        .with_square_size(self.square_size);

        tokio::spawn(async move {
            let worker = job.clone();
            let result =
                tokio::task::spawn_blocking(move || pipeline.run(|state| worker.set_state(state)))
                    .await;

            let failure = match result {
                Ok(Ok(_)) => return,
                Ok(Err(AppError::PipelineStageFailed { stage, source })) => {
                    (stage, source.to_string())
                }
                Ok(Err(e)) => (stage_of(&job.state()), e.to_string()),
                Err(e) => (stage_of(&job.state()), format!("processing task failed: {}", e)),
            };

            let (stage, message) = failure;
            tracing::error!("Job '{}' failed during {}: {}", job.name(), stage, message);
            job.set_state(JobState::Failed { stage, message });
        });
    }
}

/// Stage a job was in when it stopped making progress
fn stage_of(state: &JobState) -> PipelineStage {
    match state {
        JobState::CorrectingPerspective { .. } => PipelineStage::CorrectPerspective,
        JobState::Stacking => PipelineStage::Stack,
        JobState::CopyingOutput => PipelineStage::CopyOutput,
        _ => PipelineStage::ExtractAudio,
    }
}
