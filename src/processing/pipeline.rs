//! Processing pipeline
//!
//! Turns one recording session's captured streams into the final video:
//! extract audio, flatten each camera's perspective, stack the streams with
//! the audio, then optionally copy the result out.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, DeviceSlot, JobPaths};
use crate::geometry::{apply_transform, Homography, DEFAULT_SQUARE_SIZE};
use crate::processing::ffmpeg::{
    extract_audio_args, remux_args, stack_args, MediaToolkit, StackInput,
};
use crate::processing::types::{JobState, PipelineStage, ProcessingError};
use crate::utils::error::{AppError, AppResult};

/// Consecutive unreadable frames after which a stream is given up on
pub const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 30;

/// Report perspective progress every this many frames
const PROGRESS_INTERVAL: u64 = 100;

pub struct ProcessingPipeline {
    config: Config,
    paths: JobPaths,
    toolkit: Arc<dyn MediaToolkit>,
    square_size: u32,
}

impl ProcessingPipeline {
    /// `config` is the snapshot the job runs against; later settings changes
    /// do not affect a running job.
    pub fn new(config: Config, paths: JobPaths, toolkit: Arc<dyn MediaToolkit>) -> Self {
        Self {
            config,
            paths,
            toolkit,
            square_size: DEFAULT_SQUARE_SIZE,
        }
    }

    pub fn with_square_size(mut self, square_size: u32) -> Self {
        self.square_size = square_size;
        self
    }

    /// Run every stage in order, reporting each state transition through
    /// `on_state`. Returns the path of the final output.
    pub fn run<F>(&self, on_state: F) -> AppResult<PathBuf>
    where
        F: Fn(JobState),
    {
        tracing::info!("Starting processing for job '{}'", self.paths.name());

        on_state(JobState::ExtractingAudio);
        self.extract_audio()
            .map_err(AppError::stage(PipelineStage::ExtractAudio))?;

        for slot in self.config.enabled_slots() {
            on_state(JobState::CorrectingPerspective {
                slot,
                frames_written: 0,
            });
            self.correct_perspective(slot, &on_state)
                .map_err(AppError::stage(PipelineStage::CorrectPerspective))?;
        }

        on_state(JobState::Stacking);
        self.stack().map_err(AppError::stage(PipelineStage::Stack))?;

        let output = self.paths.output(&self.config);
        if let Some(directory) = self.config.files.copy_output_directory.clone() {
            on_state(JobState::CopyingOutput);
            self.copy_output(&output, &directory);
        }

        on_state(JobState::Finished);
        tracing::info!("Job '{}' finished: {:?}", self.paths.name(), output);
        Ok(output)
    }

    /// Demux the reference device's captured stream into the job's audio file
    fn extract_audio(&self) -> Result<(), ProcessingError> {
        let slot = self.config.reference_slot().ok_or_else(|| {
            ProcessingError::InvalidConfig("no video device is enabled".to_string())
        })?;

        let input = self.paths.raw_video(&self.config, slot);
        let output = self.paths.audio(&self.config);
        tracing::debug!("Extracting audio from {:?} into {:?}", input, output);

        self.toolkit.run(&extract_audio_args(&input, &output))
    }

    /// Warp every frame of one device's stream and encode it at the device's
    /// output resolution. Unreadable frames are skipped.
    fn correct_perspective<F>(&self, slot: DeviceSlot, on_state: &F) -> Result<u64, ProcessingError>
    where
        F: Fn(JobState),
    {
        let device = self.config.device(slot);
        let homography = Homography::from_corners(&device.corners, self.square_size)
            .map_err(|e| ProcessingError::Calibration(format!("{}: {}", slot, e)))?;

        let input = self.paths.raw_video(&self.config, slot);
        let output = self.paths.processed_video(&self.config, slot);

        let mut reader = self.toolkit.open_reader(&input)?;
        let fps = reader.fps().unwrap_or(device.framerate as f64);
        let resolution = device.resolution;

        tracing::info!(
            "Correcting {} perspective: {:?} -> {:?} at {}x{} @ {}fps",
            slot,
            input,
            output,
            resolution.width,
            resolution.height,
            fps
        );

        let mut writer = self
            .toolkit
            .open_writer(&output, resolution.width, resolution.height, fps)?;

        let mut written = 0u64;
        let mut skipped = 0u64;
        let mut consecutive_failures = 0u32;

        loop {
            match reader.read_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    let corrected =
                        apply_transform(&frame, &homography, self.square_size, resolution);
                    writer.write_frame(&corrected)?;
                    written += 1;

                    if written % PROGRESS_INTERVAL == 0 {
                        on_state(JobState::CorrectingPerspective {
                            slot,
                            frames_written: written,
                        });
                    }
                }
                Ok(None) => break,
                // The decoder process itself failed; nothing more will come
                Err(e @ ProcessingError::Ffmpeg(_)) => return Err(e),
                Err(e) => {
                    consecutive_failures += 1;
                    skipped += 1;
                    tracing::warn!("Skipping unreadable {} frame: {}", slot, e);

                    if consecutive_failures > MAX_CONSECUTIVE_DECODE_FAILURES {
                        return Err(ProcessingError::Decoding(format!(
                            "{} stream unreadable after {} consecutive failures: {}",
                            slot, consecutive_failures, e
                        )));
                    }
                }
            }
        }

        let encoded = writer.finish()?;
        tracing::info!(
            "Corrected {}: {} frames written, {} skipped",
            slot,
            encoded,
            skipped
        );
        Ok(encoded)
    }

    /// Merge processed streams with the audio into the final output
    fn stack(&self) -> Result<(), ProcessingError> {
        let audio = self.paths.audio(&self.config);
        let output = self.paths.output(&self.config);
        let enabled = self.config.enabled_slots();

        let args = match enabled.as_slice() {
            [only] => {
                let video = self.paths.processed_video(&self.config, *only);
                remux_args(&audio, &video, &output)
            }
            [_, _] => {
                let [first, second] = self.config.stack.order.map(|slot| StackInput {
                    path: self.paths.processed_video(&self.config, slot),
                    resolution: self.config.device(slot).resolution,
                });
                let framerate = enabled
                    .iter()
                    .map(|slot| self.config.device(*slot).framerate)
                    .max()
                    .unwrap_or_default();

                stack_args(
                    &first,
                    &second,
                    &audio,
                    self.config.stack.orientation,
                    framerate,
                    &output,
                )
            }
            _ => {
                return Err(ProcessingError::InvalidConfig(format!(
                    "cannot stack {} video devices",
                    enabled.len()
                )))
            }
        };

        self.toolkit.run(&args)
    }

    /// Duplicate the output into `directory`. Failures are logged only.
    fn copy_output(&self, output: &Path, directory: &Path) -> Option<PathBuf> {
        let file_name = output.file_name()?;
        let target = directory.join(file_name);

        let result = fs::create_dir_all(directory).and_then(|_| fs::copy(output, &target));
        match result {
            Ok(bytes) => {
                tracing::info!("Copied output to {:?} ({} bytes)", target, bytes);
                Some(target)
            }
            Err(e) => {
                tracing::warn!("Failed to copy output to {:?}: {}", target, e);
                None
            }
        }
    }
}
