//! File layout of a job directory

use std::path::{Path, PathBuf};

use super::schema::{Config, DeviceSlot};

/// Where every artifact of one job lives. Each job owns its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    name: String,
    directory: PathBuf,
}

impl JobPaths {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
        }
    }

    /// `<recording_directory>/<name>`
    pub fn for_job(config: &Config, name: &str) -> Self {
        Self::new(name, config.files.recording_directory.join(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn raw_video(&self, config: &Config, slot: DeviceSlot) -> PathBuf {
        self.directory.join(&config.device(slot).temp_video_file)
    }

    pub fn processed_video(&self, config: &Config, slot: DeviceSlot) -> PathBuf {
        self.directory
            .join(&config.device(slot).temp_processed_video_file)
    }

    pub fn audio(&self, config: &Config) -> PathBuf {
        self.directory.join(&config.files.temp_audio_file)
    }

    /// Final output, named after the job
    pub fn output(&self, config: &Config) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.name, config.files.output_extension))
    }

    /// Every file a session or pipeline run may leave behind
    pub fn artifacts(&self, config: &Config) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for slot in DeviceSlot::ALL {
            files.push(self.raw_video(config, slot));
            files.push(self.processed_video(config, slot));
        }
        files.push(self.audio(config));
        files.push(self.output(config));
        files
    }
}
