//! Persisted configuration store
//!
//! All writers (settings updates, calibration, manual corner entry) go through
//! [`ConfigStore::mutate`], which holds one lock across validate, persist and
//! commit. A calibration and a settings update therefore never interleave.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::schema::{
    AudioInput, CalibrationCorners, Config, DeviceRef, DeviceSlot, Resolution, StackLayout,
    StackOrientation,
};
use crate::geometry::homography::validate_corners;
use crate::utils::error::{AppError, AppResult};

/// User-editable settings of one device (calibration is set separately)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSettings {
    pub enabled: bool,
    pub video_device: DeviceRef,
    pub custom_video_device: String,
    pub custom_video_device_index: i32,
    pub resolution: Resolution,
    pub framerate: u32,
    pub input_format: String,
    #[serde(default)]
    pub pixel_format: String,
    pub streamcopy: bool,
    #[serde(default)]
    pub focus: Option<i32>,
}

/// The bulk settings view exchanged with the API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub audio: AudioInput,
    pub end_recording_delay: f64,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub auto_process: bool,
    pub video0: DeviceSettings,
    pub video1: DeviceSettings,
    pub stack_orientation: StackOrientation,
    #[serde(default)]
    pub copy_output_directory: Option<PathBuf>,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        let device = |slot: DeviceSlot| {
            let d = config.device(slot);
            DeviceSettings {
                enabled: d.enabled,
                video_device: d.video_device.clone(),
                custom_video_device: d.custom_video_device.clone(),
                custom_video_device_index: d.custom_video_device_index,
                resolution: d.resolution,
                framerate: d.framerate,
                input_format: d.input_format.clone(),
                pixel_format: d.pixel_format.clone(),
                streamcopy: d.streamcopy,
                focus: d.focus,
            }
        };

        Self {
            audio: config.audio.clone(),
            end_recording_delay: config.end_recording_delay,
            period: config.period.clone(),
            auto_process: config.auto_process,
            video0: device(DeviceSlot::Video0),
            video1: device(DeviceSlot::Video1),
            stack_orientation: config.stack.orientation,
            copy_output_directory: config.files.copy_output_directory.clone(),
        }
    }

    fn apply_to(self, config: &mut Config) {
        config.audio = self.audio;
        config.end_recording_delay = self.end_recording_delay;
        config.period = self.period.filter(|p| !p.trim().is_empty());
        config.auto_process = self.auto_process;
        config.stack.orientation = self.stack_orientation;
        config.files.copy_output_directory = self.copy_output_directory;

        for (slot, settings) in [
            (DeviceSlot::Video0, self.video0),
            (DeviceSlot::Video1, self.video1),
        ] {
            let device = config.device_mut(slot);
            device.enabled = settings.enabled;
            device.video_device = settings.video_device;
            device.custom_video_device = settings.custom_video_device;
            device.custom_video_device_index = settings.custom_video_device_index;
            device.resolution = settings.resolution;
            device.framerate = settings.framerate;
            device.input_format = settings.input_format;
            device.pixel_format = settings.pixel_format;
            device.streamcopy = settings.streamcopy;
            device.focus = settings.focus;
        }
    }
}

/// Typed, persisted configuration with a single writer
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: Mutex<Config>,
}

impl ConfigStore {
    /// Load the config at `path`, writing defaults when the file is missing
    pub fn load_or_default(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();

        let config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            tracing::debug!("Loaded configuration from {:?}", path);
            config
        } else {
            let config = Config::default();
            persist(&path, &config)?;
            tracing::info!("Wrote default configuration to {:?}", path);
            config
        };

        Ok(Self {
            path: Some(path),
            config: Mutex::new(config),
        })
    }

    /// A store that never touches the filesystem
    pub fn in_memory(config: Config) -> Self {
        Self {
            path: None,
            config: Mutex::new(config),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the current configuration
    pub fn snapshot(&self) -> Config {
        self.config.lock().clone()
    }

    /// The bulk settings view
    pub fn settings(&self) -> Settings {
        Settings::from_config(&self.config.lock())
    }

    /// Replace every user-editable setting at once
    pub fn update_settings(&self, settings: Settings) -> AppResult<()> {
        self.mutate(|config| {
            settings.apply_to(config);
            Ok(())
        })
    }

    /// Same as [`ConfigStore::update_settings`], from an untyped payload
    pub fn update_settings_json(&self, payload: serde_json::Value) -> AppResult<()> {
        let settings: Settings = serde_json::from_value(payload)
            .map_err(|e| AppError::ConfigurationInvalid(e.to_string()))?;
        self.update_settings(settings)
    }

    /// Manually entered calibration points, in storage order
    pub fn set_corners(&self, slot: DeviceSlot, corners: CalibrationCorners) -> AppResult<()> {
        validate_corners(&corners)?;
        self.mutate(|config| {
            config.device_mut(slot).corners = corners;
            Ok(())
        })
    }

    /// Write-through of a marker calibration result
    pub fn apply_calibration(
        &self,
        slot: DeviceSlot,
        corners: CalibrationCorners,
        order: [DeviceSlot; 2],
    ) -> AppResult<()> {
        validate_corners(&corners)?;
        self.mutate(|config| {
            config.device_mut(slot).corners = corners;
            config.stack.order = order;
            Ok(())
        })
    }

    pub fn set_stack_layout(&self, layout: StackLayout) -> AppResult<()> {
        self.mutate(|config| {
            config.stack = layout;
            Ok(())
        })
    }

    /// Apply `change` to a copy, validate and persist it, then commit.
    /// Nothing is committed when any step fails.
    fn mutate<F>(&self, change: F) -> AppResult<()>
    where
        F: FnOnce(&mut Config) -> AppResult<()>,
    {
        let mut guard = self.config.lock();
        let mut next = guard.clone();
        change(&mut next)?;
        next.validate()?;

        if let Some(path) = &self.path {
            persist(path, &next)?;
        }

        *guard = next;
        Ok(())
    }
}

/// Write through a sibling temp file so a crash never leaves half a config
fn persist(path: &Path, config: &Config) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string(config)?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
