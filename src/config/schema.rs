//! Configuration schema
//!
//! Typed form of the persisted `config.toml`. Device settings are addressed
//! through [`DeviceSlot`], never through string keys.

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::utils::error::{AppError, AppResult};

// =============================================================================
// Device Slots
// =============================================================================

/// Logical camera slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSlot {
    Video0,
    Video1,
}

impl DeviceSlot {
    pub const ALL: [DeviceSlot; 2] = [DeviceSlot::Video0, DeviceSlot::Video1];

    pub fn index(self) -> usize {
        match self {
            DeviceSlot::Video0 => 0,
            DeviceSlot::Video1 => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(DeviceSlot::Video0),
            1 => Some(DeviceSlot::Video1),
            _ => None,
        }
    }

    /// The other slot of the pair
    pub fn other(self) -> Self {
        match self {
            DeviceSlot::Video0 => DeviceSlot::Video1,
            DeviceSlot::Video1 => DeviceSlot::Video0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceSlot::Video0 => "video0",
            DeviceSlot::Video1 => "video1",
        }
    }
}

impl fmt::Display for DeviceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Geometry Types
// =============================================================================

/// Integer pixel position, stored as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// The four calibration points of one camera.
///
/// Stored in reading order: top-left, top-right, bottom-left, bottom-right
/// (rows of the whiteboard, left to right). Use
/// [`CalibrationCorners::solver_order`] before handing them to a solver that
/// walks the quadrilateral's perimeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationCorners(pub [Point; 4]);

impl CalibrationCorners {
    pub const fn new(points: [Point; 4]) -> Self {
        Self(points)
    }

    pub fn points(&self) -> &[Point; 4] {
        &self.0
    }

    /// Reorder from storage (reading) order to perimeter order
    /// (top-left, top-right, bottom-right, bottom-left) by swapping the last
    /// two points.
    pub fn solver_order(&self) -> [Point; 4] {
        let mut points = self.0;
        points.swap(2, 3);
        points
    }

    /// Inverse of [`CalibrationCorners::solver_order`]
    pub fn from_solver_order(mut points: [Point; 4]) -> Self {
        points.swap(2, 3);
        Self(points)
    }
}

/// Capture or output resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// `WxH`, as ffmpeg expects for `-video_size`
    pub fn ffmpeg_size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl From<[u32; 2]> for Resolution {
    fn from([width, height]: [u32; 2]) -> Self {
        Self { width, height }
    }
}

impl From<Resolution> for [u32; 2] {
    fn from(r: Resolution) -> Self {
        [r.width, r.height]
    }
}

// =============================================================================
// Device Types
// =============================================================================

/// A physical capture device as reported by device enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub index: u32,
    pub name: String,
}

impl Default for DeviceRef {
    fn default() -> Self {
        Self {
            index: 0,
            name: "/dev/video0".to_string(),
        }
    }
}

/// Per-camera capture and calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub enabled: bool,
    /// Overrides `video_device.name` when non-empty
    #[serde(default)]
    pub custom_video_device: String,
    /// Overrides `video_device.index` when non-negative
    #[serde(default = "default_custom_index")]
    pub custom_video_device_index: i32,
    pub resolution: Resolution,
    pub framerate: u32,
    #[serde(default)]
    pub input_format: String,
    #[serde(default)]
    pub pixel_format: String,
    #[serde(default)]
    pub streamcopy: bool,
    /// `None` leaves the camera alone, negative enables continuous autofocus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<i32>,
    #[serde(default)]
    pub corners: CalibrationCorners,
    pub temp_video_file: String,
    pub temp_processed_video_file: String,
    pub video_device: DeviceRef,
}

fn default_custom_index() -> i32 {
    -1
}

impl DeviceConfig {
    pub fn for_slot(slot: DeviceSlot) -> Self {
        Self {
            enabled: slot == DeviceSlot::Video0,
            custom_video_device: String::new(),
            custom_video_device_index: -1,
            resolution: Resolution::default(),
            framerate: 30,
            input_format: "mjpeg".to_string(),
            pixel_format: String::new(),
            streamcopy: false,
            focus: None,
            corners: CalibrationCorners::default(),
            temp_video_file: format!("temp_{}.mp4", slot),
            temp_processed_video_file: format!("temp_processed_{}.mp4", slot),
            video_device: DeviceRef::default(),
        }
    }

    /// Device name passed to the encoder, honouring the custom override
    pub fn device_name(&self) -> &str {
        if self.custom_video_device.is_empty() {
            &self.video_device.name
        } else {
            &self.custom_video_device
        }
    }

    /// Device index, honouring the custom override
    pub fn device_index(&self) -> u32 {
        u32::try_from(self.custom_video_device_index).unwrap_or(self.video_device.index)
    }
}

// =============================================================================
// Audio, Files and Layout
// =============================================================================

/// Audio input recorded alongside each camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInput {
    /// dshow device name (Windows)
    pub device: String,
    /// ALSA card name (Linux)
    #[serde(default)]
    pub card: String,
    /// ALSA device number (Linux)
    #[serde(default)]
    pub dev: String,
}

impl Default for AudioInput {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            card: String::new(),
            dev: String::new(),
        }
    }
}

impl AudioInput {
    /// ALSA device string, e.g. `sysdefault:CARD=C920,DEV=0`
    pub fn alsa_device(&self) -> String {
        if self.card.is_empty() {
            return "default".to_string();
        }
        let mut device = format!("sysdefault:CARD={}", self.card);
        if !self.dev.is_empty() {
            device.push_str(&format!(",DEV={}", self.dev));
        }
        device
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    /// Root under which every job gets its own directory
    pub recording_directory: PathBuf,
    pub temp_audio_file: String,
    pub output_extension: String,
    /// Optional directory the final output is duplicated into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_output_directory: Option<PathBuf>,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            recording_directory: PathBuf::from("recordings"),
            temp_audio_file: "temp_audio.mp3".to_string(),
            output_extension: "mp4".to_string(),
            copy_output_directory: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackOrientation {
    Horizontal,
    Vertical,
}

impl Default for StackOrientation {
    fn default() -> Self {
        Self::Vertical
    }
}

/// How two processed streams are arranged in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackLayout {
    pub orientation: StackOrientation,
    /// Slot shown first (left or top), then second
    pub order: [DeviceSlot; 2],
}

impl Default for StackLayout {
    fn default() -> Self {
        Self {
            orientation: StackOrientation::default(),
            order: [DeviceSlot::Video0, DeviceSlot::Video1],
        }
    }
}

// =============================================================================
// Root Config
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Seconds to wait between the graceful and the forced stop
    pub end_recording_delay: f64,
    pub job_name_format: String,
    /// Label appended to job names, e.g. a class period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default)]
    pub auto_process: bool,
    #[serde(default = "default_capture_attempts")]
    pub capture_attempts: u32,
    pub audio: AudioInput,
    pub video0: DeviceConfig,
    pub video1: DeviceConfig,
    pub files: FileSettings,
    #[serde(default)]
    pub stack: StackLayout,
}

fn default_capture_attempts() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            end_recording_delay: 1.0,
            job_name_format: "%Y-%m-%d_%H-%M-%S".to_string(),
            period: None,
            auto_process: false,
            capture_attempts: default_capture_attempts(),
            audio: AudioInput::default(),
            video0: DeviceConfig::for_slot(DeviceSlot::Video0),
            video1: DeviceConfig::for_slot(DeviceSlot::Video1),
            files: FileSettings::default(),
            stack: StackLayout::default(),
        }
    }
}

impl Config {
    pub fn device(&self, slot: DeviceSlot) -> &DeviceConfig {
        match slot {
            DeviceSlot::Video0 => &self.video0,
            DeviceSlot::Video1 => &self.video1,
        }
    }

    pub fn device_mut(&mut self, slot: DeviceSlot) -> &mut DeviceConfig {
        match slot {
            DeviceSlot::Video0 => &mut self.video0,
            DeviceSlot::Video1 => &mut self.video1,
        }
    }

    /// Enabled slots in slot order
    pub fn enabled_slots(&self) -> Vec<DeviceSlot> {
        DeviceSlot::ALL
            .into_iter()
            .filter(|slot| self.device(*slot).enabled)
            .collect()
    }

    /// Slot whose captured stream provides the job's audio track
    pub fn reference_slot(&self) -> Option<DeviceSlot> {
        self.enabled_slots().into_iter().next()
    }

    /// Check the invariants every persisted config must hold
    pub fn validate(&self) -> AppResult<()> {
        if !self.end_recording_delay.is_finite() || self.end_recording_delay < 0.0 {
            return Err(AppError::ConfigurationInvalid(format!(
                "end_recording_delay must be a non-negative number, got {}",
                self.end_recording_delay
            )));
        }
        if self.job_name_format.trim().is_empty() {
            return Err(AppError::ConfigurationInvalid(
                "job_name_format must not be empty".to_string(),
            ));
        }
        if StrftimeItems::new(&self.job_name_format).any(|item| matches!(item, Item::Error)) {
            return Err(AppError::ConfigurationInvalid(format!(
                "job_name_format '{}' is not a valid strftime pattern",
                self.job_name_format
            )));
        }
        if self.capture_attempts == 0 {
            return Err(AppError::ConfigurationInvalid(
                "capture_attempts must be at least 1".to_string(),
            ));
        }
        if self.enabled_slots().is_empty() {
            return Err(AppError::ConfigurationInvalid(
                "at least one video device must be enabled".to_string(),
            ));
        }
        if self.stack.order[0] == self.stack.order[1] {
            return Err(AppError::ConfigurationInvalid(
                "stack order must name both devices".to_string(),
            ));
        }

        for slot in DeviceSlot::ALL {
            let device = self.device(slot);
            if device.resolution.width == 0 || device.resolution.height == 0 {
                return Err(AppError::ConfigurationInvalid(format!(
                    "{} resolution must be non-zero, got {}",
                    slot,
                    device.resolution.ffmpeg_size()
                )));
            }
            if device.framerate == 0 {
                return Err(AppError::ConfigurationInvalid(format!(
                    "{} framerate must be non-zero",
                    slot
                )));
            }
            if device.enabled && device.device_name().trim().is_empty() {
                return Err(AppError::ConfigurationInvalid(format!(
                    "{} is enabled but has no device",
                    slot
                )));
            }
            if device.temp_video_file.is_empty() || device.temp_processed_video_file.is_empty() {
                return Err(AppError::ConfigurationInvalid(format!(
                    "{} file names must not be empty",
                    slot
                )));
            }
        }

        Ok(())
    }
}
