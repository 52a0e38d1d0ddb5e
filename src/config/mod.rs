//! Configuration
//!
//! Typed settings for both camera slots, persisted as TOML.

pub mod paths;
pub mod schema;
pub mod store;

pub use paths::JobPaths;
pub use schema::{
    AudioInput, CalibrationCorners, Config, DeviceConfig, DeviceRef, DeviceSlot, FileSettings,
    Point, Resolution, StackLayout, StackOrientation,
};
pub use store::{ConfigStore, DeviceSettings, Settings};
