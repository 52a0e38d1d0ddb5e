//! Capture trait definitions
//!
//! Seams between the supervisor and the processes that actually record.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::{DeviceConfig, DeviceSlot};

/// A fully built encoder invocation for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    /// Slot being recorded
    pub slot: DeviceSlot,

    /// Program to launch
    pub program: String,

    /// Arguments, output file last
    pub args: Vec<String>,

    /// File the encoder writes into
    pub output: PathBuf,
}

/// A running capture process
#[async_trait]
pub trait CaptureProcess: Send {
    fn slot(&self) -> DeviceSlot;

    /// Ask the encoder to finish its file and exit
    async fn request_stop(&mut self) -> anyhow::Result<()>;

    /// Whether the process is still alive
    async fn is_running(&mut self) -> anyhow::Result<bool>;

    /// Terminate immediately
    async fn kill(&mut self) -> anyhow::Result<()>;
}

/// Launches capture processes
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn spawn(&self, command: &CaptureCommand) -> anyhow::Result<Box<dyn CaptureProcess>>;

    /// Apply the device's configured focus. Best-effort.
    async fn apply_focus(&self, device: &DeviceConfig) -> anyhow::Result<()>;
}
