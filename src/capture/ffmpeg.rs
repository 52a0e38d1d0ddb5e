//! FFmpeg capture backend
//!
//! One `ffmpeg` process per camera, reading the video device and the audio
//! input together and writing straight into the job directory.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use super::traits::{CaptureBackend, CaptureCommand, CaptureProcess};
use crate::config::{AudioInput, DeviceConfig, DeviceSlot};

/// Capture stack the encoder talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// v4l2 video with ALSA audio
    Linux,
    /// DirectShow video and audio
    Windows,
}

impl Platform {
    /// Platform of the running binary, `None` where capture is unsupported
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else {
            None
        }
    }
}

/// Build the capture invocation for one device
pub fn build_capture_command(
    platform: Platform,
    slot: DeviceSlot,
    device: &DeviceConfig,
    audio: &AudioInput,
    output: &Path,
) -> CaptureCommand {
    let mut args: Vec<String> = vec!["-hide_banner".to_string(), "-y".to_string()];

    match platform {
        Platform::Linux => {
            args.extend(["-f".to_string(), "v4l2".to_string()]);
            if !device.input_format.is_empty() {
                args.extend(["-input_format".to_string(), device.input_format.clone()]);
            }
            if !device.pixel_format.is_empty() {
                args.extend(["-pixel_format".to_string(), device.pixel_format.clone()]);
            }
            args.extend([
                "-framerate".to_string(),
                device.framerate.to_string(),
                "-err_detect".to_string(),
                "ignore_err".to_string(),
                "-video_size".to_string(),
                device.resolution.ffmpeg_size(),
                "-i".to_string(),
                device.device_name().to_string(),
                "-f".to_string(),
                "alsa".to_string(),
                "-i".to_string(),
                audio.alsa_device(),
            ]);
        }
        Platform::Windows => {
            args.extend(["-f".to_string(), "dshow".to_string()]);
            if !device.input_format.is_empty() {
                args.extend(["-vcodec".to_string(), device.input_format.clone()]);
            }
            if !device.pixel_format.is_empty() {
                args.extend(["-pixel_format".to_string(), device.pixel_format.clone()]);
            }
            args.extend([
                "-framerate".to_string(),
                device.framerate.to_string(),
                "-video_size".to_string(),
                device.resolution.ffmpeg_size(),
                "-i".to_string(),
                format!("video={}:audio={}", device.device_name(), audio.device),
            ]);
        }
    }

    if device.streamcopy {
        args.extend([
            "-codec:v".to_string(),
            "copy".to_string(),
            "-codec:a".to_string(),
            "copy".to_string(),
        ]);
    }

    args.push(output.to_string_lossy().to_string());

    CaptureCommand {
        slot,
        program: "ffmpeg".to_string(),
        args,
        output: output.to_path_buf(),
    }
}

/// `v4l2-ctl` invocations applying the device's focus setting
pub fn focus_commands(device: &DeviceConfig) -> Vec<Vec<String>> {
    let Some(focus) = device.focus else {
        return Vec::new();
    };
    let control = |value: String| {
        vec![
            "-d".to_string(),
            device.device_name().to_string(),
            "-c".to_string(),
            value,
        ]
    };

    if focus < 0 {
        vec![control("focus_automatic_continuous=1".to_string())]
    } else {
        vec![
            control("focus_automatic_continuous=0".to_string()),
            control(format!("focus_absolute={}", focus)),
        ]
    }
}

/// [`CaptureBackend`] spawning real `ffmpeg` processes
#[derive(Debug, Clone)]
pub struct FfmpegCaptureBackend {
    platform: Platform,
}

impl FfmpegCaptureBackend {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }
}

#[async_trait]
impl CaptureBackend for FfmpegCaptureBackend {
    async fn spawn(&self, command: &CaptureCommand) -> anyhow::Result<Box<dyn CaptureProcess>> {
        tracing::info!("Starting capture for {}: {:?}", command.slot, command.args);

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {} for {}", command.program, command.slot))?;

        Ok(Box::new(FfmpegCaptureProcess {
            slot: command.slot,
            child,
        }))
    }

    async fn apply_focus(&self, device: &DeviceConfig) -> anyhow::Result<()> {
        if self.platform != Platform::Linux {
            tracing::debug!("Focus control is only available through v4l2");
            return Ok(());
        }

        for args in focus_commands(device) {
            let output = Command::new("v4l2-ctl")
                .args(&args)
                .output()
                .await
                .context("failed to run v4l2-ctl")?;
            if !output.status.success() {
                bail!(
                    "v4l2-ctl {:?} failed: {}",
                    args,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }
        Ok(())
    }
}

/// A capture `ffmpeg` child. Graceful stop is `q` on stdin.
pub struct FfmpegCaptureProcess {
    slot: DeviceSlot,
    child: Child,
}

#[async_trait]
impl CaptureProcess for FfmpegCaptureProcess {
    fn slot(&self) -> DeviceSlot {
        self.slot
    }

    async fn request_stop(&mut self) -> anyhow::Result<()> {
        let mut stdin = self
            .child
            .stdin
            .take()
            .context("capture stdin already closed")?;
        stdin.write_all(b"q").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn is_running(&mut self) -> anyhow::Result<bool> {
        Ok(self.child.try_wait()?.is_none())
    }

    async fn kill(&mut self) -> anyhow::Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}
