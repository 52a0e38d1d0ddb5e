//! Single-frame preview and calibration
//!
//! Grabs one frame from a camera on request, retains it per slot, and serves
//! the warped view or a marker calibration from it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::Arc;

use super::ffmpeg::Platform;
use crate::calibration::{self, CalibrationResult, MarkerDetector};
use crate::config::{ConfigStore, DeviceConfig, DeviceSlot};
use crate::geometry::{apply_transform, Frame, Homography, DEFAULT_SQUARE_SIZE};
use crate::utils::error::{AppError, AppResult};

/// Frame-capture capability: one raw frame from a device
pub trait FrameGrabber: Send + Sync {
    fn grab(&self, device: &DeviceConfig) -> anyhow::Result<Frame>;
}

/// Grabs a single frame with `ffmpeg -frames:v 1` as raw RGBA
#[derive(Debug, Clone)]
pub struct FfmpegFrameGrabber {
    platform: Platform,
}

impl FfmpegFrameGrabber {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    fn args(&self, device: &DeviceConfig) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        match self.platform {
            Platform::Linux => {
                args.extend(["-f".to_string(), "v4l2".to_string()]);
                if !device.input_format.is_empty() {
                    args.extend(["-input_format".to_string(), device.input_format.clone()]);
                }
                args.extend([
                    "-video_size".to_string(),
                    device.resolution.ffmpeg_size(),
                    "-i".to_string(),
                    device.device_name().to_string(),
                ]);
            }
            Platform::Windows => {
                args.extend([
                    "-f".to_string(),
                    "dshow".to_string(),
                    "-video_size".to_string(),
                    device.resolution.ffmpeg_size(),
                    "-i".to_string(),
                    format!("video={}", device.device_name()),
                ]);
            }
        }
        args.extend([
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            device.resolution.ffmpeg_size(),
            "-".to_string(),
        ]);
        args
    }
}

impl FrameGrabber for FfmpegFrameGrabber {
    fn grab(&self, device: &DeviceConfig) -> anyhow::Result<Frame> {
        let output = Command::new("ffmpeg")
            .args(self.args(device))
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            anyhow::bail!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let resolution = device.resolution;
        let len = output.stdout.len();
        Frame::from_rgba(resolution.width, resolution.height, output.stdout).ok_or_else(|| {
            anyhow::anyhow!(
                "expected a {} frame, got {} bytes",
                resolution.ffmpeg_size(),
                len
            )
        })
    }
}

/// Preview and calibration surface for the API layer
pub struct PreviewService {
    config: Arc<ConfigStore>,
    grabber: Box<dyn FrameGrabber>,
    frames: Mutex<HashMap<DeviceSlot, Frame>>,
}

impl PreviewService {
    pub fn new(config: Arc<ConfigStore>, grabber: Box<dyn FrameGrabber>) -> Self {
        Self {
            config,
            grabber,
            frames: Mutex::new(HashMap::new()),
        }
    }

    /// Grab a fresh frame, retrying up to the configured attempt budget
    pub fn capture_frame(&self, slot: DeviceSlot) -> AppResult<Frame> {
        let config = self.config.snapshot();
        let device = config.device(slot);
        let attempts = config.capture_attempts;

        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.grabber.grab(device) {
                Ok(frame) => {
                    tracing::debug!("Captured {} preview frame on attempt {}", slot, attempt);
                    self.frames.lock().insert(slot, frame.clone());
                    return Ok(frame);
                }
                Err(e) => {
                    tracing::debug!("Frame grab {}/{} for {} failed: {:#}", attempt, attempts, slot, e);
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "no attempts made".to_string());
        tracing::warn!("Could not capture a frame from {}: {}", slot, reason);
        Err(AppError::DeviceUnavailable(format!(
            "{} ({}) returned no frame after {} attempts: {}",
            slot,
            device.device_name(),
            attempts,
            reason
        )))
    }

    /// The last frame captured for `slot`
    pub fn last_frame(&self, slot: DeviceSlot) -> Option<Frame> {
        self.frames.lock().get(&slot).cloned()
    }

    fn retained_or_capture(&self, slot: DeviceSlot) -> AppResult<Frame> {
        match self.last_frame(slot) {
            Some(frame) => Ok(frame),
            None => self.capture_frame(slot),
        }
    }

    /// The retained frame flattened with the slot's stored calibration
    pub fn warp_frame(&self, slot: DeviceSlot) -> AppResult<Frame> {
        let frame = self.retained_or_capture(slot)?;
        let device = self.config.snapshot().device(slot).clone();
        let homography = Homography::from_corners(&device.corners, DEFAULT_SQUARE_SIZE)?;
        Ok(apply_transform(
            &frame,
            &homography,
            DEFAULT_SQUARE_SIZE,
            device.resolution,
        ))
    }

    /// Calibrate `slot` from its markers and persist the result
    pub fn calibrate(
        &self,
        slot: DeviceSlot,
        detector: &dyn MarkerDetector,
    ) -> AppResult<CalibrationResult> {
        let frame = self.retained_or_capture(slot)?;
        calibration::detect_corners(detector, &frame, slot, &self.config)
    }

    /// Encode a frame for serving
    pub fn encode_png(frame: &Frame) -> AppResult<Vec<u8>> {
        frame
            .to_png()
            .map_err(|e| AppError::ImageEncoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CalibrationCorners, Config, Point, Resolution};
    use crate::test_support::{board_markers, FakeDetector, FakeGrabber};

    fn store(attempts: u32) -> Arc<ConfigStore> {
        let mut config = Config::default();
        config.capture_attempts = attempts;
        config.video0.resolution = Resolution::new(64, 48);
        Arc::new(ConfigStore::in_memory(config))
    }

    #[test]
    fn test_capture_retries_within_budget() {
        let grabber = FakeGrabber::new(Frame::new(64, 48)).failing_first(4);
        let service = PreviewService::new(store(5), Box::new(grabber.clone()));

        let frame = service.capture_frame(DeviceSlot::Video0).unwrap();
        assert_eq!(frame.width(), 64);
        assert_eq!(grabber.calls(), 5);
        assert!(service.last_frame(DeviceSlot::Video0).is_some());
    }

    #[test]
    fn test_capture_exhausts_budget() {
        let grabber = FakeGrabber::new(Frame::new(64, 48)).failing_first(10);
        let service = PreviewService::new(store(3), Box::new(grabber.clone()));

        let result = service.capture_frame(DeviceSlot::Video0);
        assert!(matches!(result, Err(AppError::DeviceUnavailable(_))));
        assert_eq!(grabber.calls(), 3);
        assert!(service.last_frame(DeviceSlot::Video0).is_none());
    }

    #[test]
    fn test_warp_requires_calibration() {
        let service = PreviewService::new(store(1), Box::new(FakeGrabber::new(Frame::new(64, 48))));
        assert!(matches!(
            service.warp_frame(DeviceSlot::Video0),
            Err(AppError::CalibrationInvalid(_))
        ));
    }

    #[test]
    fn test_warp_uses_device_resolution() {
        let store = store(1);
        store
            .set_corners(
                DeviceSlot::Video0,
                CalibrationCorners::new([
                    Point::new(0, 0),
                    Point::new(63, 0),
                    Point::new(0, 47),
                    Point::new(63, 47),
                ]),
            )
            .unwrap();
        let service = PreviewService::new(store, Box::new(FakeGrabber::new(Frame::new(64, 48))));

        let warped = service.warp_frame(DeviceSlot::Video0).unwrap();
        assert_eq!((warped.width(), warped.height()), (64, 48));
    }

    #[test]
    fn test_calibrate_then_warp() {
        let store = store(1);
        let service = PreviewService::new(
            store.clone(),
            Box::new(FakeGrabber::new(Frame::new(64, 48))),
        );
        let detector = FakeDetector::new(board_markers(0, (4, 4), (60, 44)));

        let result = service.calibrate(DeviceSlot::Video0, &detector).unwrap();
        assert_eq!(result.marker_set, crate::calibration::MarkerSet::Left);
        assert_eq!(store.snapshot().video0.corners, result.corners);

        let png = PreviewService::encode_png(&result.debug_frame).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        service.warp_frame(DeviceSlot::Video0).unwrap();
    }
}
