//! In-process fakes for the capture, processing and calibration seams

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::calibration::{DetectedMarker, MarkerDetector};
use crate::capture::{CaptureBackend, CaptureCommand, CaptureProcess, FrameGrabber};
use crate::config::{DeviceConfig, DeviceSlot};
use crate::geometry::Frame;
use crate::jobs::{JobManager, JobSummary};
use crate::processing::{FrameReader, FrameWriter, MediaToolkit, ProcessingError};

// ----------------------------------------------------------------------
// Media toolkit
// ----------------------------------------------------------------------

#[derive(Default)]
struct ToolkitState {
    runs: Vec<Vec<String>>,
}

/// Decodes every input as `frames` frames of `width`x`height` and records
/// ffmpeg invocations instead of running them.
#[derive(Clone)]
pub struct FakeToolkit {
    width: u32,
    height: u32,
    frames: u64,
    failing_frames: Arc<HashSet<u64>>,
    crash_after: Option<u64>,
    failing_pattern: Option<String>,
    state: Arc<Mutex<ToolkitState>>,
}

impl FakeToolkit {
    pub fn new(width: u32, height: u32, frames: u64) -> Self {
        Self {
            width,
            height,
            frames,
            failing_frames: Arc::new(HashSet::new()),
            crash_after: None,
            failing_pattern: None,
            state: Arc::new(Mutex::new(ToolkitState::default())),
        }
    }

    /// Frames at these indices fail to decode
    pub fn with_failing_frames(mut self, indices: &[u64]) -> Self {
        self.failing_frames = Arc::new(indices.iter().copied().collect());
        self
    }

    /// The decoder process dies after delivering `frames` frames
    pub fn crashing_after(mut self, frames: u64) -> Self {
        self.crash_after = Some(frames);
        self
    }

    /// Invocations whose arguments mention `pattern` fail
    pub fn failing_runs_with(mut self, pattern: &str) -> Self {
        self.failing_pattern = Some(pattern.to_string());
        self
    }

    pub fn runs(&self) -> Vec<Vec<String>> {
        self.state.lock().runs.clone()
    }
}

impl MediaToolkit for FakeToolkit {
    fn run(&self, args: &[String]) -> Result<(), ProcessingError> {
        self.state.lock().runs.push(args.to_vec());

        if let Some(pattern) = &self.failing_pattern {
            if args.join(" ").contains(pattern.as_str()) {
                return Err(ProcessingError::Ffmpeg(format!("exit status 1 ({})", pattern)));
            }
        }

        let output = args
            .last()
            .ok_or_else(|| ProcessingError::Ffmpeg("no output file".to_string()))?;
        fs::write(output, b"ffmpeg output")?;
        Ok(())
    }

    fn open_reader(&self, input: &Path) -> Result<Box<dyn FrameReader>, ProcessingError> {
        fs::metadata(input)?;
        Ok(Box::new(FakeReader {
            width: self.width,
            height: self.height,
            total: self.frames,
            next: 0,
            failing: self.failing_frames.clone(),
            crash_after: self.crash_after,
        }))
    }

    fn open_writer(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        _fps: f64,
    ) -> Result<Box<dyn FrameWriter>, ProcessingError> {
        Ok(Box::new(FakeWriter {
            output: output.to_path_buf(),
            width,
            height,
            written: 0,
        }))
    }
}

struct FakeReader {
    width: u32,
    height: u32,
    total: u64,
    next: u64,
    failing: Arc<HashSet<u64>>,
    crash_after: Option<u64>,
}

impl FrameReader for FakeReader {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fps(&self) -> Option<f64> {
        Some(30.0)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, ProcessingError> {
        if self.next >= self.total {
            return Ok(None);
        }
        let index = self.next;
        if self.crash_after == Some(index) {
            return Err(ProcessingError::Ffmpeg("decoder exited with exit status: 1".to_string()));
        }
        self.next += 1;

        if self.failing.contains(&index) {
            return Err(ProcessingError::Decoding(format!("corrupt frame {}", index)));
        }

        let mut frame = Frame::new(self.width, self.height);
        frame.fill_circle(
            self.width as i64 / 2,
            self.height as i64 / 2,
            self.width.min(self.height) as i64 / 4,
            [255, 255, 255, 255],
        );
        Ok(Some(frame))
    }
}

struct FakeWriter {
    output: PathBuf,
    width: u32,
    height: u32,
    written: u64,
}

impl FrameWriter for FakeWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), ProcessingError> {
        if (frame.width(), frame.height()) != (self.width, self.height) {
            return Err(ProcessingError::Encoding(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        self.written += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64, ProcessingError> {
        fs::write(
            &self.output,
            format!("frames={} size={}x{}", self.written, self.width, self.height),
        )?;
        Ok(self.written)
    }
}

// ----------------------------------------------------------------------
// Capture backend
// ----------------------------------------------------------------------

#[derive(Default)]
struct BackendState {
    spawned: Vec<CaptureCommand>,
    focused: Vec<String>,
    events: Vec<String>,
    fail_spawn: HashSet<DeviceSlot>,
    fail_focus: bool,
    fail_stop: HashSet<DeviceSlot>,
    ignore_stop: HashSet<DeviceSlot>,
}

/// Capture backend whose processes only exist in memory. Spawning touches
/// the output file the way a real encoder would.
#[derive(Clone, Default)]
pub struct FakeCaptureBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeCaptureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_spawn_for(self, slot: DeviceSlot) -> Self {
        self.state.lock().fail_spawn.insert(slot);
        self
    }

    pub fn fail_focus(self) -> Self {
        self.state.lock().fail_focus = true;
        self
    }

    /// The stop request itself errors
    pub fn fail_stop_for(self, slot: DeviceSlot) -> Self {
        self.state.lock().fail_stop.insert(slot);
        self
    }

    /// The process keeps running after a stop request
    pub fn ignore_stop_for(self, slot: DeviceSlot) -> Self {
        self.state.lock().ignore_stop.insert(slot);
        self
    }

    pub fn spawned(&self) -> Vec<CaptureCommand> {
        self.state.lock().spawned.clone()
    }

    /// Device names focus was applied to
    pub fn focused(&self) -> Vec<String> {
        self.state.lock().focused.clone()
    }

    /// "stop <slot>" and "kill <slot>" in the order they happened
    pub fn events(&self) -> Vec<String> {
        self.state.lock().events.clone()
    }
}

#[async_trait]
impl CaptureBackend for FakeCaptureBackend {
    async fn spawn(&self, command: &CaptureCommand) -> anyhow::Result<Box<dyn CaptureProcess>> {
        if self.state.lock().fail_spawn.contains(&command.slot) {
            anyhow::bail!("no such device");
        }

        fs::write(&command.output, b"raw capture")?;
        self.state.lock().spawned.push(command.clone());

        Ok(Box::new(FakeProcess {
            slot: command.slot,
            running: true,
            state: self.state.clone(),
        }))
    }

    async fn apply_focus(&self, device: &DeviceConfig) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.focused.push(device.device_name().to_string());
        if state.fail_focus {
            anyhow::bail!("v4l2-ctl not found");
        }
        Ok(())
    }
}

struct FakeProcess {
    slot: DeviceSlot,
    running: bool,
    state: Arc<Mutex<BackendState>>,
}

#[async_trait]
impl CaptureProcess for FakeProcess {
    fn slot(&self) -> DeviceSlot {
        self.slot
    }

    async fn request_stop(&mut self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.events.push(format!("stop {}", self.slot));
        if !state.ignore_stop.contains(&self.slot) {
            self.running = false;
        }
        if state.fail_stop.contains(&self.slot) {
            anyhow::bail!("broken pipe");
        }
        Ok(())
    }

    async fn is_running(&mut self) -> anyhow::Result<bool> {
        Ok(self.running)
    }

    async fn kill(&mut self) -> anyhow::Result<()> {
        self.state.lock().events.push(format!("kill {}", self.slot));
        self.running = false;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Preview and calibration
// ----------------------------------------------------------------------

/// Returns a fixed frame, after failing a given number of times
#[derive(Clone)]
pub struct FakeGrabber {
    frame: Frame,
    fail_first: usize,
    calls: Arc<AtomicUsize>,
}

impl FakeGrabber {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            fail_first: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_first(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FrameGrabber for FakeGrabber {
    fn grab(&self, _device: &DeviceConfig) -> anyhow::Result<Frame> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            anyhow::bail!("select timeout");
        }
        Ok(self.frame.clone())
    }
}

pub struct FakeDetector {
    markers: Vec<DetectedMarker>,
}

impl FakeDetector {
    pub fn new(markers: Vec<DetectedMarker>) -> Self {
        Self { markers }
    }
}

impl MarkerDetector for FakeDetector {
    fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<DetectedMarker>> {
        Ok(self.markers.clone())
    }
}

/// Four markers with IDs `first_id..first_id + 4` placed inside a board
/// whose outer corners are `top_left` and `bottom_right`.
pub fn board_markers(first_id: u32, top_left: (i32, i32), bottom_right: (i32, i32)) -> Vec<DetectedMarker> {
    const SIZE: f32 = 20.0;
    let (x0, y0) = (top_left.0 as f32, top_left.1 as f32);
    let (x1, y1) = (bottom_right.0 as f32, bottom_right.1 as f32);

    let square = |left: f32, top: f32| {
        [
            [left, top],
            [left + SIZE, top],
            [left + SIZE, top + SIZE],
            [left, top + SIZE],
        ]
    };

    vec![
        DetectedMarker::new(first_id, square(x0, y0)),
        DetectedMarker::new(first_id + 1, square(x1 - SIZE, y0)),
        DetectedMarker::new(first_id + 2, square(x0, y1 - SIZE)),
        DetectedMarker::new(first_id + 3, square(x1 - SIZE, y1 - SIZE)),
    ]
}

/// Poll until the job finishes or fails
pub async fn wait_for_job(manager: &JobManager, name: &str) -> JobSummary {
    for _ in 0..1000 {
        let summary = manager.job_status(name).unwrap();
        if summary.finished || summary.failed {
            return summary;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job '{}' did not complete", name);
}
