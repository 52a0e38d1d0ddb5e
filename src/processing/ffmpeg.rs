//! FFmpeg wrappers for the processing pipeline
//!
//! Frames are decoded to raw RGBA over a pipe, corrected in Rust, and piped
//! back into an H.264 encoder. Demuxing and stacking are plain ffmpeg runs.
//! [`MediaToolkit`] is the seam the pipeline talks to, so the pipeline can be
//! exercised without an ffmpeg binary.

use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use crate::config::{Resolution, StackOrientation};
use crate::geometry::Frame;
use crate::processing::types::ProcessingError;

/// Source of decoded frames
pub trait FrameReader: Send {
    fn dimensions(&self) -> (u32, u32);

    /// Frame rate reported by the container, if any
    fn fps(&self) -> Option<f64>;

    /// Next frame, `None` at end of stream
    fn read_frame(&mut self) -> Result<Option<Frame>, ProcessingError>;
}

/// Sink for encoded frames
pub trait FrameWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), ProcessingError>;

    /// Flush and close the output, returning the number of frames written
    fn finish(self: Box<Self>) -> Result<u64, ProcessingError>;
}

/// External encode/decode capability used by the pipeline
pub trait MediaToolkit: Send + Sync {
    /// Run one ffmpeg invocation to completion
    fn run(&self, args: &[String]) -> Result<(), ProcessingError>;

    fn open_reader(&self, input: &Path) -> Result<Box<dyn FrameReader>, ProcessingError>;

    fn open_writer(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameWriter>, ProcessingError>;
}

/// [`MediaToolkit`] backed by the `ffmpeg` and `ffprobe` binaries
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegToolkit {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl MediaToolkit for FfmpegToolkit {
    fn run(&self, args: &[String]) -> Result<(), ProcessingError> {
        tracing::info!("Running FFmpeg: {:?}", args);

        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to start FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessingError::Ffmpeg(format!(
                "FFmpeg exited with {}: {}",
                output.status,
                last_lines(&stderr, 5)
            )));
        }
        Ok(())
    }

    fn open_reader(&self, input: &Path) -> Result<Box<dyn FrameReader>, ProcessingError> {
        Ok(Box::new(VideoDecoder::open(&self.ffmpeg, &self.ffprobe, input)?))
    }

    fn open_writer(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameWriter>, ProcessingError> {
        Ok(Box::new(VideoEncoder::create(
            &self.ffmpeg,
            output,
            width,
            height,
            fps,
        )?))
    }
}

/// Video decoder using FFmpeg to read frames from a video file
pub struct VideoDecoder {
    process: Child,
    stdout: BufReader<ChildStdout>,
    /// Drains stderr so a chatty decoder never blocks on a full pipe
    stderr: Option<JoinHandle<String>>,
    exhausted: bool,
    width: u32,
    height: u32,
    fps: Option<f64>,
    frame_size: usize,
    frames_read: u64,
}

impl VideoDecoder {
    /// Open a video file for decoding
    pub fn open(ffmpeg: &Path, ffprobe: &Path, video_path: &Path) -> Result<Self, ProcessingError> {
        let (width, height, fps) = probe_video(ffprobe, video_path)?;

        tracing::info!(
            "Opening video decoder for {:?}: {}x{} @ {:?}fps",
            video_path,
            width,
            height,
            fps
        );

        // -s pins the output size so every frame is exactly width*height*4 bytes
        let mut process = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-err_detect", "ignore_err", "-i"])
            .arg(video_path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "-s"])
            .arg(format!("{}x{}", width, height))
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to start FFmpeg decoder: {}", e)))?;

        let frame_size = Frame::byte_len(width, height);

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| ProcessingError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;

        let stderr = process.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        Ok(Self {
            process,
            stdout: BufReader::with_capacity(frame_size * 2, stdout),
            stderr,
            exhausted: false,
            width,
            height,
            fps,
            frame_size,
            frames_read: 0,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Reap the decoder once its output ends. A clean exit is the end of the
    /// stream; anything else means frames were lost.
    fn finish_stream(&mut self) -> Result<Option<Frame>, ProcessingError> {
        self.exhausted = true;

        let status = self
            .process
            .wait()
            .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to wait for FFmpeg decoder: {}", e)))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(ProcessingError::Ffmpeg(format!(
                "FFmpeg decoder exited with {} after {} frames: {}",
                status,
                self.frames_read,
                last_lines(&stderr, 5)
            )));
        }

        tracing::debug!("FFmpeg decoder finished after {} frames", self.frames_read);
        Ok(None)
    }
}

impl FrameReader for VideoDecoder {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, ProcessingError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut buffer = vec![0u8; self.frame_size];

        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {
                self.frames_read += 1;
                Frame::from_rgba(self.width, self.height, buffer)
                    .map(Some)
                    .ok_or_else(|| ProcessingError::Decoding("Frame size mismatch".to_string()))
            }
            // A truncated trailing frame ends the stream as well
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => self.finish_stream(),
            Err(e) => Err(ProcessingError::Decoding(format!(
                "Failed to read frame {}: {}",
                self.frames_read, e
            ))),
        }
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        if !self.exhausted {
            let _ = self.process.kill();
            let _ = self.process.wait();
        }
    }
}

/// Probe width, height and frame rate of the first video stream
fn probe_video(ffprobe: &Path, video_path: &Path) -> Result<(u32, u32, Option<f64>), ProcessingError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,r_frame_rate",
            "-of",
            "csv=p=0",
        ])
        .arg(video_path)
        .output()
        .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProcessingError::Ffmpeg(format!("ffprobe failed: {}", stderr.trim())));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe_output(stdout: &str) -> Result<(u32, u32, Option<f64>), ProcessingError> {
    let line = stdout.lines().next().unwrap_or("").trim();
    let parts: Vec<&str> = line.split(',').collect();

    if parts.len() < 3 {
        return Err(ProcessingError::Decoding(format!(
            "Unexpected ffprobe output: {}",
            stdout
        )));
    }

    let width: u32 = parts[0]
        .parse()
        .map_err(|_| ProcessingError::Decoding(format!("Invalid width: {}", parts[0])))?;
    let height: u32 = parts[1]
        .parse()
        .map_err(|_| ProcessingError::Decoding(format!("Invalid height: {}", parts[1])))?;

    // Frame rate comes as "30/1" or "30000/1001"; "0/0" means unknown
    let fps = match parts[2].split_once('/') {
        Some((num, den)) => match (num.parse::<f64>(), den.parse::<f64>()) {
            (Ok(num), Ok(den)) if den > 0.0 => Some(num / den),
            _ => None,
        },
        None => parts[2].parse().ok(),
    }
    .filter(|fps: &f64| fps.is_finite() && *fps > 0.0);

    Ok((width, height, fps))
}

/// H.264 encoder fed raw RGBA frames over stdin
pub struct VideoEncoder {
    process: Child,
    stdin: ChildStdin,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl VideoEncoder {
    pub fn create(
        ffmpeg: &Path,
        output: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self, ProcessingError> {
        let args = encoder_args(output, width, height, fps);
        tracing::info!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| ProcessingError::Ffmpeg("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Self {
            process,
            stdin,
            width,
            height,
            frame_count: 0,
        })
    }
}

impl FrameWriter for VideoEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), ProcessingError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(ProcessingError::Encoding(format!(
                "Frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        self.stdin
            .write_all(frame.data())
            .map_err(|e| ProcessingError::Encoding(format!("Failed to write frame: {}", e)))?;
        self.frame_count += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<u64, ProcessingError> {
        let Self {
            process,
            stdin,
            frame_count,
            ..
        } = *self;

        // EOF on stdin tells FFmpeg to finalize the file
        drop(stdin);

        let output = process
            .wait_with_output()
            .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessingError::Ffmpeg(format!(
                "FFmpeg encoder exited with {}: {}",
                output.status,
                last_lines(&stderr, 5)
            )));
        }

        tracing::info!("FFmpeg encoder finished: {} frames written", frame_count);
        Ok(frame_count)
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Arguments for the raw RGBA -> H.264 encoder
pub fn encoder_args(output: &Path, width: u32, height: u32, fps: f64) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        path_arg(output),
    ]
}

/// Demux the audio track of a captured stream into an MP3
pub fn extract_audio_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        path_arg(input),
        "-vn".to_string(),
        "-codec:a".to_string(),
        "libmp3lame".to_string(),
        path_arg(output),
    ]
}

/// Mux a single processed stream with the extracted audio, no re-encode
pub fn remux_args(audio: &Path, video: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        path_arg(audio),
        "-i".to_string(),
        path_arg(video),
        "-err_detect".to_string(),
        "ignore_err".to_string(),
        "-codec:a".to_string(),
        "copy".to_string(),
        "-codec:v".to_string(),
        "copy".to_string(),
        path_arg(output),
    ]
}

/// One processed stream taking part in a stack
#[derive(Debug, Clone)]
pub struct StackInput {
    pub path: PathBuf,
    pub resolution: Resolution,
}

/// `filter_complex` placing `second` after `first`. The second input is
/// scaled to match the first along the shared edge.
pub fn stack_filter(first: Resolution, orientation: StackOrientation) -> String {
    match orientation {
        StackOrientation::Horizontal => format!(
            "[1:v]scale=-2:{}[second];[0:v][second]hstack=inputs=2[v]",
            first.height
        ),
        StackOrientation::Vertical => format!(
            "[1:v]scale={}:-2[second];[0:v][second]vstack=inputs=2[v]",
            first.width
        ),
    }
}

/// Stack two processed streams and add the extracted audio
pub fn stack_args(
    first: &StackInput,
    second: &StackInput,
    audio: &Path,
    orientation: StackOrientation,
    framerate: u32,
    output: &Path,
) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        path_arg(&first.path),
        "-i".to_string(),
        path_arg(&second.path),
        "-i".to_string(),
        path_arg(audio),
        "-err_detect".to_string(),
        "ignore_err".to_string(),
        "-filter_complex".to_string(),
        stack_filter(first.resolution, orientation),
        "-map".to_string(),
        "[v]".to_string(),
        "-map".to_string(),
        "2:a".to_string(),
        "-r".to_string(),
        framerate.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        path_arg(output),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in `ffprobe` and `ffmpeg` scripts decoding a 2x2 stream that
    /// yields one frame, then exits with `exit_code`
    #[cfg(unix)]
    fn fake_decoder(dir: &Path, exit_code: i32) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let write_script = |name: &str, body: String| {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        let ffprobe = write_script("ffprobe", "#!/bin/sh\necho 2,2,30/1\n".to_string());
        let ffmpeg = write_script(
            "ffmpeg",
            format!(
                "#!/bin/sh\nprintf 0123456789abcdef\necho 'Invalid data found when processing input' >&2\nexit {}\n",
                exit_code
            ),
        );
        (ffmpeg, ffprobe)
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_crash_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ffmpeg, ffprobe) = fake_decoder(dir.path(), 1);

        let mut decoder = VideoDecoder::open(&ffmpeg, &ffprobe, &dir.path().join("in.mp4")).unwrap();
        assert_eq!(decoder.dimensions(), (2, 2));
        assert!(decoder.read_frame().unwrap().is_some());

        match decoder.read_frame() {
            Err(ProcessingError::Ffmpeg(message)) => {
                assert!(message.contains("after 1 frames"), "{}", message);
                assert!(message.contains("Invalid data found"), "{}", message);
            }
            other => panic!("expected a decoder failure, got {:?}", other.map(|f| f.is_some())),
        }
        assert!(decoder.read_frame().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_clean_exit_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (ffmpeg, ffprobe) = fake_decoder(dir.path(), 0);

        let mut decoder = VideoDecoder::open(&ffmpeg, &ffprobe, &dir.path().join("in.mp4")).unwrap();
        assert!(decoder.read_frame().unwrap().is_some());
        assert!(decoder.read_frame().unwrap().is_none());
        assert_eq!(decoder.frames_read(), 1);
    }

    #[test]
    fn test_parse_probe_output() {
        let (w, h, fps) = parse_probe_output("1920,1080,30000/1001\n").unwrap();
        assert_eq!((w, h), (1920, 1080));
        assert!((fps.unwrap() - 29.97).abs() < 0.01);

        let (_, _, fps) = parse_probe_output("640,480,0/0").unwrap();
        assert!(fps.is_none());

        assert!(parse_probe_output("").is_err());
        assert!(parse_probe_output("abc,480,30/1").is_err());
    }

    #[test]
    fn test_remux_is_stream_copy() {
        let args = remux_args(
            Path::new("job/temp_audio.mp3"),
            Path::new("job/temp_processed_video0.mp4"),
            Path::new("job/out.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-codec:a copy -codec:v copy"));
        assert!(!joined.contains("libx264"));
        assert_eq!(args.last().unwrap(), "job/out.mp4");
    }

    #[test]
    fn test_extract_audio_uses_mp3() {
        let args = extract_audio_args(Path::new("a.mp4"), Path::new("a.mp3"));
        assert!(args.join(" ").contains("-codec:a libmp3lame"));
    }

    #[test]
    fn test_stack_filter_orientation() {
        let res = Resolution::new(1280, 720);
        assert_eq!(
            stack_filter(res, StackOrientation::Horizontal),
            "[1:v]scale=-2:720[second];[0:v][second]hstack=inputs=2[v]"
        );
        assert!(stack_filter(res, StackOrientation::Vertical).contains("vstack"));
    }

    #[test]
    fn test_stack_args_framerate_and_order() {
        let first = StackInput {
            path: PathBuf::from("b.mp4"),
            resolution: Resolution::new(1920, 1080),
        };
        let second = StackInput {
            path: PathBuf::from("a.mp4"),
            resolution: Resolution::new(1920, 1080),
        };
        let args = stack_args(
            &first,
            &second,
            Path::new("audio.mp3"),
            StackOrientation::Vertical,
            60,
            Path::new("out.mp4"),
        );

        let inputs: Vec<&String> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| *flag == "-i")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(inputs, ["b.mp4", "a.mp4", "audio.mp3"]);

        let r = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[r + 1], "60");
    }
}
