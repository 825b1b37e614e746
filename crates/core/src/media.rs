//! Decoded media streams and the decoder that produces them.
//!
//! Codec work is delegated to `ffprobe`/`ffmpeg` child processes. Both tools
//! write to stdout so nothing is left on disk, and every child is spawned with
//! `kill_on_drop` so an abandoned run does not leave decoders behind.

use crate::error::DecodeError;
use crate::session::Domain;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStdout, Command};

/// Sample rate the audio stream is normalized to.
pub const ANALYSIS_SAMPLE_RATE: u32 = 16_000;
/// Frames per second sampled from the video stream.
pub const ANALYSIS_FRAME_RATE: f32 = 2.0;
pub const FRAME_WIDTH: usize = 64;
pub const FRAME_HEIGHT: usize = 36;
/// Read size for decoder stdout.
const PIPE_CHUNK_BYTES: usize = 64 * 1024;

/// What `probe` learned about a recording before any decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub duration_secs: Option<f64>,
    pub has_audio: bool,
    pub has_video: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Mono PCM samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioStream {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Downscaled 8-bit grayscale frames sampled at a fixed rate.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    pub frames: Vec<Vec<u8>>,
    pub width: usize,
    pub height: usize,
    pub frame_rate: f32,
}

/// The decoding collaborator. Implemented by [`FfmpegDecoder`] in production
/// and mocked in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaDecoder: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, DecodeError>;

    async fn decode_audio(&self, path: &Path) -> Result<AudioStream, DecodeError>;

    async fn decode_video(&self, path: &Path) -> Result<VideoStream, DecodeError>;
}

/// Locations of the ffmpeg tools.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

pub struct FfmpegDecoder {
    config: FfmpegConfig,
}

impl FfmpegDecoder {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new(FfmpegConfig::default())
    }
}

#[async_trait]
impl MediaDecoder for FfmpegDecoder {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, DecodeError> {
        let mut cmd = Command::new(&self.config.ffprobe);
        cmd.args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path);
        let stdout = run_tool(cmd, "ffprobe").await?;
        parse_probe_json(&stdout)
    }

    async fn decode_audio(&self, path: &Path) -> Result<AudioStream, DecodeError> {
        let mut cmd = Command::new(&self.config.ffmpeg);
        cmd.args(["-v", "error", "-i"])
            .arg(path)
            .args(["-vn", "-ac", "1", "-ar"])
            .arg(ANALYSIS_SAMPLE_RATE.to_string())
            .args(["-f", "f32le", "-acodec", "pcm_f32le", "pipe:1"]);
        let mut pcm = PcmDecoder::default();
        stream_tool(cmd, "ffmpeg", |chunk| pcm.push(chunk)).await?;

        let samples = pcm.finish();
        if samples.is_empty() {
            return Err(DecodeError::MissingStream(Domain::Audio));
        }
        tracing::debug!(
            "Decoded {} audio samples ({:.1}s) from {}",
            samples.len(),
            samples.len() as f64 / ANALYSIS_SAMPLE_RATE as f64,
            path.display()
        );
        Ok(AudioStream {
            samples,
            sample_rate: ANALYSIS_SAMPLE_RATE,
        })
    }

    async fn decode_video(&self, path: &Path) -> Result<VideoStream, DecodeError> {
        let filter =
            format!("fps={ANALYSIS_FRAME_RATE},scale={FRAME_WIDTH}:{FRAME_HEIGHT},format=gray");
        let mut cmd = Command::new(&self.config.ffmpeg);
        cmd.args(["-v", "error", "-i"])
            .arg(path)
            .args(["-an", "-vf"])
            .arg(filter)
            .args(["-f", "rawvideo", "pipe:1"]);
        let mut splitter = FrameSplitter::new(FRAME_WIDTH * FRAME_HEIGHT);
        stream_tool(cmd, "ffmpeg", |chunk| splitter.push(chunk)).await?;

        let frames = splitter.finish();
        if frames.is_empty() {
            return Err(DecodeError::MissingStream(Domain::Video));
        }
        tracing::debug!("Decoded {} video frames from {}", frames.len(), path.display());
        Ok(VideoStream {
            frames,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            frame_rate: ANALYSIS_FRAME_RATE,
        })
    }
}

fn configure_tool(cmd: &mut Command, tool: &str) {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    tracing::debug!("Running {tool}: {:?}", cmd);
}

fn exit_error(tool: &str, status: std::process::ExitStatus, stderr: &[u8]) -> DecodeError {
    DecodeError::CommandFailed {
        tool: tool.to_string(),
        code: status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}

/// Runs a tool with small output and returns its stdout.
async fn run_tool(mut cmd: Command, tool: &str) -> Result<Vec<u8>, DecodeError> {
    configure_tool(&mut cmd, tool);
    let output = cmd.output().await.map_err(|source| DecodeError::Spawn {
        tool: tool.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(exit_error(tool, output.status, &output.stderr));
    }
    Ok(output.stdout)
}

/// Runs a tool and hands its stdout to `sink` chunk by chunk, so decoded
/// media is never held twice.
async fn stream_tool(
    mut cmd: Command,
    tool: &str,
    mut sink: impl FnMut(&[u8]),
) -> Result<(), DecodeError> {
    configure_tool(&mut cmd, tool);
    let mut child = cmd.spawn().map_err(|source| DecodeError::Spawn {
        tool: tool.to_string(),
        source,
    })?;
    let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(DecodeError::Malformed(format!("{tool} pipes were not captured")));
    };

    let mut errors = Vec::new();
    let (read, _) = tokio::join!(
        pump(stdout, &mut sink),
        stderr.read_to_end(&mut errors)
    );
    read.map_err(|source| DecodeError::Read {
        tool: tool.to_string(),
        source,
    })?;

    let status = child.wait().await.map_err(|source| DecodeError::Read {
        tool: tool.to_string(),
        source,
    })?;
    if !status.success() {
        return Err(exit_error(tool, status, &errors));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    disposition: ProbeDisposition,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parses `ffprobe -print_format json` output.
fn parse_probe_json(stdout: &[u8]) -> Result<MediaInfo, DecodeError> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| DecodeError::Malformed(format!("ffprobe json: {e}")))?;

    let mut info = MediaInfo {
        duration_secs: probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0),
        ..Default::default()
    };

    for stream in &probe.streams {
        match stream.codec_type.as_deref() {
            Some("audio") => info.has_audio = true,
            // Cover art is exposed as a one-frame video stream.
            Some("video") if stream.disposition.attached_pic == 0 => {
                info.has_video = true;
                info.width = info.width.or(stream.width);
                info.height = info.height.or(stream.height);
            }
            _ => {}
        }
    }
    Ok(info)
}

async fn pump(stdout: ChildStdout, sink: &mut impl FnMut(&[u8])) -> std::io::Result<()> {
    let mut reader = BufReader::with_capacity(PIPE_CHUNK_BYTES, stdout);
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(());
        }
        let len = chunk.len();
        sink(chunk);
        reader.consume(len);
    }
}

/// Little-endian f32 samples assembled across chunk boundaries.
#[derive(Default)]
struct PcmDecoder {
    samples: Vec<f32>,
    partial: Vec<u8>,
}

impl PcmDecoder {
    fn push(&mut self, mut bytes: &[u8]) {
        if !self.partial.is_empty() {
            let take = (4 - self.partial.len()).min(bytes.len());
            self.partial.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if let Ok(sample) = <[u8; 4]>::try_from(self.partial.as_slice()) {
                self.samples.push(f32::from_le_bytes(sample));
                self.partial.clear();
            }
        }
        let mut whole = bytes.chunks_exact(4);
        self.samples
            .extend(whole.by_ref().map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])));
        self.partial.extend_from_slice(whole.remainder());
    }

    /// A trailing partial sample is dropped.
    fn finish(self) -> Vec<f32> {
        self.samples
    }
}

/// Fixed-size raw frames assembled across chunk boundaries.
struct FrameSplitter {
    frame_len: usize,
    frames: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl FrameSplitter {
    fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            frames: Vec::new(),
            current: Vec::with_capacity(frame_len),
        }
    }

    fn push(&mut self, mut bytes: &[u8]) {
        if self.frame_len == 0 {
            return;
        }
        while !bytes.is_empty() {
            let take = (self.frame_len - self.current.len()).min(bytes.len());
            self.current.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.current.len() == self.frame_len {
                let next = Vec::with_capacity(self.frame_len);
                self.frames.push(std::mem::replace(&mut self.current, next));
            }
        }
    }

    /// A trailing partial frame is dropped.
    fn finish(self) -> Vec<Vec<u8>> {
        self.frames
    }
}
