//! Frame-level video input and output.
//!
//! Sources decode a container into RGB frames in order; sinks encode RGB
//! frames into an output container. The FFmpeg backend streams `rgb24`
//! rawvideo through process pipes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbImage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// Stream geometry shared between a source and the sink it feeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Best-effort frame count; `None` when the container does not say
    pub total_frames: Option<u64>,
}

impl From<&VideoInfo> for StreamInfo {
    fn from(info: &VideoInfo) -> Self {
        Self {
            width: info.width,
            height: info.height,
            fps: info.fps,
            total_frames: info.total_frames,
        }
    }
}

impl StreamInfo {
    /// Bytes in one packed RGB frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// FFmpeg arguments decoding `path` to packed rgb24 on stdout.
///
/// Autorotation is disabled so every frame has the probed coded size.
fn decoder_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-noautorotate",
        "-i",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(path.as_os_str().to_os_string());
    args.extend(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"].iter().map(OsString::from));
    args
}

/// Sequential frame reader.
#[async_trait]
pub trait FrameSource: Send {
    fn info(&self) -> StreamInfo;

    /// Next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>>;

    /// Release the source.
    async fn close(self: Box<Self>) -> MediaResult<()>;
}

/// Sequential frame writer.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()>;

    /// Flush and finalize the output container.
    async fn finish(self: Box<Self>) -> MediaResult<()>;
}

/// Opens frame sources and sinks for video jobs.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn open_source(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>>;

    async fn open_sink(&self, path: &Path, info: StreamInfo) -> MediaResult<Box<dyn FrameSink>>;
}

/// FFmpeg/FFprobe CLI backend.
///
/// Output is MPEG-4 Part 2 tagged `XVID` in whatever container the output
/// path names (`.avi` by convention).
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }

    /// Check that both `ffmpeg` and `ffprobe` are on PATH.
    pub fn check_available() -> MediaResult<()> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
        which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;
        Ok(())
    }
}

#[async_trait]
impl VideoBackend for FfmpegBackend {
    async fn open_source(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        let probed = probe_video(path).await?;
        let info = StreamInfo::from(&probed);
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let mut child = Command::new("ffmpeg")
            .args(decoder_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg decoder: {}", e), None, None))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None))?;
        let stderr = collect_stderr(&mut child);

        info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            total_frames = ?info.total_frames,
            codec = %probed.codec,
            rotation = probed.rotation,
            "Opened video source"
        );

        Ok(Box::new(FfmpegFrameSource {
            path: path.to_path_buf(),
            info,
            child,
            stdout,
            stderr,
            exhausted: false,
            frames_read: 0,
        }))
    }

    async fn open_sink(&self, path: &Path, info: StreamInfo) -> MediaResult<Box<dyn FrameSink>> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = Command::new("ffmpeg")
            .args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", info.width, info.height)])
            .args(["-r", &format!("{}", info.fps)])
            .args(["-i", "-"])
            .args(["-c:v", "mpeg4", "-vtag", "xvid", "-q:v", "5", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::ffmpeg_failed(format!("Failed to spawn FFmpeg encoder: {}", e), None, None))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stdin", None, None))?;
        let stderr = collect_stderr(&mut child);

        debug!(path = %path.display(), "Opened video sink");

        Ok(Box::new(FfmpegFrameSink {
            path: path.to_path_buf(),
            info,
            child,
            stdin: Some(stdin),
            stderr,
        }))
    }
}

/// Drain a child's stderr in the background so it never blocks on a full pipe.
fn collect_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        })
    })
}

async fn stderr_text(handle: Option<JoinHandle<String>>) -> Option<String> {
    match handle {
        Some(h) => h.await.ok().filter(|s| !s.trim().is_empty()),
        None => None,
    }
}

/// Fill `buf` completely; returns the number of bytes read before EOF.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// FFmpeg decoder process producing `rgb24` frames on stdout.
pub struct FfmpegFrameSource {
    path: PathBuf,
    info: StreamInfo,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    exhausted: bool,
    frames_read: u64,
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.info.frame_len()];
        let filled = read_full(&mut self.stdout, &mut buf).await?;

        if filled < buf.len() {
            if filled > 0 {
                warn!(
                    path = %self.path.display(),
                    bytes = filled,
                    "Discarding truncated trailing frame"
                );
            }
            self.exhausted = true;
            return Ok(None);
        }

        self.frames_read += 1;
        RgbImage::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| MediaError::internal("Failed to create frame buffer"))
    }

    async fn close(mut self: Box<Self>) -> MediaResult<()> {
        if !self.exhausted {
            // Stopped early: the decoder's exit status is meaningless.
            let _ = self.child.start_kill();
            let _ = self.child.wait().await;
            return Ok(());
        }

        let status = self.child.wait().await?;
        if !status.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg decoder failed after {} frames", self.frames_read),
                stderr_text(self.stderr.take()).await,
                status.code(),
            ));
        }
        Ok(())
    }
}

/// FFmpeg encoder process consuming `rgb24` frames on stdin.
pub struct FfmpegFrameSink {
    path: PathBuf,
    info: StreamInfo,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

#[async_trait]
impl FrameSink for FfmpegFrameSink {
    async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.dimensions() != (self.info.width, self.info.height) {
            return Err(MediaError::internal(format!(
                "Frame size {:?} does not match output {}x{}",
                frame.dimensions(),
                self.info.width,
                self.info.height
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("Sink already finished"))?;

        if let Err(e) = stdin.write_all(frame.as_raw()).await {
            return Err(MediaError::ffmpeg_failed(
                format!("Failed to write frame to encoder: {}", e),
                stderr_text(self.stderr.take()).await,
                None,
            ));
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> MediaResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }

        let status = self.child.wait().await?;
        if !status.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg encoder failed for {}", self.path.display()),
                stderr_text(self.stderr.take()).await,
                status.code(),
            ));
        }

        debug!(path = %self.path.display(), "Finalized video sink");
        Ok(())
    }
}
