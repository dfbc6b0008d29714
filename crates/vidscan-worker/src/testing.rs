//! Test doubles for the detector and video backend.
//!
//! Frames are tagged through the red channel of pixel (0, 0) so a detector
//! can answer per frame without a model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use vidscan_media::{
    Detector, FrameSink, FrameSource, MediaError, MediaResult, Rgb, RgbImage, StreamInfo,
    VideoBackend,
};
use vidscan_models::{BoundingBox, Detection};

/// Frame of `width`x`height` whose tag is `tag`.
pub fn tagged_frame(tag: u8, width: u32, height: u32) -> RgbImage {
    let mut frame = RgbImage::from_pixel(width, height, Rgb([0, 32, 32]));
    frame.put_pixel(0, 0, Rgb([tag, 0, 0]));
    frame
}

/// Tags 1..=count, in order.
pub fn tagged_frames(count: u8, width: u32, height: u32) -> Vec<RgbImage> {
    (1..=count).map(|tag| tagged_frame(tag, width, height)).collect()
}

fn frame_tag(frame: &RgbImage) -> u8 {
    frame.get_pixel(0, 0).0[0]
}

/// One abnormal detection in the middle of the frame.
pub fn abnormal_detection() -> Detection {
    Detection::new(1, 0.9, BoundingBox::new(4, 4, 12, 12))
}

pub fn normal_detection() -> Detection {
    Detection::new(0, 0.8, BoundingBox::new(2, 2, 8, 8))
}

/// Detector answering from a per-tag script; unknown tags yield nothing.
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    script: HashMap<u8, Vec<Detection>>,
    fail_on: Option<u8>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: u8, detections: Vec<Detection>) -> Self {
        self.script.insert(tag, detections);
        self
    }

    /// Fail when a frame with this tag is seen.
    pub fn failing_on(mut self, tag: u8) -> Self {
        self.fail_on = Some(tag);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tag = frame_tag(frame);
        if self.fail_on == Some(tag) {
            return Err(MediaError::detection_failed(format!("scripted failure on frame {}", tag)));
        }
        Ok(self.script.get(&tag).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Video backend serving frames from memory and recording what is written.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    frames: Arc<Vec<RgbImage>>,
    total_frames: Option<u64>,
    fail_open: bool,
    fail_read_at: Option<usize>,
    gate: Option<Arc<Semaphore>>,
    written: Arc<Mutex<Vec<RgbImage>>>,
    opened: Arc<Mutex<Vec<PathBuf>>>,
}

impl MemoryBackend {
    /// Backend whose sources report the exact frame count.
    pub fn new(frames: Vec<RgbImage>) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: Arc::new(frames),
            total_frames: Some(total),
            fail_open: false,
            fail_read_at: None,
            gate: None,
            written: Arc::default(),
            opened: Arc::default(),
        }
    }

    /// Override the frame count the source reports.
    pub fn with_total_frames(mut self, total_frames: Option<u64>) -> Self {
        self.total_frames = total_frames;
        self
    }

    /// Sources can't be opened.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Reading the frame at this zero-based index fails.
    pub fn failing_read_at(mut self, index: usize) -> Self {
        self.fail_read_at = Some(index);
        self
    }

    /// Each frame waits for a permit; returns the semaphore that releases them.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    /// Frames written to sinks so far.
    pub fn written(&self) -> Vec<RgbImage> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Paths sources were opened for.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VideoBackend for MemoryBackend {
    async fn open_source(&self, path: &Path) -> MediaResult<Box<dyn FrameSource>> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(path.to_path_buf());
        }
        if self.fail_open {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        let (width, height) = self.frames.first().map(|f| f.dimensions()).unwrap_or((16, 16));
        Ok(Box::new(MemorySource {
            frames: Arc::clone(&self.frames),
            info: StreamInfo {
                width,
                height,
                fps: 25.0,
                total_frames: self.total_frames,
            },
            next: 0,
            fail_read_at: self.fail_read_at,
            gate: self.gate.clone(),
        }))
    }

    async fn open_sink(&self, path: &Path, _info: StreamInfo) -> MediaResult<Box<dyn FrameSink>> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(MemorySink {
            file,
            written: Arc::clone(&self.written),
            count: 0,
        }))
    }
}

struct MemorySource {
    frames: Arc<Vec<RgbImage>>,
    info: StreamInfo,
    next: usize,
    fail_read_at: Option<usize>,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| MediaError::internal("gate closed"))?
                .forget();
        }
        if self.fail_read_at == Some(self.next) {
            return Err(MediaError::ffmpeg_failed("scripted decode failure", None, Some(1)));
        }
        let frame = self.frames.get(self.next).cloned();
        self.next += 1;
        Ok(frame)
    }

    async fn close(self: Box<Self>) -> MediaResult<()> {
        Ok(())
    }
}

struct MemorySink {
    file: tokio::fs::File,
    written: Arc<Mutex<Vec<RgbImage>>>,
    count: u64,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if let Ok(mut written) = self.written.lock() {
            written.push(frame.clone());
        }
        self.count += 1;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> MediaResult<()> {
        use tokio::io::AsyncWriteExt;

        self.file
            .write_all(format!("memory video: {} frames", self.count).as_bytes())
            .await?;
        self.file.flush().await?;
        Ok(())
    }
}
