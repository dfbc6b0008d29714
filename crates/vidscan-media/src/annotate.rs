//! Frame annotation: detection boxes, labels and summary overlays.
//!
//! All drawing happens on a copy; the input frame is never modified.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::info;

use vidscan_models::{BoundingBox, Detection, FrameStats};

use crate::error::{MediaError, MediaResult};

const ABNORMAL_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const NORMAL_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const SUMMARY_GREEN: Rgb<u8> = Rgb([100, 255, 100]);

const BOX_THICKNESS: u32 = 2;
const HIGHLIGHT_THICKNESS: u32 = 3;
const LABEL_SCALE: f32 = 18.0;

/// DejaVu Sans, used unless another font is configured.
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

/// One overlay text line: text, color and pixel height.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLine {
    pub text: String,
    pub color: Rgb<u8>,
    pub scale: f32,
}

impl OverlayLine {
    fn new(text: String, color: Rgb<u8>, scale: f32) -> Self {
        Self { text, color, scale }
    }
}

/// Summary lines drawn in the top-left corner of a video frame.
///
/// `frame` is `(frame_number, total_frames)`; the progress line is omitted when `None`.
pub fn summary_lines(stats: &FrameStats, frame: Option<(u64, Option<u64>)>) -> Vec<OverlayLine> {
    let mut lines = vec![
        OverlayLine::new(
            format!("Abnormality: {:.1}%", stats.abnormality_percentage),
            ABNORMAL_COLOR,
            36.0,
        ),
        OverlayLine::new(
            format!(
                "Detections: {} | Abnormal: {}",
                stats.total_detections, stats.abnormal_detections
            ),
            WHITE,
            26.0,
        ),
    ];

    if let Some((frame_number, total_frames)) = frame {
        let total = match total_frames {
            Some(total) if total > 0 => total.to_string(),
            _ => "?".to_string(),
        };
        lines.push(OverlayLine::new(
            format!("Frame: {}/{}", frame_number, total),
            SUMMARY_GREEN,
            22.0,
        ));
    }

    lines
}

/// Label drawn above a detection box.
pub fn detection_label(detection: &Detection) -> String {
    format!("{} {:.2}", detection.class_name, detection.confidence)
}

/// Draws detection overlays onto frames.
///
/// The default annotator writes text with the bundled DejaVu Sans.
#[derive(Clone)]
pub struct FrameAnnotator {
    font: Option<FontArc>,
}

impl std::fmt::Debug for FrameAnnotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAnnotator")
            .field("has_font", &self.font.is_some())
            .finish()
    }
}

impl Default for FrameAnnotator {
    fn default() -> Self {
        Self::new(bundled_font().ok())
    }
}

/// The bundled overlay font.
pub fn bundled_font() -> MediaResult<FontArc> {
    FontArc::try_from_slice(BUNDLED_FONT)
        .map_err(|e| MediaError::InvalidFont(format!("bundled font: {}", e)))
}

impl FrameAnnotator {
    /// Create an annotator; without a font only boxes are drawn.
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    /// Boxes only, no text.
    pub fn without_text() -> Self {
        Self::new(None)
    }

    /// Load a TrueType/OpenType font from disk.
    pub fn from_font_file(path: impl AsRef<Path>) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| MediaError::InvalidFont(format!("{}: {}", path.display(), e)))?;
        info!(font = %path.display(), "Loaded overlay font");
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Annotate a video frame: labelled boxes plus abnormality, count and progress lines.
    pub fn annotate_frame(
        &self,
        frame: &RgbImage,
        detections: &[Detection],
        frame_number: u64,
        total_frames: Option<u64>,
    ) -> RgbImage {
        let mut out = self.annotate_image(frame, detections);
        let stats = FrameStats::from_detections(detections);
        self.draw_summary(&mut out, &summary_lines(&stats, Some((frame_number, total_frames))));
        out
    }

    /// Annotate a still image: labelled boxes only.
    pub fn annotate_image(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut out = image.clone();
        for detection in detections {
            let color = box_color(detection);
            draw_box(&mut out, &detection.bbox, color, BOX_THICKNESS);
            self.draw_label(&mut out, &detection.bbox, &detection_label(detection), color);
        }
        out
    }

    /// Camera-style overlay that calls out abnormal regions only.
    ///
    /// Normal detections get a thin unlabelled box; abnormal ones a thick red
    /// box with an `ABNORMAL` label. Abnormality and count lines are added.
    pub fn highlight_abnormal(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut out = image.clone();
        for detection in detections.iter().filter(|d| !d.is_abnormal()) {
            draw_box(&mut out, &detection.bbox, NORMAL_COLOR, 1);
        }
        for detection in detections.iter().filter(|d| d.is_abnormal()) {
            draw_box(&mut out, &detection.bbox, ABNORMAL_COLOR, HIGHLIGHT_THICKNESS);
            self.draw_label(&mut out, &detection.bbox, "ABNORMAL", ABNORMAL_COLOR);
        }

        let stats = FrameStats::from_detections(detections);
        self.draw_summary(&mut out, &summary_lines(&stats, None));
        out
    }

    fn draw_label(&self, image: &mut RgbImage, bbox: &BoundingBox, text: &str, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(LABEL_SCALE);
        let (text_w, text_h) = text_size(scale, font, text);

        // Above the box when there is room, otherwise just inside it.
        let y = if bbox.y1 >= text_h as i32 + 2 {
            bbox.y1 - text_h as i32 - 2
        } else {
            bbox.y1 + 2
        };

        draw_filled_rect_mut(
            image,
            Rect::at(bbox.x1, y).of_size(text_w.max(1) + 4, text_h.max(1) + 2),
            color,
        );
        draw_text_mut(image, WHITE, bbox.x1 + 2, y, scale, font, text);
    }

    fn draw_summary(&self, image: &mut RgbImage, lines: &[OverlayLine]) {
        let Some(font) = &self.font else {
            return;
        };
        let mut y = 10;
        for line in lines {
            draw_text_mut(image, line.color, 10, y, PxScale::from(line.scale), font, &line.text);
            y += line.scale as i32 + 14;
        }
    }
}

fn box_color(detection: &Detection) -> Rgb<u8> {
    if detection.is_abnormal() {
        ABNORMAL_COLOR
    } else {
        NORMAL_COLOR
    }
}

/// Draw a hollow box `thickness` pixels wide, growing inwards, clipped to the image.
fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let bbox = bbox.clamp_to(width, height);

    for i in 0..thickness as i32 {
        let x1 = bbox.x1 + i;
        let y1 = bbox.y1 + i;
        let x2 = bbox.x2 - i;
        let y2 = bbox.y2 - i;
        if x2 < x1 || y2 < y1 {
            break;
        }
        let rect = Rect::at(x1, y1).of_size((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}
