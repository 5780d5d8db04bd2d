//! Two-pass detection pipeline: coarse localization on a downscaled frame,
//! then a single jittered embedding pass at full resolution.

use crate::detector::DetectorError;
use crate::preview::{self, PreviewError};
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, Embedding, FaceRegion, EMBEDDING_DIM};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const MIN_FRAME_SIZE: u32 = 50;
pub const DETECTION_SCALE: f32 = 0.5;
pub const MIN_FACE_SIZE: u32 = 60;
pub const ENCODING_JITTERS: u32 = 3;

/// Fault raised by a face model provider.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("face detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("face embedder: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds face boxes in an RGB image.
pub trait FaceLocator {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ModelError>;
}

/// Computes an identity embedding for one face region, aggregating
/// `jitters` resampled views. `Ok(None)` means no features could be extracted.
pub trait FaceEmbedder {
    fn embed(
        &mut self,
        image: &RgbImage,
        region: &FaceRegion,
        jitters: u32,
    ) -> Result<Option<Embedding>, ModelError>;
}

/// Why a frame was rejected. `Display` is the user-facing message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("Empty frame data received")]
    EmptyFrame,
    #[error("Invalid frame data - cannot decode image: {0}")]
    UndecodableFrame(String),
    #[error("Frame too small: {width}x{height} (minimum {min}x{min})")]
    FrameTooSmall { width: u32, height: u32, min: u32 },
    #[error("No face detected")]
    NoFace,
    #[error("Multiple faces detected. Please ensure only one person is in frame.")]
    MultipleFaces { count: usize },
    #[error("Face too far. Please move closer.")]
    FaceTooFar { width: u32, height: u32 },
    #[error("Could not extract face features")]
    NoFeatures,
    #[error("Face analysis failed: {0}")]
    Model(String),
    #[error("Face analysis timed out")]
    Timeout,
}

/// Coarse grouping of rejections for callers that branch on the class only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The frame itself is unusable; resubmitting the same bytes will not help.
    Input,
    /// The frame decoded but does not show exactly one usable face.
    Detection,
    /// The model provider faulted.
    Model,
    Timeout,
}

impl Rejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::EmptyFrame => "empty_frame",
            Rejection::UndecodableFrame(_) => "undecodable_frame",
            Rejection::FrameTooSmall { .. } => "frame_too_small",
            Rejection::NoFace => "no_face",
            Rejection::MultipleFaces { .. } => "multiple_faces",
            Rejection::FaceTooFar { .. } => "face_too_far",
            Rejection::NoFeatures => "no_features",
            Rejection::Model(_) => "model_error",
            Rejection::Timeout => "timeout",
        }
    }

    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::EmptyFrame
            | Rejection::UndecodableFrame(_)
            | Rejection::FrameTooSmall { .. } => RejectionKind::Input,
            Rejection::NoFace
            | Rejection::MultipleFaces { .. }
            | Rejection::FaceTooFar { .. }
            | Rejection::NoFeatures => RejectionKind::Detection,
            Rejection::Model(_) => RejectionKind::Model,
            Rejection::Timeout => RejectionKind::Timeout,
        }
    }
}

impl From<ModelError> for Rejection {
    fn from(err: ModelError) -> Self {
        Rejection::Model(err.to_string())
    }
}

/// A single accepted face.
#[derive(Debug, Clone)]
pub struct Detection {
    pub region: FaceRegion,
    pub embedding: Embedding,
    /// Wall-clock time of the whole detect call.
    pub elapsed: Duration,
    /// JPEG of the frame with the region outlined. Display only.
    pub preview: Option<Vec<u8>>,
}

/// Terminal outcome of one detect call.
#[derive(Debug, Clone)]
pub enum DetectionResult {
    Rejected(Rejection),
    Detected(Detection),
}

impl DetectionResult {
    pub fn into_result(self) -> Result<Detection, Rejection> {
        match self {
            DetectionResult::Detected(d) => Ok(d),
            DetectionResult::Rejected(r) => Err(r),
        }
    }
}

/// Tunables for the two passes and the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Frames smaller than this on either side are rejected before detection.
    pub min_frame_size: u32,
    /// Downscale factor for the coarse pass, in (0, 1].
    pub detection_scale: f32,
    /// Minimum face width and height, in full-resolution pixels.
    pub min_face_size: u32,
    pub encoding_jitters: u32,
    pub render_preview: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_frame_size: MIN_FRAME_SIZE,
            detection_scale: DETECTION_SCALE,
            min_face_size: MIN_FACE_SIZE,
            encoding_jitters: ENCODING_JITTERS,
            render_preview: true,
        }
    }
}

pub struct DetectionPipeline<L, E> {
    locator: L,
    embedder: E,
    settings: PipelineSettings,
}

impl<L: FaceLocator, E: FaceEmbedder> DetectionPipeline<L, E> {
    pub fn new(locator: L, embedder: E, settings: PipelineSettings) -> Self {
        Self { locator, embedder, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run both passes over one compressed frame.
    ///
    /// Never panics and never returns an error: decode failures, model faults
    /// and panics inside a model adapter all become [`DetectionResult::Rejected`].
    /// The preview is rendered outside that guard and can only be dropped.
    pub fn detect(&mut self, frame: &[u8]) -> DetectionResult {
        let started = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(frame)))
            .unwrap_or_else(|payload| {
                let msg = panic_message(payload.as_ref());
                tracing::error!(panic = %msg, "face model panicked");
                Err(Rejection::Model(msg))
            });

        match outcome {
            Ok((region, embedding, rgb)) => {
                let preview = if self.settings.render_preview {
                    guarded_preview(|| preview::render_preview(&rgb, &region))
                } else {
                    None
                };
                drop(rgb);

                let detection = Detection {
                    region,
                    embedding,
                    elapsed: started.elapsed(),
                    preview,
                };
                tracing::info!(
                    top = detection.region.top,
                    right = detection.region.right,
                    bottom = detection.region.bottom,
                    left = detection.region.left,
                    elapsed_ms = detection.elapsed.as_secs_f64() * 1000.0,
                    "face detected"
                );
                DetectionResult::Detected(detection)
            }
            Err(rejection) => {
                tracing::debug!(reason = rejection.code(), %rejection, "frame rejected");
                DetectionResult::Rejected(rejection)
            }
        }
    }

    /// Both passes and the quality gate. Returns the decoded frame as well so
    /// the preview can be drawn on it.
    fn run(&mut self, frame: &[u8]) -> Result<(FaceRegion, Embedding, RgbImage), Rejection> {
        if frame.is_empty() {
            return Err(Rejection::EmptyFrame);
        }

        let rgb = image::load_from_memory(frame)
            .map_err(|e| Rejection::UndecodableFrame(e.to_string()))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();

        let min = self.settings.min_frame_size;
        if width < min || height < min {
            return Err(Rejection::FrameTooSmall { width, height, min });
        }

        // Pass 1: coarse localization on the downscaled frame.
        let scale = self.settings.detection_scale;
        let small_w = ((width as f32 * scale).round() as u32).max(1);
        let small_h = ((height as f32 * scale).round() as u32).max(1);
        let small = imageops::resize(&rgb, small_w, small_h, FilterType::Triangle);

        let mut boxes = self.locator.locate_faces(&small)?;
        drop(small);

        let bbox = match boxes.len() {
            0 => return Err(Rejection::NoFace),
            1 => boxes.remove(0),
            count => return Err(Rejection::MultipleFaces { count }),
        };

        let region = FaceRegion::from_scaled(&bbox, 1.0 / scale, width, height);
        tracing::debug!(
            confidence = bbox.confidence,
            ?region,
            "coarse pass located one face"
        );

        // Quality gate.
        let min_face = self.settings.min_face_size;
        if region.width() < min_face || region.height() < min_face {
            return Err(Rejection::FaceTooFar {
                width: region.width(),
                height: region.height(),
            });
        }

        // Pass 2: one jittered embedding on the full-resolution frame.
        let embedding = self
            .embedder
            .embed(&rgb, &region, self.settings.encoding_jitters)?
            .ok_or(Rejection::NoFeatures)?;

        if !embedding.is_well_formed() {
            return Err(Rejection::Model(format!(
                "expected a finite {EMBEDDING_DIM}-dim embedding, got {} values",
                embedding.values.len()
            )));
        }

        Ok((region, embedding, rgb))
    }
}

/// Render a preview, treating both an error and a panic as "no preview".
fn guarded_preview(render: impl FnOnce() -> Result<Vec<u8>, PreviewError>) -> Option<Vec<u8>> {
    match panic::catch_unwind(AssertUnwindSafe(render)) {
        Ok(Ok(jpeg)) => Some(jpeg),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "preview rendering failed; continuing without it");
            None
        }
        Err(payload) => {
            tracing::warn!(panic = %panic_message(payload.as_ref()), "preview rendering panicked; continuing without it");
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
