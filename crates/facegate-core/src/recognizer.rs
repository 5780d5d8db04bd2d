//! 128-d face embedder via ONNX Runtime.
//!
//! Crops the validated face region with context padding, resizes it to the
//! model's 150×150 input, and averages the embeddings of the plain crop and a
//! number of randomly jittered crops.

use crate::pipeline::{FaceEmbedder, ModelError};
use crate::types::{Embedding, FaceRegion, EMBEDDING_DIM};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const EMBEDDER_INPUT_SIZE: usize = 150;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;
/// Context added around the face box on every side, as a fraction of its size.
const CROP_PADDING: f32 = 0.25;
/// Maximum jitter shift, as a fraction of the crop size.
const JITTER_SHIFT: f32 = 0.05;
/// Maximum jitter zoom in either direction.
const JITTER_SCALE: f32 = 0.05;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; place the embedding model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pixel rectangle inside an image, `x`/`y` top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CropRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// ONNX face embedder producing 128-dimensional identity vectors.
pub struct OnnxEmbedder {
    session: Session,
    rng: StdRng,
}

impl OnnxEmbedder {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face embedding model"
        );

        Ok(Self {
            session,
            rng: StdRng::from_entropy(),
        })
    }

    /// Extract one embedding for `region`, averaged over `jitters` views.
    ///
    /// Returns `Ok(None)` when the region does not overlap the image.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        region: &FaceRegion,
        jitters: u32,
    ) -> Result<Option<Embedding>, RecognizerError> {
        let Some(base) = padded_crop(region, image.dimensions()) else {
            return Ok(None);
        };

        let views = jitters.max(1) as usize;
        let mut samples = Vec::with_capacity(views);
        samples.push(self.embed_crop(image, base, false)?);
        for _ in 1..views {
            let (rect, mirror) = jitter_crop(base, image.dimensions(), &mut self.rng);
            samples.push(self.embed_crop(image, rect, mirror)?);
        }

        tracing::trace!(views, "averaged jittered embeddings");
        Ok(Embedding::mean(&samples))
    }

    fn embed_crop(
        &mut self,
        image: &RgbImage,
        rect: CropRect,
        mirror: bool,
    ) -> Result<Embedding, RecognizerError> {
        let crop = imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image();
        let size = EMBEDDER_INPUT_SIZE as u32;
        let mut chip = imageops::resize(&crop, size, size, FilterType::Triangle);
        if mirror {
            imageops::flip_horizontal_in_place(&mut chip);
        }

        let input = preprocess(&chip);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(
        &mut self,
        image: &RgbImage,
        region: &FaceRegion,
        jitters: u32,
    ) -> Result<Option<Embedding>, ModelError> {
        Ok(self.extract(image, region, jitters)?)
    }
}

/// Grow `region` by [`CROP_PADDING`] on every side and clamp to the image.
fn padded_crop(region: &FaceRegion, (img_w, img_h): (u32, u32)) -> Option<CropRect> {
    let pad_x = (region.width() as f32 * CROP_PADDING) as u32;
    let pad_y = (region.height() as f32 * CROP_PADDING) as u32;

    let x0 = region.left.saturating_sub(pad_x);
    let y0 = region.top.saturating_sub(pad_y);
    let x1 = region.right.saturating_add(pad_x).min(img_w);
    let y1 = region.bottom.saturating_add(pad_y).min(img_h);

    (x1 > x0 && y1 > y0).then(|| CropRect { x: x0, y: y0, width: x1 - x0, height: y1 - y0 })
}

/// Randomly shift and zoom `base`, staying inside the image. Also decides
/// whether the view is mirrored.
fn jitter_crop<R: Rng>(base: CropRect, (img_w, img_h): (u32, u32), rng: &mut R) -> (CropRect, bool) {
    let zoom = 1.0 + rng.gen_range(-JITTER_SCALE..=JITTER_SCALE);
    let width = ((base.width as f32 * zoom).round() as u32).clamp(1, img_w);
    let height = ((base.height as f32 * zoom).round() as u32).clamp(1, img_h);

    let cx = base.x as f32 + base.width as f32 / 2.0
        + rng.gen_range(-JITTER_SHIFT..=JITTER_SHIFT) * base.width as f32;
    let cy = base.y as f32 + base.height as f32 / 2.0
        + rng.gen_range(-JITTER_SHIFT..=JITTER_SHIFT) * base.height as f32;

    let max_x = (img_w - width) as f32;
    let max_y = (img_h - height) as f32;
    let x = (cx - width as f32 / 2.0).round().clamp(0.0, max_x) as u32;
    let y = (cy - height as f32 / 2.0).round().clamp(0.0, max_y) as u32;

    (CropRect { x, y, width, height }, rng.gen_bool(0.5))
}

/// Convert a 150×150 RGB chip into a normalized NCHW float tensor.
fn preprocess(chip: &RgbImage) -> Array4<f32> {
    let size = EMBEDDER_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in chip.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= size || y >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, y, x]] = (pixel[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
        }
    }

    tensor
}
