//! Stub model providers and frame builders shared by unit tests.

use crate::detector::DetectorError;
use crate::pipeline::{FaceEmbedder, FaceLocator, ModelError};
use crate::types::{BoundingBox, Embedding, FaceRegion, EMBEDDING_DIM};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 128-d embedding whose first component is `offset`. The distance between two
/// of these is the difference of their offsets.
pub fn synthetic_embedding(offset: f32) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[0] = offset;
    Embedding::new(values)
}

pub fn face_box(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
    BoundingBox { x, y, width, height, confidence: 0.95 }
}

pub fn encode_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([90, 120, 150]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

enum LocatorBehavior {
    Boxes(Vec<BoundingBox>),
    Fail(String),
    Panic,
}

pub struct StubLocator {
    behavior: LocatorBehavior,
    pub calls: Arc<AtomicUsize>,
    pub seen_dims: Arc<Mutex<Option<(u32, u32)>>>,
}

impl StubLocator {
    fn with(behavior: LocatorBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            seen_dims: Arc::new(Mutex::new(None)),
        }
    }

    pub fn returning(boxes: Vec<BoundingBox>) -> Self {
        Self::with(LocatorBehavior::Boxes(boxes))
    }

    pub fn failing(message: &str) -> Self {
        Self::with(LocatorBehavior::Fail(message.to_string()))
    }

    pub fn panicking() -> Self {
        Self::with(LocatorBehavior::Panic)
    }
}

impl FaceLocator for StubLocator {
    fn locate_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen_dims.lock().unwrap() = Some(image.dimensions());
        match &self.behavior {
            LocatorBehavior::Boxes(boxes) => Ok(boxes.clone()),
            LocatorBehavior::Fail(msg) => Err(DetectorError::InferenceFailed(msg.clone()).into()),
            LocatorBehavior::Panic => panic!("stub locator panicked"),
        }
    }
}

type EmbedCall = ((u32, u32), FaceRegion, u32);

/// Returns queued embeddings in order, repeating the last one once exhausted.
pub struct StubEmbedder {
    queue: Vec<Option<Embedding>>,
    pub calls: Arc<AtomicUsize>,
    pub last_call: Arc<Mutex<Option<EmbedCall>>>,
}

impl StubEmbedder {
    pub fn returning(embedding: Option<Embedding>) -> Self {
        Self::sequence(vec![embedding])
    }

    pub fn sequence(queue: Vec<Option<Embedding>>) -> Self {
        Self {
            queue,
            calls: Arc::new(AtomicUsize::new(0)),
            last_call: Arc::new(Mutex::new(None)),
        }
    }
}

impl FaceEmbedder for StubEmbedder {
    fn embed(
        &mut self,
        image: &RgbImage,
        region: &FaceRegion,
        jitters: u32,
    ) -> Result<Option<Embedding>, ModelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_call.lock().unwrap() = Some((image.dimensions(), *region, jitters));
        let idx = n.min(self.queue.len().saturating_sub(1));
        Ok(self.queue.get(idx).cloned().flatten())
    }
}
