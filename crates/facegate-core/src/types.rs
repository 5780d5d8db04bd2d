use serde::{Deserialize, Serialize};

/// Length of every face embedding produced by the embedding model.
pub const EMBEDDING_DIM: usize = 128;

/// Raw face box as reported by a face locator, in the coordinate space of the
/// image the locator was given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Validated face rectangle in full-resolution frame coordinates.
///
/// Edges follow the (top, right, bottom, left) convention; `right` and
/// `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    /// Map a box found on a downscaled image back to the original frame.
    ///
    /// Coordinates are multiplied by `inv_scale`, truncated to whole pixels and
    /// clamped to `frame_width` × `frame_height`.
    pub fn from_scaled(
        bbox: &BoundingBox,
        inv_scale: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let scale = |v: f32, max: u32| -> u32 {
            let scaled = (v * inv_scale).trunc();
            if scaled <= 0.0 {
                0
            } else {
                (scaled as u32).min(max)
            }
        };

        Self {
            top: scale(bbox.y, frame_height),
            right: scale(bbox.x + bbox.width, frame_width),
            bottom: scale(bbox.y + bbox.height, frame_height),
            left: scale(bbox.x, frame_width),
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Face identity signature produced by the embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Whether the vector has the length the matcher expects.
    pub fn is_well_formed(&self) -> bool {
        self.values.len() == EMBEDDING_DIM && self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise mean of several embeddings. `None` for an empty slice.
    pub fn mean(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let mut acc = vec![0.0f32; first.values.len()];
        for sample in samples {
            for (a, v) in acc.iter_mut().zip(sample.values.iter()) {
                *a += v;
            }
        }
        let n = samples.len() as f32;
        Some(Embedding {
            values: acc.into_iter().map(|v| v / n).collect(),
        })
    }
}

/// The canonical embedding stored for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity: String,
    pub embedding: Embedding,
    /// RFC 3339 timestamp of the last registration write.
    pub updated_at: String,
}

impl IdentityRecord {
    pub fn new(identity: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            identity: identity.into(),
            embedding,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Outcome of comparing a query against one or more enrolled embeddings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance to the closest candidate.
    pub distance: f32,
    /// `1 - distance`. A display heuristic, not a probability.
    pub confidence: f32,
    /// Identity of the closest candidate, present only when `matched`.
    pub identity: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.1, -0.2, 0.3]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_of_samples() {
        let samples = vec![
            Embedding::new(vec![1.0, 0.0]),
            Embedding::new(vec![0.0, 1.0]),
            Embedding::new(vec![2.0, 2.0]),
        ];
        let mean = Embedding::mean(&samples).unwrap();
        assert!((mean.values[0] - 1.0).abs() < 1e-6);
        assert!((mean.values[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_empty() {
        assert!(Embedding::mean(&[]).is_none());
    }

    #[test]
    fn test_well_formed_requires_full_dimension() {
        assert!(Embedding::new(vec![0.0; EMBEDDING_DIM]).is_well_formed());
        assert!(!Embedding::new(vec![0.0; 64]).is_well_formed());
        let mut bad = vec![0.0; EMBEDDING_DIM];
        bad[3] = f32::NAN;
        assert!(!Embedding::new(bad).is_well_formed());
    }

    #[test]
    fn test_region_from_scaled_doubles_coordinates() {
        let region = FaceRegion::from_scaled(&bbox(10.0, 20.0, 40.0, 50.0), 2.0, 640, 480);
        assert_eq!(region, FaceRegion { top: 40, right: 100, bottom: 140, left: 20 });
        assert_eq!(region.width(), 80);
        assert_eq!(region.height(), 100);
    }

    #[test]
    fn test_region_from_scaled_truncates() {
        let region = FaceRegion::from_scaled(&bbox(10.7, 20.3, 40.0, 50.0), 2.0, 640, 480);
        assert_eq!(region.left, 21);
        assert_eq!(region.top, 40);
    }

    #[test]
    fn test_region_from_scaled_clamps_to_frame() {
        let region = FaceRegion::from_scaled(&bbox(-5.0, -3.0, 400.0, 300.0), 2.0, 640, 480);
        assert_eq!(region, FaceRegion { top: 0, right: 640, bottom: 480, left: 0 });
    }

    #[test]
    fn test_embedding_serializes_as_plain_array() {
        let e = Embedding::new(vec![0.5, -0.25]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,-0.25]");
    }
}
