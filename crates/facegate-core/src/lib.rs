//! facegate-core: Face enrollment and verification engine.
//!
//! Frames go through a two-pass pipeline (SCRFD localization on a downscaled
//! copy, then a jittered 128-d embedding at full resolution) and are matched
//! by Euclidean distance against one resident embedding per identity.

pub mod config;
pub mod detector;
pub mod matcher;
pub mod pipeline;
pub mod preview;
pub mod recognizer;
pub mod response;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{default_model_dir, Config, ConfigError};
pub use detector::ScrfdLocator;
pub use matcher::{DuplicateCheck, DuplicatePolicy, EuclideanMatcher, Matcher};
pub use pipeline::{
    Detection, DetectionPipeline, DetectionResult, FaceEmbedder, FaceLocator, ModelError,
    PipelineSettings, Rejection, RejectionKind,
};
pub use recognizer::OnnxEmbedder;
pub use response::{decode_frame, CommandResponse};
pub use service::{DuplicateOutcome, FaceAuthService, RegistrationOutcome, VerificationOutcome};
pub use store::{EmbeddingBackend, EmbeddingStore, IdentitySummary, MemoryBackend, StoreError};
pub use types::{BoundingBox, Embedding, FaceRegion, IdentityRecord, MatchResult};

/// Pipeline backed by the ONNX models shipped in the model directory.
pub type OnnxPipeline = DetectionPipeline<ScrfdLocator, OnnxEmbedder>;

/// Load both ONNX models named by `config` and build the detection pipeline.
pub fn load_pipeline(config: &Config) -> Result<OnnxPipeline, ModelError> {
    let locator = ScrfdLocator::load(&config.detector_model_path())?;
    tracing::info!(path = %config.detector_model_path(), "SCRFD detector loaded");

    let embedder = OnnxEmbedder::load(&config.embedder_model_path())?;
    tracing::info!(path = %config.embedder_model_path(), "face embedder loaded");

    Ok(DetectionPipeline::new(locator, embedder, config.pipeline_settings()))
}
