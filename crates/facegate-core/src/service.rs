//! Enrollment and verification on top of the detection pipeline, the matcher
//! and the resident embedding store.

use crate::matcher::{DuplicateCheck, DuplicatePolicy, EuclideanMatcher, Matcher};
use crate::pipeline::{Detection, DetectionPipeline, DetectionResult, FaceEmbedder, FaceLocator, Rejection};
use crate::store::{EmbeddingBackend, EmbeddingStore, StoreError};
use crate::types::{IdentityRecord, MatchResult};
use std::sync::Arc;
use std::time::Instant;

/// Result of the standalone duplicate check command.
#[derive(Debug)]
pub enum DuplicateOutcome {
    Rejected(Rejection),
    Checked { check: DuplicateCheck, detection: Detection },
    StoreFailed(StoreError),
}

#[derive(Debug)]
pub enum RegistrationOutcome {
    Registered { record: IdentityRecord, detection: Detection },
    /// The face already belongs to another account; nothing was written.
    Duplicate { matched_identity: String, distance: f32 },
    Rejected(Rejection),
    InvalidIdentity,
    StoreFailed(StoreError),
}

#[derive(Debug)]
pub enum VerificationOutcome {
    /// A comparison ran; `result.matched` tells whether it succeeded.
    Compared {
        claimed: Option<String>,
        result: MatchResult,
        detection: Detection,
    },
    NotRegistered { identity: String },
    NoRegisteredFaces,
    Rejected(Rejection),
    StoreFailed(StoreError),
}

/// Registration and verification flows for one set of face models.
pub struct FaceAuthService<L, E, B> {
    pipeline: DetectionPipeline<L, E>,
    store: Arc<EmbeddingStore<B>>,
    matcher: EuclideanMatcher,
    match_tolerance: f32,
    duplicates: DuplicatePolicy,
}

impl<L, E, B> FaceAuthService<L, E, B>
where
    L: FaceLocator,
    E: FaceEmbedder,
    B: EmbeddingBackend,
{
    pub fn new(
        pipeline: DetectionPipeline<L, E>,
        store: Arc<EmbeddingStore<B>>,
        match_tolerance: f32,
        duplicate_tolerance: f32,
    ) -> Self {
        Self {
            pipeline,
            store,
            matcher: EuclideanMatcher,
            match_tolerance,
            duplicates: DuplicatePolicy::new(duplicate_tolerance),
        }
    }

    pub fn store(&self) -> &Arc<EmbeddingStore<B>> {
        &self.store
    }

    pub fn detect(&mut self, frame: &[u8]) -> DetectionResult {
        self.pipeline.detect(frame)
    }

    /// Detect, then compare against every account except `excluding`.
    pub fn check_duplicate(&mut self, frame: &[u8], excluding: Option<&str>) -> DuplicateOutcome {
        let detection = match self.pipeline.detect(frame) {
            DetectionResult::Detected(d) => d,
            DetectionResult::Rejected(r) => return DuplicateOutcome::Rejected(r),
        };

        let enrolled = match self.store.snapshot() {
            Ok(records) => records,
            Err(err) => return DuplicateOutcome::StoreFailed(err),
        };

        let check = self.duplicates.check(&detection.embedding, &enrolled, excluding);
        if check.duplicate {
            tracing::warn!(
                matched = check.matched_identity.as_deref().unwrap_or_default(),
                distance = check.distance.unwrap_or_default(),
                "face already registered to another account"
            );
        }
        DuplicateOutcome::Checked { check, detection }
    }

    /// Enroll `identity` with the face in `frame`.
    ///
    /// The frame is detected once; the same embedding feeds the duplicate
    /// check and, on clearance, the store write. The registration guard spans
    /// the check and the write.
    pub fn register(&mut self, identity: &str, frame: &[u8]) -> RegistrationOutcome {
        self.register_until(identity, frame, None)
    }

    /// [`register`](Self::register) bounded by `deadline`. Once the deadline
    /// has passed nothing is written and the outcome is a timeout rejection;
    /// the check happens under the registration guard, right before the write.
    pub fn register_until(
        &mut self,
        identity: &str,
        frame: &[u8],
        deadline: Option<Instant>,
    ) -> RegistrationOutcome {
        if identity.trim().is_empty() {
            return RegistrationOutcome::InvalidIdentity;
        }

        let detection = match self.pipeline.detect(frame) {
            DetectionResult::Detected(d) => d,
            DetectionResult::Rejected(r) => return RegistrationOutcome::Rejected(r),
        };

        let _guard = match self.store.registration_guard() {
            Ok(guard) => guard,
            Err(err) => return RegistrationOutcome::StoreFailed(err),
        };

        let enrolled = match self.store.snapshot() {
            Ok(records) => records,
            Err(err) => return RegistrationOutcome::StoreFailed(err),
        };

        let check = self.duplicates.check(&detection.embedding, &enrolled, Some(identity));
        if let (true, Some(matched_identity)) = (check.duplicate, check.matched_identity) {
            let distance = check.distance.unwrap_or_default();
            tracing::warn!(
                identity,
                matched = %matched_identity,
                distance,
                "registration blocked: duplicate face"
            );
            return RegistrationOutcome::Duplicate { matched_identity, distance };
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(identity, "registration abandoned: deadline passed before write");
            return RegistrationOutcome::Rejected(Rejection::Timeout);
        }

        match self.store.upsert(identity, detection.embedding.clone()) {
            Ok(record) => {
                tracing::info!(identity, "face registered");
                RegistrationOutcome::Registered { record, detection }
            }
            Err(err) => {
                tracing::error!(identity, error = %err, "failed to persist face embedding");
                RegistrationOutcome::StoreFailed(err)
            }
        }
    }

    /// Verify the face in `frame` against `claimed`, or against every
    /// enrolled identity when no claim is made.
    pub fn verify(&mut self, frame: &[u8], claimed: Option<&str>) -> VerificationOutcome {
        let detection = match self.pipeline.detect(frame) {
            DetectionResult::Detected(d) => d,
            DetectionResult::Rejected(r) => return VerificationOutcome::Rejected(r),
        };

        let result = match claimed {
            Some(identity) => match self.store.get(identity) {
                Ok(Some(record)) => {
                    self.matcher
                        .compare_one(&detection.embedding, &record, self.match_tolerance)
                }
                Ok(None) => {
                    return VerificationOutcome::NotRegistered {
                        identity: identity.to_string(),
                    }
                }
                Err(err) => return VerificationOutcome::StoreFailed(err),
            },
            None => {
                let enrolled = match self.store.snapshot() {
                    Ok(records) => records,
                    Err(err) => return VerificationOutcome::StoreFailed(err),
                };
                match self
                    .matcher
                    .compare(&detection.embedding, &enrolled, self.match_tolerance)
                {
                    Some(result) => result,
                    None => return VerificationOutcome::NoRegisteredFaces,
                }
            }
        };

        tracing::info!(
            claimed,
            matched = result.matched,
            distance = result.distance,
            "verification compared"
        );

        VerificationOutcome::Compared {
            claimed: claimed.map(str::to_string),
            result,
            detection,
        }
    }
}
