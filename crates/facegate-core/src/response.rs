//! JSON reply documents shared by the CLI and the daemon.
//!
//! Every command answers with one flat object: `success` and `message` are
//! always present, everything else only when it applies.

use crate::pipeline::{Detection, DetectionResult, Rejection};
use crate::service::{DuplicateOutcome, RegistrationOutcome, VerificationOutcome};
use crate::store::StoreError;
use crate::types::FaceRegion;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Vec<f32>>,
    /// Base64 JPEG preview with the face outlined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_location: Option<FaceRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl CommandResponse {
    pub fn failure(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            reason: Some(reason),
            ..Default::default()
        }
    }

    pub fn rejected(rejection: &Rejection) -> Self {
        let mut response = Self::failure(rejection.code(), rejection.to_string());
        if matches!(
            rejection,
            Rejection::NoFace | Rejection::MultipleFaces { .. } | Rejection::FaceTooFar { .. }
        ) {
            response.face_detected = Some(!matches!(rejection, Rejection::NoFace));
        }
        response
    }

    fn store_failed(err: &StoreError) -> Self {
        Self::failure("store_error", format!("Face storage failed: {err}"))
    }

    /// Attach the detection details every successful face analysis carries.
    fn with_detection(mut self, detection: &Detection) -> Self {
        self.face_detected = Some(true);
        self.face_location = Some(detection.region);
        self.detection_ms = Some(round_ms(detection.elapsed.as_secs_f64() * 1000.0));
        self.frame = detection.preview.as_deref().map(|jpeg| BASE64.encode(jpeg));
        self
    }

    fn with_encoding(mut self, detection: &Detection) -> Self {
        self.encoding = Some(detection.embedding.values.clone());
        self
    }

    fn with_matched(mut self, identity: String) -> Self {
        self.matched_identity = Some(identity);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            format!(r#"{{"success":false,"message":"response encoding failed: {err}"}}"#)
        })
    }
}

/// Decode a base64 frame as delivered by callers. Surrounding whitespace and
/// a `data:<mime>;base64,` prefix are accepted; empty input decodes to an
/// empty frame so the pipeline reports it.
pub fn decode_frame(text: &str) -> Result<Vec<u8>, Rejection> {
    let text = text.trim();
    let payload = match text.strip_prefix("data:") {
        Some(uri) => uri.split_once(";base64,").map(|(_, data)| data).unwrap_or(uri),
        None => text,
    };
    BASE64
        .decode(payload)
        .map_err(|err| Rejection::UndecodableFrame(format!("invalid base64: {err}")))
}

/// Milliseconds rounded to one decimal place.
fn round_ms(ms: f64) -> f64 {
    (ms * 10.0).round() / 10.0
}

impl From<DetectionResult> for CommandResponse {
    fn from(result: DetectionResult) -> Self {
        match result {
            DetectionResult::Rejected(r) => Self::rejected(&r),
            DetectionResult::Detected(d) => Self {
                success: true,
                message: "Face detected".into(),
                ..Default::default()
            }
            .with_detection(&d)
            .with_encoding(&d),
        }
    }
}

impl From<DuplicateOutcome> for CommandResponse {
    fn from(outcome: DuplicateOutcome) -> Self {
        match outcome {
            DuplicateOutcome::Rejected(r) => Self::rejected(&r),
            DuplicateOutcome::StoreFailed(err) => Self::store_failed(&err),
            DuplicateOutcome::Checked { check, detection } => {
                let message = match &check.matched_identity {
                    Some(identity) if check.duplicate => format!(
                        "This face is already registered to account '{identity}'. Cannot register duplicate."
                    ),
                    _ => "No duplicate found. Face is unique.".to_string(),
                };
                let response = Self {
                    success: true,
                    message,
                    duplicate: Some(check.duplicate),
                    distance: check.distance,
                    matched_identity: check.matched_identity.filter(|_| check.duplicate),
                    ..Default::default()
                }
                .with_detection(&detection);
                // A unique face may go straight to registration.
                if check.duplicate {
                    response
                } else {
                    response.with_encoding(&detection)
                }
            }
        }
    }
}

impl From<RegistrationOutcome> for CommandResponse {
    fn from(outcome: RegistrationOutcome) -> Self {
        match outcome {
            RegistrationOutcome::Rejected(r) => Self::rejected(&r),
            RegistrationOutcome::StoreFailed(err) => Self::store_failed(&err),
            RegistrationOutcome::InvalidIdentity => {
                Self::failure("invalid_identity", "Identity must not be empty")
            }
            RegistrationOutcome::Duplicate { matched_identity, distance } => Self {
                duplicate: Some(true),
                distance: Some(distance),
                ..Self::failure(
                    "duplicate_face",
                    format!(
                        "This face is already registered to account '{matched_identity}'. Cannot register duplicate."
                    ),
                )
            }
            .with_matched(matched_identity),
            RegistrationOutcome::Registered { record, detection } => Self {
                success: true,
                message: format!("Face registered successfully for {}", record.identity),
                identity: Some(record.identity),
                duplicate: Some(false),
                ..Default::default()
            }
            .with_detection(&detection)
            .with_encoding(&detection),
        }
    }
}

impl From<VerificationOutcome> for CommandResponse {
    fn from(outcome: VerificationOutcome) -> Self {
        match outcome {
            VerificationOutcome::Rejected(r) => Self::rejected(&r),
            VerificationOutcome::StoreFailed(err) => Self::store_failed(&err),
            VerificationOutcome::NotRegistered { identity } => Self {
                verified: Some(false),
                ..Self::failure(
                    "not_registered",
                    format!("No registered face found for {identity}"),
                )
            },
            VerificationOutcome::NoRegisteredFaces => Self {
                verified: Some(false),
                ..Self::failure("no_registered_faces", "No registered faces found")
            },
            VerificationOutcome::Compared { claimed, result, detection } => {
                let message = match (&claimed, &result.identity, result.matched) {
                    (Some(_), _, true) => "Face verified".to_string(),
                    (Some(_), _, false) => "Face does not match".to_string(),
                    (None, Some(identity), true) => format!("Face verified as {identity}"),
                    (None, _, _) => "Face not recognized".to_string(),
                };
                Self {
                    success: true,
                    message,
                    verified: Some(result.matched),
                    identity: result.identity.or(claimed),
                    distance: Some(result.distance),
                    confidence: Some(result.confidence),
                    ..Default::default()
                }
                .with_detection(&detection)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::DuplicateCheck;
    use crate::testing::synthetic_embedding;
    use crate::types::MatchResult;
    use std::time::Duration;

    fn detection() -> Detection {
        Detection {
            region: FaceRegion { top: 80, right: 220, bottom: 220, left: 100 },
            embedding: synthetic_embedding(0.25),
            elapsed: Duration::from_micros(12_345),
            preview: Some(vec![0xff, 0xd8, 0xff]),
        }
    }

    #[test]
    fn test_detected_response_fields() {
        let response = CommandResponse::from(DetectionResult::Detected(detection()));
        assert!(response.success);
        assert_eq!(response.face_detected, Some(true));
        assert_eq!(response.detection_ms, Some(12.3));
        assert_eq!(response.frame.as_deref(), Some("/9j/"));
        assert_eq!(response.encoding.as_ref().map(Vec::len), Some(128));

        let json: serde_json::Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(json["face_location"]["left"], 100);
        assert!(json.get("verified").is_none());
    }

    #[test]
    fn test_decode_frame() {
        assert_eq!(decode_frame(" /9j/\n").unwrap(), vec![0xff, 0xd8, 0xff]);
        assert_eq!(decode_frame("data:image/jpeg;base64,/9j/").unwrap(), vec![0xff, 0xd8, 0xff]);
        assert!(decode_frame("").unwrap().is_empty());
        assert!(matches!(
            decode_frame("!!!not base64!!!"),
            Err(Rejection::UndecodableFrame(_))
        ));
    }

    #[test]
    fn test_rejection_response() {
        let response = CommandResponse::rejected(&Rejection::MultipleFaces { count: 2 });
        assert!(!response.success);
        assert_eq!(response.reason, Some("multiple_faces"));
        assert_eq!(response.face_detected, Some(true));
        assert_eq!(
            response.message,
            "Multiple faces detected. Please ensure only one person is in frame."
        );

        let response = CommandResponse::rejected(&Rejection::NoFace);
        assert_eq!(response.face_detected, Some(false));

        let response = CommandResponse::rejected(&Rejection::EmptyFrame);
        assert_eq!(response.face_detected, None);
    }

    #[test]
    fn test_duplicate_registration_response() {
        let response = CommandResponse::from(RegistrationOutcome::Duplicate {
            matched_identity: "alice".into(),
            distance: 0.3,
        });
        assert!(!response.success);
        assert_eq!(response.reason, Some("duplicate_face"));
        assert_eq!(response.duplicate, Some(true));
        assert_eq!(response.matched_identity.as_deref(), Some("alice"));
        assert!(response.message.contains("'alice'"));
        assert!(response.encoding.is_none());
    }

    #[test]
    fn test_no_registered_faces_response() {
        let response = CommandResponse::from(VerificationOutcome::NoRegisteredFaces);
        assert!(!response.success);
        assert_eq!(response.message, "No registered faces found");
        assert_eq!(response.verified, Some(false));
    }

    #[test]
    fn test_verified_response() {
        let response = CommandResponse::from(VerificationOutcome::Compared {
            claimed: Some("alice".into()),
            result: MatchResult {
                matched: true,
                distance: 0.3,
                confidence: 0.7,
                identity: Some("alice".into()),
            },
            detection: detection(),
        });
        assert!(response.success);
        assert_eq!(response.verified, Some(true));
        assert_eq!(response.confidence, Some(0.7));
        assert_eq!(response.identity.as_deref(), Some("alice"));
        assert!(response.encoding.is_none());
    }

    #[test]
    fn test_failed_unclaimed_match_names_nobody() {
        let response = CommandResponse::from(VerificationOutcome::Compared {
            claimed: None,
            result: MatchResult { matched: false, distance: 0.8, confidence: 0.2, identity: None },
            detection: detection(),
        });
        assert!(response.success);
        assert_eq!(response.verified, Some(false));
        assert_eq!(response.message, "Face not recognized");
        assert!(response.identity.is_none());
    }

    #[test]
    fn test_unique_face_carries_encoding() {
        let response = CommandResponse::from(DuplicateOutcome::Checked {
            check: DuplicateCheck { duplicate: false, matched_identity: None, distance: Some(0.9) },
            detection: detection(),
        });
        assert_eq!(response.duplicate, Some(false));
        assert!(response.encoding.is_some());
        assert!(response.matched_identity.is_none());
    }
}
