//! JSON wire types shared by `lineupd` and the `lineup` CLI.
//!
//! Image payloads travel as standard base64 in a `data` field.

use crate::types::{Classification, DetectionMode, Identity, SamplePolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizeRequest {
    pub data: String,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<DetectionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizeOutcome {
    Faces,
    /// Detection found nothing. Distinct from an unknown identity.
    NoFace,
}

/// One classified face. `identity` is `None` for an unknown person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    pub identity: Option<Identity>,
    pub distance: Option<f32>,
}

impl From<&Classification> for FaceResult {
    fn from(c: &Classification) -> Self {
        Self {
            identity: c.identity(),
            distance: c.distance().filter(|d| d.is_finite()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizeResponse {
    pub outcome: RecognizeOutcome,
    pub gallery_version: u64,
    pub results: Vec<FaceResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSampleRequest {
    pub id: Identity,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSampleResponse {
    pub id: Identity,
    pub path: String,
}

/// What happened to one training sample during a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleStatus {
    Trained,
    NoFace,
    Skipped { reason: String },
    /// Not embedded because the identity already had a descriptor.
    Unused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleReport {
    pub identity: Identity,
    pub path: String,
    #[serde(flatten)]
    pub status: SampleStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    pub gallery_version: u64,
    pub entries: usize,
    pub samples: Vec<SampleReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub gallery_version: u64,
    pub gallery_entries: usize,
    pub identities: usize,
    pub detection_mode: DetectionMode,
    pub training_mode: DetectionMode,
    pub match_threshold: f32,
    pub sample_policy: SamplePolicy,
    pub rebuild_in_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadInput,
    EngineFailure,
    EngineUnavailable,
    Storage,
    RebuildInProgress,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

/// Error body. `results` is always present, and empty, so clients that only
/// read results keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub results: Vec<FaceResult>,
    pub error: ErrorDetail,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_recognize_request_defaults() {
        let req: RecognizeRequest = serde_json::from_value(json!({ "data": "AAAA" })).unwrap();
        assert!(!req.multiple);
        assert!(req.mode.is_none());
        assert!(req.threshold.is_none());
    }

    #[test]
    fn test_recognize_request_overrides() {
        let req: RecognizeRequest = serde_json::from_value(json!({
            "data": "AAAA", "multiple": true, "mode": "accurate", "threshold": 0.8
        }))
        .unwrap();
        assert!(req.multiple);
        assert_eq!(req.mode, Some(DetectionMode::Accurate));
        assert_eq!(req.threshold, Some(0.8));
    }

    #[test]
    fn test_recognize_request_accepts_mode_aliases() {
        let req: RecognizeRequest =
            serde_json::from_value(json!({ "data": "AAAA", "mode": "cnn" })).unwrap();
        assert_eq!(req.mode, Some(DetectionMode::Accurate));
        let req: RecognizeRequest =
            serde_json::from_value(json!({ "data": "AAAA", "mode": "hog" })).unwrap();
        assert_eq!(req.mode, Some(DetectionMode::Fast));
    }

    #[test]
    fn test_face_result_from_unknown() {
        let r = FaceResult::from(&Classification::Unknown { nearest: Some(1.5) });
        assert_eq!(r.identity, None);
        assert_eq!(r.distance, Some(1.5));

        let r = FaceResult::from(&Classification::Unknown { nearest: Some(f32::INFINITY) });
        assert_eq!(r.distance, None);
    }

    #[test]
    fn test_sample_report_shape() {
        let report = SampleReport {
            identity: Identity::new(3),
            path: "data/training/3/a.jpg".into(),
            status: SampleStatus::Skipped { reason: "bad".into() },
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            json!({ "identity": 3, "path": "data/training/3/a.jpg", "status": "skipped", "reason": "bad" })
        );
        let back: SampleReport = serde_json::from_value(value).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_no_face_outcome_name() {
        let value = serde_json::to_value(RecognizeOutcome::NoFace).unwrap();
        assert_eq!(value, json!("no_face"));
    }
}
