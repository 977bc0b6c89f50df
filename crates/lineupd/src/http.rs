//! HTTP/JSON surface of the service.
//!
//! Routes: `POST /recognize`, `POST /add`, `POST /train`, `GET /status`.

use crate::adapter::RecognitionAdapter;
use crate::config::Config;
use crate::gallery::{ActiveGallery, GalleryBuilder, RebuildError};
use crate::orchestrator::{
    Orchestrator, Recognition, RecognitionDefaults, RecognizeError, RecognizeOptions,
};
use crate::store::{SampleStore, StoreError};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use lineup_core::api::{
    AddSampleRequest, AddSampleResponse, ErrorDetail, ErrorKind, ErrorResponse, FaceResult,
    RecognizeOutcome, RecognizeRequest, RecognizeResponse, StatusResponse, TrainResponse,
};
use lineup_core::{DetectionMode, SamplePolicy};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::{self, TraceLayer};
use tracing::Level;

/// Everything the handlers share.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub builder: GalleryBuilder,
    pub store: SampleStore,
    pub active: Arc<ActiveGallery>,
    pub training_mode: DetectionMode,
    pub sample_policy: SamplePolicy,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: &Config, store: SampleStore, adapter: RecognitionAdapter) -> SharedState {
        let active = Arc::new(ActiveGallery::new());
        let orchestrator = Orchestrator::new(
            adapter.clone(),
            Arc::clone(&active),
            RecognitionDefaults {
                mode: config.detection_mode,
                threshold: config.match_threshold,
                timeout: config.request_timeout(),
            },
        );
        let builder = GalleryBuilder::new(
            store.clone(),
            adapter,
            Arc::clone(&active),
            config.training_mode,
            config.sample_policy,
        );
        Arc::new(Self {
            orchestrator,
            builder,
            store,
            active,
            training_mode: config.training_mode,
            sample_policy: config.sample_policy,
        })
    }
}

pub fn router(state: SharedState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/recognize", post(recognize))
        .route("/add", post(add_sample))
        .route("/train", post(train))
        .route("/status", get(status))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    Rejected(#[from] JsonRejection),
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Recognize(#[from] RecognizeError),
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, ErrorKind) {
        match self {
            Self::Rejected(r) => (r.status(), ErrorKind::BadInput),
            Self::Base64(_) => (StatusCode::BAD_REQUEST, ErrorKind::BadInput),
            Self::Recognize(e) => match e {
                RecognizeError::BadInput(_) => (StatusCode::BAD_REQUEST, ErrorKind::BadInput),
                RecognizeError::Engine(_) => (StatusCode::BAD_GATEWAY, ErrorKind::EngineFailure),
                RecognizeError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, ErrorKind::Timeout),
                RecognizeError::Unavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, ErrorKind::EngineUnavailable)
                }
            },
            Self::Rebuild(e) => match e {
                RebuildError::InProgress => (StatusCode::CONFLICT, ErrorKind::RebuildInProgress),
                RebuildError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Storage),
                RebuildError::EngineUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, ErrorKind::EngineUnavailable)
                }
            },
            Self::Store(e) if e.is_input_error() => (StatusCode::BAD_REQUEST, ErrorKind::BadInput),
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Storage),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            tracing::error!(error = %self, ?kind, "request failed");
        } else {
            tracing::warn!(error = %self, ?kind, "request rejected");
        }
        let body = ErrorResponse {
            results: Vec::new(),
            error: ErrorDetail {
                kind,
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

fn decode_payload(data: &str) -> Result<Vec<u8>, ApiError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data.trim())?)
}

async fn recognize(
    State(state): State<SharedState>,
    payload: Result<Json<RecognizeRequest>, JsonRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let Json(req) = payload?;
    let image = decode_payload(&req.data)?;
    let options = RecognizeOptions {
        multiple: req.multiple,
        mode: req.mode,
        threshold: req.threshold,
    };

    let response = match state.orchestrator.recognize(image, options).await? {
        Recognition::NoFace { gallery_version } => RecognizeResponse {
            outcome: RecognizeOutcome::NoFace,
            gallery_version,
            results: Vec::new(),
        },
        Recognition::Faces {
            gallery_version,
            matches,
        } => RecognizeResponse {
            outcome: RecognizeOutcome::Faces,
            gallery_version,
            results: matches.iter().map(FaceResult::from).collect(),
        },
    };
    Ok(Json(response))
}

async fn add_sample(
    State(state): State<SharedState>,
    payload: Result<Json<AddSampleRequest>, JsonRejection>,
) -> Result<Json<AddSampleResponse>, ApiError> {
    let Json(req) = payload?;
    let image = decode_payload(&req.data)?;
    let path = state.store.add_sample(req.id, &image).await?;
    Ok(Json(AddSampleResponse {
        id: req.id,
        path: path.display().to_string(),
    }))
}

async fn train(State(state): State<SharedState>) -> Result<Json<TrainResponse>, ApiError> {
    let report = state.builder.rebuild().await?;
    Ok(Json(report.to_response()))
}

async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let gallery = state.active.snapshot().await;
    let defaults = state.orchestrator.defaults();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        gallery_version: gallery.version(),
        gallery_entries: gallery.len(),
        identities: gallery.identity_count(),
        detection_mode: defaults.mode,
        training_mode: state.training_mode,
        match_threshold: defaults.threshold,
        sample_policy: state.sample_policy,
        rebuild_in_progress: state.builder.is_rebuilding(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::spawn_engine;
    use crate::testing::{png, FakeEngine};
    use lineup_core::api::SampleStatus;
    use lineup_core::Identity;

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    async fn state(dir: &tempfile::TempDir, policy: SamplePolicy) -> SharedState {
        let config = Config {
            training_dir: dir.path().to_path_buf(),
            sample_policy: policy,
            match_threshold: 0.05,
            ..Config::default()
        };
        let store = SampleStore::open(&config.training_dir).await.unwrap();
        let adapter = spawn_engine(FakeEngine::default(), 4).unwrap();
        AppState::new(&config, store, adapter)
    }

    async fn add(state: &SharedState, id: u32, image: &[u8]) -> AddSampleResponse {
        let req = AddSampleRequest {
            id: Identity::new(id),
            data: b64(image),
        };
        add_sample(State(Arc::clone(state)), Ok(Json(req)))
            .await
            .unwrap()
            .0
    }

    async fn recognize_with(
        state: &SharedState,
        image: &[u8],
        multiple: bool,
        threshold: Option<f32>,
    ) -> Result<RecognizeResponse, ApiError> {
        let req = RecognizeRequest {
            data: b64(image),
            multiple,
            mode: Some(DetectionMode::Accurate),
            threshold,
        };
        recognize(State(Arc::clone(state)), Ok(Json(req)))
            .await
            .map(|Json(r)| r)
    }

    async fn error_body(err: ApiError) -> (StatusCode, ErrorResponse) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_add_train_recognize_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, SamplePolicy::All).await;
        let image = png(&[140]);

        let added = add(&state, 7, &image).await;
        assert_eq!(added.id, Identity::new(7));
        assert!(added.path.contains(&format!("{}7{}", std::path::MAIN_SEPARATOR, std::path::MAIN_SEPARATOR)));

        let Json(trained) = train(State(Arc::clone(&state))).await.unwrap();
        assert_eq!(trained.entries, 1);
        assert_eq!(trained.samples[0].status, SampleStatus::Trained);

        let response = recognize_with(&state, &image, false, Some(10.0)).await.unwrap();
        assert_eq!(response.outcome, RecognizeOutcome::Faces);
        assert_eq!(response.gallery_version, trained.gallery_version);
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].identity, Some(Identity::new(7)));
    }

    #[tokio::test]
    async fn test_first_and_all_policies_through_service() {
        for (policy, expected) in [(SamplePolicy::First, 2), (SamplePolicy::All, 3)] {
            let dir = tempfile::tempdir().unwrap();
            let state = state(&dir, policy).await;
            add(&state, 1, &png(&[60])).await;
            add(&state, 1, &png(&[70])).await;
            add(&state, 2, &png(&[200])).await;

            let Json(trained) = train(State(Arc::clone(&state))).await.unwrap();
            assert_eq!(trained.entries, expected, "policy {policy}");
        }
    }

    #[tokio::test]
    async fn test_all_black_image_is_no_face() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, SamplePolicy::All).await;

        let response = recognize_with(&state, &png(&[]), false, None).await.unwrap();
        assert_eq!(response.outcome, RecognizeOutcome::NoFace);
        assert!(response.results.is_empty());

        let response = recognize_with(&state, &png(&[]), true, None).await.unwrap();
        assert_eq!(response.outcome, RecognizeOutcome::Faces);
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_faces_each_classified() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, SamplePolicy::All).await;
        add(&state, 1, &png(&[30])).await;
        add(&state, 2, &png(&[90])).await;
        train(State(Arc::clone(&state))).await.unwrap();

        let response = recognize_with(&state, &png(&[90, 30, 250]), true, None)
            .await
            .unwrap();
        let ids: Vec<Option<Identity>> = response.results.iter().map(|r| r.identity).collect();
        assert_eq!(
            ids,
            vec![Some(Identity::new(1)), Some(Identity::new(2)), None]
        );
    }

    #[tokio::test]
    async fn test_bad_base64_is_bad_input_with_empty_results() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, SamplePolicy::All).await;
        let req = RecognizeRequest {
            data: "***".into(),
            multiple: false,
            mode: None,
            threshold: None,
        };
        let err = recognize(State(Arc::clone(&state)), Ok(Json(req)))
            .await
            .unwrap_err();

        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.kind, ErrorKind::BadInput);
        assert!(body.results.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_image_is_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, SamplePolicy::All).await;
        let err = recognize_with(&state, b"not an image", false, None)
            .await
            .unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.kind, ErrorKind::BadInput);
    }

    #[tokio::test]
    async fn test_engine_failure_is_reported_distinctly() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, SamplePolicy::All).await;
        let err = recognize_with(&state, &crate::testing::broken_png(), false, None)
            .await
            .unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error.kind, ErrorKind::EngineFailure);
    }

    #[tokio::test]
    async fn test_add_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, SamplePolicy::All).await;
        let req = AddSampleRequest {
            id: Identity::new(3),
            data: b64(b"plain text"),
        };
        let err = add_sample(State(Arc::clone(&state)), Ok(Json(req)))
            .await
            .unwrap_err();
        let (status, _) = error_body(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_reflects_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, SamplePolicy::First).await;
        add(&state, 4, &png(&[44])).await;
        train(State(Arc::clone(&state))).await.unwrap();

        let Json(s) = status(State(Arc::clone(&state))).await;
        assert_eq!(s.gallery_version, 1);
        assert_eq!(s.gallery_entries, 1);
        assert_eq!(s.identities, 1);
        assert_eq!(s.sample_policy, SamplePolicy::First);
        assert!(!s.rebuild_in_progress);
    }
}
