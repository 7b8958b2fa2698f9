use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::config::ApiConfig;
use crate::record::{AnalysisStats, AnalysisSummary, NewAnalysis, Verdict};
use crate::store::AnalysisStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AnalysisStore>,
    pub classifier: Arc<dyn Classifier>,
    pub uploads_dir: PathBuf,
    pub max_page_size: i64,
}

/// Response for a completed analysis
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub id: i64,
    pub verdict: Verdict,
    pub confidence: f64,
    pub processing_time_ms: i64,
}

/// Query parameters for the history listing
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Error response. Messages are generic on purpose; internal error detail
/// stays in the logs.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_response(status: StatusCode, message: &str, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/analyze", post(analyze))
        .route("/api/history", get(history))
        .route("/api/stats", get(statistics))
        .route("/api/image/:id", get(get_image))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "analysis-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "store": "disconnected"
                })),
            )
        }
    }
}

/// Accept an upload, run the classifier over it, persist the verdict with
/// the image bytes, and report the outcome.
#[instrument(skip(state, multipart))]
async fn analyze(
    State(state): State<AppState>,
    addr: Option<ConnectInfo<SocketAddr>>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!(error = %e, "Rejected malformed multipart request");
        error_response(StatusCode::BAD_REQUEST, "Invalid upload", "BAD_MULTIPART")
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await.map_err(|e| {
            warn!(error = %e, "Failed to read upload body");
            error_response(StatusCode::BAD_REQUEST, "Invalid upload", "BAD_MULTIPART")
        })?;

        upload = Some((original_name, content_type, data.to_vec()));
        break;
    }

    let Some((original_name, content_type, data)) = upload else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "No file uploaded",
            "MISSING_FILE",
        ));
    };

    // Stage the upload on disk under an internal name; the classifier works
    // from a path, not from memory.
    let stored_name = staged_file_name(&original_name);
    let staged_path = state.uploads_dir.join(&stored_name);

    tokio::fs::write(&staged_path, &data).await.map_err(|e| {
        error!(error = %e, path = %staged_path.display(), "Failed to stage upload");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Analysis failed",
            "ANALYSIS_ERROR",
        )
    })?;

    let started = Instant::now();
    let classification = match state.classifier.classify(&staged_path).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Classifier invocation failed");
            remove_staged(&staged_path).await;
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Analysis failed",
                "ANALYSIS_ERROR",
            ));
        }
    };
    let processing_time_ms = started.elapsed().as_millis() as i64;

    let verdict = match Verdict::from_label(&classification.label) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "Classifier produced an unusable label");
            remove_staged(&staged_path).await;
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Analysis failed",
                "ANALYSIS_ERROR",
            ));
        }
    };

    // Read the staged file back so the persisted bytes are exactly what the
    // classifier saw.
    let image_bytes = match tokio::fs::read(&staged_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, path = %staged_path.display(), "Failed to read staged upload");
            remove_staged(&staged_path).await;
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Analysis failed",
                "ANALYSIS_ERROR",
            ));
        }
    };

    let draft = NewAnalysis {
        stored_name,
        original_name,
        content_type,
        image_bytes,
        verdict,
        confidence: classification.confidence,
        processing_time_ms,
        source_address: addr.map(|ConnectInfo(a)| a.ip().to_string()),
    };

    let id = match state.store.save(draft).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Failed to persist analysis");
            remove_staged(&staged_path).await;
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Analysis failed",
                "PERSIST_ERROR",
            ));
        }
    };

    remove_staged(&staged_path).await;

    metrics::counter!("analysis.api.analyzed").increment(1);
    metrics::histogram!("analysis.api.classify_duration_ms").record(processing_time_ms as f64);

    Ok(Json(AnalyzeResponse {
        id,
        verdict,
        confidence: classification.confidence,
        processing_time_ms,
    }))
}

/// Paginated analysis history, newest first, without image payloads
#[instrument(skip(state))]
async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<AnalysisSummary>>, (StatusCode, Json<ErrorResponse>)> {
    let limit = params.limit.clamp(1, state.max_page_size);
    let offset = params.offset.max(0);

    let summaries = state.store.list_recent(limit, offset).await.map_err(|e| {
        error!(error = %e, "Failed to query history");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch history",
            "QUERY_ERROR",
        )
    })?;

    Ok(Json(summaries))
}

/// Aggregate statistics over all analyses
#[instrument(skip(state))]
async fn statistics(
    State(state): State<AppState>,
) -> Result<Json<AnalysisStats>, (StatusCode, Json<ErrorResponse>)> {
    let stats = state.store.statistics().await.map_err(|e| {
        error!(error = %e, "Failed to compute statistics");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch stats",
            "QUERY_ERROR",
        )
    })?;

    Ok(Json(stats))
}

/// Raw image bytes for a single analysis
#[instrument(skip(state))]
async fn get_image(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_image(id).await {
        Ok(Some(blob)) => (
            [
                (header::CONTENT_TYPE, blob.content_type),
                (
                    header::CACHE_CONTROL,
                    "public, max-age=31536000".to_string(),
                ),
            ],
            blob.bytes,
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Image not found", "NOT_FOUND")
            .into_response(),
        Err(e) => {
            error!(error = %e, id, "Failed to fetch image");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch image",
                "QUERY_ERROR",
            )
            .into_response()
        }
    }
}

/// Internal name for a staged upload: a UUID keeping the original extension.
fn staged_file_name(original_name: &str) -> String {
    let extension = FsPath::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    format!("{}{extension}", Uuid::new_v4())
}

async fn remove_staged(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(error = %e, path = %path.display(), "Failed to remove staged upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, ClassifierError, MockClassifier};
    use crate::store::MemoryAnalysisStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(classifier: Arc<dyn Classifier>) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            store: Arc::new(MemoryAnalysisStore::new()),
            classifier,
            uploads_dir: dir.path().to_path_buf(),
            max_page_size: 500,
        };
        (state, dir)
    }

    fn real_classifier(confidence: f64) -> Arc<dyn Classifier> {
        let mut mock = MockClassifier::new();
        mock.expect_classify().returning(move |_| {
            Ok(Classification {
                label: "Real".to_string(),
                confidence,
            })
        });
        Arc::new(mock)
    }

    fn multipart_request(filename: &str, content_type: &str, payload: &[u8]) -> Request<Body> {
        let boundary = "test-boundary-7MA4YWxkTrZu0gW";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_persists_and_serves_the_image_back() {
        let (state, dir) = test_state(real_classifier(0.92));
        let app = create_router(state, &ApiConfig::default());

        let payload: Vec<u8> = (0..=255).cycle().take(4096).map(|b: u16| b as u8).collect();
        let response = app
            .clone()
            .oneshot(multipart_request("cat.png", "image/png", &payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["verdict"], "Real");
        assert!((body["confidence"].as_f64().unwrap() - 0.92).abs() < 1e-9);
        let id = body["id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/image/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), payload.as_slice());

        // The staged copy must be gone once the record owns the bytes.
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_analyze_without_file_field_is_rejected() {
        let (state, _dir) = test_state(real_classifier(0.9));
        let app = create_router(state, &ApiConfig::default());

        let boundary = "test-boundary-7MA4YWxkTrZu0gW";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"comment\"\r\n\r\nhello\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/analyze")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "MISSING_FILE");
    }

    #[tokio::test]
    async fn test_classifier_failure_persists_nothing_and_cleans_up() {
        let mut mock = MockClassifier::new();
        mock.expect_classify()
            .returning(|_| Err(ClassifierError::Failed("model exploded".to_string())));
        let (state, dir) = test_state(Arc::new(mock));
        let store = state.store.clone();
        let app = create_router(state, &ApiConfig::default());

        let response = app
            .oneshot(multipart_request("cat.png", "image/png", b"pixels"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(response).await;
        assert_eq!(body["error"], "Analysis failed");
        assert!(!body.to_string().contains("model exploded"));

        assert_eq!(store.statistics().await.unwrap().total_analyses, 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_unusable_label_is_a_generic_failure_without_a_record() {
        let mut mock = MockClassifier::new();
        mock.expect_classify().returning(|_| {
            Ok(Classification {
                label: "Banana".to_string(),
                confidence: 0.9,
            })
        });
        let (state, dir) = test_state(Arc::new(mock));
        let store = state.store.clone();
        let app = create_router(state, &ApiConfig::default());

        let response = app
            .oneshot(multipart_request("cat.png", "image/png", b"pixels"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(response).await;
        assert!(!body.to_string().contains("Banana"));

        assert_eq!(store.statistics().await.unwrap().total_analyses, 0);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_history_and_stats_reflect_saved_analyses() {
        let (state, _dir) = test_state(real_classifier(0.9));
        let store = state.store.clone();
        let app = create_router(state, &ApiConfig::default());

        for (name, verdict, confidence) in [
            ("a", Verdict::Real, 0.92),
            ("b", Verdict::Fake, 0.77),
            ("c", Verdict::Real, 0.60),
        ] {
            store
                .save(NewAnalysis {
                    stored_name: format!("{name}.png"),
                    original_name: format!("{name}-orig.png"),
                    content_type: "image/png".to_string(),
                    image_bytes: name.as_bytes().to_vec(),
                    verdict,
                    confidence,
                    processing_time_ms: 100,
                    source_address: None,
                })
                .await
                .unwrap();
        }

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/history?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["stored_name"], "c.png");
        assert_eq!(items[1]["stored_name"], "b.png");
        assert!(items[0]["image_url"].as_str().unwrap().starts_with("/api/image/"));
        assert!(items[0].get("image_bytes").is_none());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let stats = json_body(response).await;
        assert_eq!(stats["total_analyses"], 3);
        assert_eq!(stats["real_count"], 2);
        assert_eq!(stats["fake_count"], 1);
        assert!((stats["avg_confidence"].as_f64().unwrap() - 0.7633).abs() < 0.0001);
    }

    #[tokio::test]
    async fn test_image_lookup_for_unknown_id_is_404() {
        let (state, _dir) = test_state(real_classifier(0.9));
        let app = create_router(state, &ApiConfig::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/image/424242")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let (state, _dir) = test_state(real_classifier(0.9));
        let app = create_router(state, &ApiConfig::default());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_staged_file_name_keeps_extension_only() {
        let name = staged_file_name("holiday photo.JPG");
        assert!(name.ends_with(".JPG"));
        assert!(!name.contains("holiday"));

        let bare = staged_file_name("noextension");
        assert!(!bare.contains('.'));
    }
}
