//! JSON HTTP API over the resolution engine.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/api/mark_attendance` | Body: `{identity_id, display_name, image, confidence}` |
//! | `GET`  | `/api/attendance_list` | Most recent records, newest first |
//! | `GET`  | `/api/status` | Version, enrolled count, matcher settings |
//!
//! Any other route answers 404 with a JSON body.

use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rollcall_core::{
    AttendanceAttempt, AttendanceStore, Embedder, Outcome, ResolutionEngine, ValidationError,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::error::ApiError;

/// Request size limits for the API.
#[derive(Debug, Clone, Copy)]
pub struct ApiLimits {
    pub max_image_bytes: usize,
    pub recent_limit: usize,
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_image_bytes: 8 * 1024 * 1024,
            recent_limit: 10,
        }
    }
}

/// Shared state threaded through all handlers.
pub struct AppState<S, E> {
    pub engine: Arc<ResolutionEngine<S, E>>,
    pub limits: ApiLimits,
}

impl<S, E> AppState<S, E> {
    pub fn new(engine: ResolutionEngine<S, E>, limits: ApiLimits) -> Self {
        Self {
            engine: Arc::new(engine),
            limits,
        }
    }
}

impl<S, E> Clone for AppState<S, E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            limits: self.limits,
        }
    }
}

/// Build the API router.
pub fn router<S, E>(state: AppState<S, E>) -> Router
where
    S: AttendanceStore + 'static,
    E: Embedder + 'static,
{
    // base64 inflates by 4/3; leave room for the other fields.
    let body_limit = state.limits.max_image_bytes / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/api/mark_attendance", post(mark_attendance::<S, E>))
        .route("/api/attendance_list", get(attendance_list::<S, E>))
        .route("/api/status", get(status::<S, E>))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Mark attendance ─────────────────────────────────────────────────────────

/// Body of `POST /api/mark_attendance`. The camelCase aliases are the field
/// names used by the browser capture page.
#[derive(Debug, Deserialize)]
pub struct MarkRequest {
    #[serde(default, alias = "userId")]
    pub identity_id: Option<String>,
    #[serde(default, alias = "userName")]
    pub display_name: Option<String>,
    /// Base64, optionally as a `data:<mime>;base64,<payload>` URL.
    #[serde(default, alias = "imageData")]
    pub image: Option<String>,
    #[serde(default)]
    pub confidence: Option<Value>,
}

impl MarkRequest {
    fn into_attempt(self, max_image_bytes: usize) -> Result<AttendanceAttempt, ValidationError> {
        let image = match self.image.as_deref().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => decode_image(encoded, max_image_bytes)?,
            _ => Vec::new(),
        };
        let confidence = confidence_text(self.confidence)?;
        AttendanceAttempt::new(
            self.identity_id.as_deref().unwrap_or_default(),
            self.display_name.as_deref().unwrap_or_default(),
            image,
            confidence,
        )
    }
}

fn decode_image(encoded: &str, max_bytes: usize) -> Result<Vec<u8>, ValidationError> {
    let payload = if encoded.starts_with("data:") {
        encoded
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or(ValidationError::InvalidBase64)?
    } else {
        encoded
    };

    let bytes = B64
        .decode(payload.trim())
        .map_err(|_| ValidationError::InvalidBase64)?;
    if bytes.len() > max_bytes {
        return Err(ValidationError::ImageTooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    image::guess_format(&bytes).map_err(|_| ValidationError::NotAnImage)?;
    Ok(bytes)
}

fn confidence_text(value: Option<Value>) -> Result<Option<String>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ValidationError::InvalidConfidence),
    }
}

/// `POST /api/mark_attendance`
pub async fn mark_attendance<S, E>(
    State(state): State<AppState<S, E>>,
    payload: Result<Json<MarkRequest>, JsonRejection>,
) -> Result<Response, ApiError>
where
    S: AttendanceStore + 'static,
    E: Embedder + 'static,
{
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let attempt = body.into_attempt(state.limits.max_image_bytes)?;
    let outcome = state.engine.resolve(attempt).await?;
    Ok(outcome_response(outcome))
}

fn outcome_response(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Recorded(record) => {
            (StatusCode::OK, Json(json!({ "status": "success", "data": record }))).into_response()
        }
        Outcome::AlreadyMarked => {
            (StatusCode::OK, Json(json!({ "status": "exists" }))).into_response()
        }
        Outcome::FaceConflict { .. } => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "status": "face_mismatch",
                "message": "face already linked to another identity",
            })),
        )
            .into_response(),
        Outcome::NoFaceDetected => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "face_mismatch", "message": "no face found" })),
        )
            .into_response(),
    }
}

// ─── Reads ───────────────────────────────────────────────────────────────────

/// `GET /api/attendance_list`
pub async fn attendance_list<S, E>(
    State(state): State<AppState<S, E>>,
) -> Result<Json<Value>, ApiError>
where
    S: AttendanceStore + 'static,
    E: Embedder + 'static,
{
    let records = state.engine.recent(state.limits.recent_limit).await?;
    Ok(Json(json!({ "status": "success", "data": records })))
}

/// `GET /api/status`
pub async fn status<S, E>(State(state): State<AppState<S, E>>) -> Result<Json<Value>, ApiError>
where
    S: AttendanceStore + 'static,
    E: Embedder + 'static,
{
    let enrolled = state.engine.enrolled_count().await?;
    let settings = state.engine.settings();
    Ok(Json(json!({
        "status": "success",
        "version": env!("CARGO_PKG_VERSION"),
        "enrolled": enrolled,
        "metric": settings.metric.to_string(),
        "threshold": settings.threshold,
    })))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = detail, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "message": "internal server error" })),
    )
        .into_response()
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": "error", "message": "route not found" })),
    )
}
