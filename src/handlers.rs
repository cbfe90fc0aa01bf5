use crate::db_types::CallRecord;
use crate::dispatch::DispatchRegistry;
use crate::error::{DispatchError, StoreError};
use crate::tasks::run_dispatched_call;
use crate::transcript::{format_transcript, TranscriptArtifact};
use crate::types::{AppState, DispatchAck, DispatchRequest};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Error body is `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::InvalidRequest(detail) => Self::new(StatusCode::BAD_REQUEST, detail),
            DispatchError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        error!(error=%e, "store request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/create-dispatch", post(create_dispatch))
        .route("/calls", get(list_calls))
        .route("/calls/:recording_id/transcript", get(call_transcript))
        .route("/", get(|| async { "Dial-out agent is running" }))
        .with_state(app_state)
}

/// Accept a call request and start the call in the background.
pub async fn create_dispatch(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<Json<DispatchAck>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        warn!(error=%e, "malformed dispatch request");
        ApiError::new(StatusCode::BAD_REQUEST, e.body_text())
    })?;

    let (dispatch_id, room) = DispatchRegistry::allocate();
    let job = request.into_job(&app_state.default_language, dispatch_id.clone(), room.clone())?;
    let dispatch_count = app_state.dispatches.insert(&dispatch_id, &room);
    let message = format!("Dispatch created for {}", job.phone_number);
    info!(dispatch_id=%dispatch_id, room=%room, products = job.products.len(), "dispatch created");

    tokio::spawn(run_dispatched_call(
        app_state.coordinator.clone(),
        app_state.dispatches.clone(),
        job,
    ));

    Ok(Json(DispatchAck {
        message,
        dispatch_id,
        room,
        dispatch_count,
    }))
}

/// A call record as listed, without its transcript.
#[derive(Debug, Serialize)]
pub struct CallListing {
    pub id: Uuid,
    pub call_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub customer_id: Option<String>,
    pub product_name: Option<String>,
    pub recording_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub segments: Vec<String>,
    pub has_transcript: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl From<CallRecord> for CallListing {
    fn from(r: CallRecord) -> Self {
        Self {
            id: r.id,
            call_id: r.call_id,
            customer_name: r.customer_name,
            phone_number: r.phone_number,
            customer_id: r.customer_id,
            product_name: r.product_name,
            recording_id: r.recording_id,
            started_at: r.started_at,
            ended_at: r.ended_at,
            segments: r.segments.0,
            has_transcript: r.transcript.is_some(),
            created: r.created,
        }
    }
}

pub async fn list_calls(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<CallListing>>, ApiError> {
    let records = app_state.store.list_call_records().await?;
    Ok(Json(records.into_iter().map(CallListing::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct TranscriptView {
    pub recording_id: String,
    pub transcript: String,
}

pub async fn call_transcript(
    State(app_state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
) -> Result<Json<TranscriptView>, ApiError> {
    let record = app_state
        .store
        .find_by_recording_id(&recording_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Recording not found"))?;
    let Some(transcript) = record.transcript else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Transcript not available"));
    };
    let artifact: TranscriptArtifact = serde_json::from_value(transcript.0).map_err(|e| {
        error!(recording_id=%recording_id, error=%e, "stored transcript is malformed");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Stored transcript is malformed")
    })?;
    Ok(Json(TranscriptView {
        recording_id,
        transcript: format_transcript(&artifact),
    }))
}
