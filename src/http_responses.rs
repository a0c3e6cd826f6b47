//! HTTP response types for the prompt endpoints.
//!
//! Successful results go out through [`PromptResponder`]; failures through
//! [`APIError`]. Both render JSON bodies.

use crate::scheduler::{JobId, JobView, SchedulerError, SubmitReceipt};
use axum::extract::Json;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

pub const AUTH_REALM: &str = "Basic realm=\"prompt-gateway\"";

// ============================================================================
// Error Response Handling
// ============================================================================

/// Trait for converting errors to HTTP responses
trait ErrorToResponse: Serialize {
    fn to_response(&self, code: StatusCode) -> Response {
        let mut r = Json(self).into_response();
        *r.status_mut() = code;
        r
    }
}

/// JSON error response format
#[derive(Serialize)]
struct JsonError {
    message: String,
}

impl JsonError {
    fn new(message: String) -> Self {
        Self { message }
    }
}

impl ErrorToResponse for JsonError {}

/// Client-visible failures. Messages never include key material or ids of
/// other jobs.
#[derive(Debug, thiserror::Error)]
pub enum APIError {
    #[error("{0}")]
    BadRequest(String),

    #[error("authorization required")]
    Unauthorized,

    #[error("prompt not found")]
    NotFound,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("internal error")]
    Internal(String),
}

impl APIError {
    pub fn status(&self) -> StatusCode {
        match self {
            APIError::BadRequest(_) => StatusCode::BAD_REQUEST,
            APIError::Unauthorized => StatusCode::UNAUTHORIZED,
            APIError::NotFound => StatusCode::NOT_FOUND,
            APIError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            APIError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SchedulerError> for APIError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Rejected { .. } => APIError::PayloadTooLarge(err.to_string()),
            other => {
                error!("scheduler invariant violated: {other}");
                APIError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for APIError {
    fn into_response(self) -> Response {
        let mut r = JsonError::new(self.to_string()).to_response(self.status());
        if let APIError::Unauthorized = self {
            r.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(AUTH_REALM),
            );
        }
        r
    }
}

// ============================================================================
// Prompt Responses
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub prompt_id: JobId,
    pub queue_position: usize,
}

impl From<SubmitReceipt> for SubmitResponse {
    fn from(receipt: SubmitReceipt) -> Self {
        Self {
            prompt_id: receipt.id,
            queue_position: receipt.position,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub prompt: String,
    pub model: String,
    /// -1 once the worker has picked the job up.
    pub queue_position: i64,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteResponse {
    pub prompt: String,
    pub model: String,
    pub response: String,
    pub elapsed_ms: f64,
    pub tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms_per_token: Option<f64>,
    #[serde(rename = "queuedAt")]
    pub queued_at: DateTime<Utc>,
    #[serde(rename = "completedAt")]
    pub completed_at: DateTime<Utc>,
}

/// HTTP response for the prompt endpoints.
pub enum PromptResponder {
    /// Job admitted
    Accepted(SubmitResponse),
    /// Job still queued or in flight
    Pending(PendingResponse),
    /// Job finished
    Complete(CompleteResponse),
}

impl From<JobView> for PromptResponder {
    fn from(view: JobView) -> Self {
        match view.state {
            crate::scheduler::JobState::Pending { position } => {
                PromptResponder::Pending(PendingResponse {
                    prompt: view.prompt,
                    model: view.model,
                    queue_position: position.map(|p| p as i64).unwrap_or(-1),
                    queued_at: view.queued_at,
                })
            }
            crate::scheduler::JobState::Complete(result) => {
                PromptResponder::Complete(CompleteResponse {
                    ms_per_token: result.ms_per_token(),
                    prompt: view.prompt,
                    model: view.model,
                    response: result.response,
                    elapsed_ms: result.elapsed_ms,
                    tokens: result.tokens,
                    queued_at: view.queued_at,
                    completed_at: result.completed_at,
                })
            }
        }
    }
}

impl IntoResponse for PromptResponder {
    fn into_response(self) -> Response {
        match self {
            PromptResponder::Accepted(r) => Json(r).into_response(),
            PromptResponder::Pending(r) => (StatusCode::ACCEPTED, Json(r)).into_response(),
            PromptResponder::Complete(r) => Json(r).into_response(),
        }
    }
}
