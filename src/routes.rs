use crate::auth::{AuthLevel, Authorizer};
use crate::config::{ModelRegistry, PromptWrappers};
use crate::http_responses::{APIError, PromptResponder, SubmitResponse};
use crate::runtime::RuntimeSnapshot;
use crate::scheduler::{JobId, JobRequest, Priority, PromptScheduler};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, Uri},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<dyn PromptScheduler>,
    pub auth: Arc<dyn Authorizer>,
    pub models: Arc<ModelRegistry>,
    /// Introspection route; `None` leaves it unmounted.
    pub runtime_path: Option<String>,
}

/// Body of `POST /prompt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub prompt: String,
    pub model: String,
    pub prompt_wrappers: Option<PromptWrappers>,
    pub priority: Option<Priority>,
    pub mirostat: Option<u32>,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/models", get(models_handler))
        .route("/prompt", post(submit_handler))
        .route("/prompt/:id", get(poll_handler));
    if let Some(path) = &state.runtime_path {
        router = router.route(path, get(runtime_handler));
    }
    router.with_state(state)
}

/// `X-Forwarded-For` when a proxy set it, else the peer address.
fn remote_addr(headers: &HeaderMap, connect: Option<ConnectInfo<SocketAddr>>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        return forwarded.to_string();
    }
    connect
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl AppState {
    fn authorize(
        &self,
        headers: &HeaderMap,
        required: AuthLevel,
        remote: &str,
        path: &str,
    ) -> Result<(), APIError> {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());
        self.auth
            .authorize(authorization, required, remote, path)
            .map_err(|e| {
                warn!("Rejected {path} from {remote}: {e}");
                APIError::Unauthorized
            })
    }
}

async fn models_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, APIError> {
    let remote = remote_addr(&headers, connect);
    state.authorize(&headers, AuthLevel::All, &remote, "/models")?;

    let models: serde_json::Map<String, serde_json::Value> = state
        .models
        .list()
        .iter()
        .map(|m| {
            (
                m.name.clone(),
                json!({
                    "promptWrappers": m.prompt_wrappers,
                    "mirostat": m.mirostat,
                    "notes": m.notes,
                }),
            )
        })
        .collect();
    info!("GET /models {remote}");
    Ok(Json(serde_json::Value::Object(models)))
}

async fn submit_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<PromptResponder, APIError> {
    let remote = remote_addr(&headers, connect);
    state.authorize(&headers, AuthLevel::PostSubmit, &remote, "/prompt")?;

    let request: SubmitRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!("POST /prompt {remote} bad JSON body: {e}");
        APIError::BadRequest(format!("invalid request body: {e}"))
    })?;

    let priority = request.priority.unwrap_or_default();
    if priority == Priority::High && !state.auth.requires_key(AuthLevel::PostSubmit) {
        state.authorize(&headers, AuthLevel::HighPriority, &remote, "/prompt")?;
    }

    let profile = state.models.find(&request.model).ok_or_else(|| {
        warn!("POST /prompt {remote} unknown model '{}'", request.model);
        APIError::BadRequest(format!("model '{}' is not available", request.model))
    })?;
    let prompt = match request
        .prompt_wrappers
        .as_ref()
        .or(profile.prompt_wrappers.as_ref())
    {
        Some(wrappers) => wrappers.wrap(&request.prompt),
        None => request.prompt,
    };
    let job = JobRequest::new(prompt, request.model)
        .with_priority(priority)
        .with_remote_addr(remote.clone())
        .with_mirostat(request.mirostat.or(profile.mirostat));

    let receipt = state.scheduler.submit(job).inspect_err(|e| {
        warn!("POST /prompt {remote} not queued: {e}");
    })?;
    info!(
        "POST /prompt {remote} queued {} at position {}",
        receipt.id, receipt.position
    );
    Ok(PromptResponder::Accepted(SubmitResponse::from(receipt)))
}

async fn poll_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<PromptResponder, APIError> {
    let remote = remote_addr(&headers, connect);
    let path = format!("/prompt/{id}");
    state.authorize(&headers, AuthLevel::PollById, &remote, &path)?;

    let id: JobId = id.parse().map_err(|_| {
        info!("GET {path} {remote} malformed id");
        APIError::NotFound
    })?;
    let view = state.scheduler.query(id).ok_or_else(|| {
        info!("GET {path} {remote} not found");
        APIError::NotFound
    })?;
    info!("GET {path} {remote}");
    Ok(PromptResponder::from(view))
}

async fn runtime_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<RuntimeSnapshot>, APIError> {
    let remote = remote_addr(&headers, connect);
    state.authorize(&headers, AuthLevel::Runtime, &remote, uri.path())?;
    info!("GET {} {remote}", uri.path());
    Ok(Json(RuntimeSnapshot::capture(
        state.scheduler.as_ref(),
        state.auth.as_ref(),
    )))
}
