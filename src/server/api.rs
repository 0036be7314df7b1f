use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::artifacts::{Artifact, ArtifactRegistry, ArtifactSet};
use crate::logging::read_log_lines;
use crate::session::{OrchestratorFactory, Session, SessionView, Trigger};

/// Lines returned by the log endpoint.
const LOG_TAIL_LINES: usize = 200;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub registry: ArtifactRegistry,
    pub factory: OrchestratorFactory,
    pub poll_interval_ms: u64,
    pub sessions: RwLock<HashMap<Uuid, Arc<SessionSlot>>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(registry: ArtifactRegistry, factory: OrchestratorFactory, poll_interval_ms: u64) -> Self {
        Self {
            registry,
            factory,
            poll_interval_ms,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, id: Uuid) -> Result<Arc<SessionSlot>, ApiError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))
    }
}

/// One session plus the snapshot served while a step is in flight.
pub struct SessionSlot {
    session: tokio::sync::Mutex<Session>,
    view: RwLock<SessionView>,
    busy: AtomicBool,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        let view = session.view();
        Self {
            session: tokio::sync::Mutex::new(session),
            view: RwLock::new(view),
            busy: AtomicBool::new(false),
        }
    }

    fn view(&self) -> SessionView {
        let mut view = self
            .view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        view.busy = self.busy.load(Ordering::SeqCst);
        view
    }

    fn publish(&self, view: SessionView) {
        *self.view.write().unwrap_or_else(PoisonError::into_inner) = view;
    }
}

/// Clears the busy flag when the worker finishes, even by panicking.
struct BusyGuard(Arc<SessionSlot>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Serialize)]
pub struct LogTail {
    pub path: Option<std::path::PathBuf>,
    pub lines: Vec<String>,
}

#[derive(Serialize)]
pub struct ArtifactStatus {
    pub artifacts: ArtifactSet,
    pub complete: bool,
    pub missing: Vec<&'static str>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/messages", post(post_message))
        .route("/api/sessions/{id}/advance", post(advance_session))
        .route("/api/sessions/{id}/log", get(get_session_log))
        .route("/api/artifacts", get(get_artifacts))
        .route("/api/deliverable", get(get_deliverable))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_session(State(state): State<SharedState>) -> impl IntoResponse {
    let session = Session::new(state.factory.clone(), state.poll_interval_ms);
    let id = session.id();
    let slot = Arc::new(SessionSlot::new(session));
    let view = slot.view();
    state
        .sessions
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id, slot);
    debug!("Created session {}", id);
    (StatusCode::CREATED, Json(view))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.slot(id)?.view()))
}

async fn delete_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = state.slot(id)?;
    // Claim the slot so no step can start while it is torn down
    if slot.busy.swap(true, Ordering::SeqCst) {
        return Err(ApiError::Conflict(format!("Session {} is busy", id)));
    }
    state
        .sessions
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    match slot.session.try_lock() {
        Ok(mut session) => session.reset(),
        Err(_) => return Err(ApiError::Internal(format!("Session {} is locked", id))),
    }
    debug!("Deleted session {}", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn post_message(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    dispatch(state.slot(id)?, Trigger::Turn(req.text))
}

async fn advance_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    dispatch(state.slot(id)?, Trigger::Poll)
}

/// Run one trigger on a worker task and answer immediately.
fn dispatch(
    slot: Arc<SessionSlot>,
    trigger: Trigger,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    if slot.busy.swap(true, Ordering::SeqCst) {
        let id = slot.view().id;
        return Err(ApiError::Conflict(format!("Session {} is busy", id)));
    }

    let guard = BusyGuard(slot.clone());
    tokio::spawn(async move {
        let slot = guard.0.clone();
        let mut session = slot.session.lock().await;
        session.trigger(trigger).await;
        slot.publish(session.view());
        drop(session);
        drop(guard);
    });

    Ok((StatusCode::ACCEPTED, Json(slot.view())))
}

async fn get_session_log(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let path = state.slot(id)?.view().log_file;
    let lines = match &path {
        Some(path) => {
            let lines = read_log_lines(path);
            let skip = lines.len().saturating_sub(LOG_TAIL_LINES);
            lines.into_iter().skip(skip).collect()
        }
        None => Vec::new(),
    };
    Ok(Json(LogTail { path, lines }))
}

async fn get_artifacts(State(state): State<SharedState>) -> impl IntoResponse {
    let artifacts = state.registry.snapshot();
    Json(ArtifactStatus {
        complete: artifacts.pipeline_complete(),
        missing: artifacts.missing(),
        artifacts,
    })
}

async fn get_deliverable(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let path = state.registry.path(Artifact::Deliverable);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((
            [
                (header::CONTENT_TYPE, "application/zip"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"deliverable.zip\"",
                ),
            ],
            bytes,
        )
            .into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound("deliverable.zip not created yet".to_string()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
