use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use entrev_core::{
    Action, CommitHash, CommitMessage, CommitRow, Diff, Engine, Entity, EntityKind, EntityRef,
    Error, RevertOutcome, SqliteHistory, SqliteLiveStore, VersionId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

pub type SiteEngine = Engine<SqliteHistory, SqliteLiveStore>;

const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SiteEngine>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/activate", post(activate))
        .route("/entities", post(save_entity))
        .route("/entities/:kind", get(list_entities))
        .route("/entities/:kind/:id", get(get_entity).delete(delete_entity))
        .route("/commits", get(get_commit_rows))
        .route("/commits/selectable", get(get_selectable_commits))
        .route("/commits/:hash", get(get_commit))
        .route("/undo", post(undo))
        .route("/rollback", post(rollback))
        .with_state(state)
}

/// Engine error carried to an HTTP response.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

pub fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::Conflict { .. } => StatusCode::CONFLICT,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        Error::Encoding { .. }
        | Error::CorruptData { .. }
        | Error::InvalidIdentity(_)
        | Error::InvalidOperation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if self.0.is_warning() {
            warn!("{}", self.0);
        } else if status.is_server_error() {
            error!("{}", self.0);
        }

        let mut body = serde_json::json!({
            "error": self.0.to_string(),
            "warning": self.0.is_warning(),
        });
        match &self.0 {
            Error::Resync { commit, .. } => body["commit"] = commit.clone().into(),
            Error::Conflict { hash, conflicting } => {
                body["hash"] = hash.clone().into();
                body["conflicting"] = conflicting.clone().into();
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

fn parse_kind(kind: &str) -> Result<EntityKind, Error> {
    EntityKind::parse(kind)
        .ok_or_else(|| Error::InvalidIdentity(format!("unknown entity kind '{}'", kind)))
}

fn parse_ref(kind: &str, id: &str) -> Result<EntityRef, Error> {
    Ok(EntityRef::new(parse_kind(kind)?, VersionId::parse(id)?))
}

/// An entity as hosts send it. A missing `vp_id` assigns a fresh identity.
#[derive(Debug, Deserialize, Serialize)]
pub struct EntityPayload {
    pub kind: String,
    pub vp_id: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub action: Option<Action>,
}

impl EntityPayload {
    fn into_entity(self) -> Result<(Entity, Option<Action>), Error> {
        let kind = parse_kind(&self.kind)?;
        let vp_id = match self.vp_id {
            Some(id) => VersionId::parse(&id)?,
            None => VersionId::generate(),
        };
        Ok((Entity::from_json(kind, vp_id, self.fields)?, self.action))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub vp_id: String,
    pub commit: Option<CommitHash>,
}

async fn save_entity(
    State(state): State<AppState>,
    Json(payload): Json<EntityPayload>,
) -> ApiResult<SaveResponse> {
    let (entity, action) = payload.into_entity()?;
    let vp_id = entity.vp_id.to_string();
    let commit = match action {
        Some(action) => state.engine.save_as(entity, action).await?,
        None => state.engine.save(entity).await?,
    };
    Ok(Json(SaveResponse { vp_id, commit }))
}

async fn delete_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<SaveResponse> {
    let target = parse_ref(&kind, &id)?;
    let commit = state.engine.delete(&target).await?;
    Ok(Json(SaveResponse {
        vp_id: id,
        commit: Some(commit),
    }))
}

async fn get_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Entity> {
    let target = parse_ref(&kind, &id)?;
    Ok(Json(state.engine.read(&target)?))
}

async fn list_entities(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Vec<Entity>> {
    Ok(Json(state.engine.read_all(parse_kind(&kind)?)?))
}

#[derive(Debug, Deserialize)]
struct ActivateRequest {
    entities: Vec<EntityPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub commit: CommitHash,
}

async fn activate(
    State(state): State<AppState>,
    Json(req): Json<ActivateRequest>,
) -> ApiResult<ActivateResponse> {
    let entities = req
        .entities
        .into_iter()
        .map(|p| p.into_entity().map(|(entity, _)| entity))
        .collect::<Result<Vec<_>, _>>()?;
    let commit = state.engine.activate(entities).await?;
    Ok(Json(ActivateResponse { commit }))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: usize,
    page_size: Option<usize>,
}

async fn get_commit_rows(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<CommitRow>> {
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(state.engine.list_commit_rows(query.page, page_size).await?))
}

async fn get_selectable_commits(State(state): State<AppState>) -> ApiResult<Vec<CommitHash>> {
    Ok(Json(state.engine.selectable_commits().await?))
}

#[derive(Debug, Serialize)]
struct CommitDetail {
    hash: CommitHash,
    parent: Option<CommitHash>,
    timestamp: DateTime<Utc>,
    summary: String,
    message: CommitMessage,
    diffs: Vec<Diff>,
}

async fn get_commit(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<CommitDetail> {
    let (commit, diffs) = state.engine.commit_diffs(&hash).await?;
    Ok(Json(CommitDetail {
        summary: commit.message.summary(),
        hash: commit.hash,
        parent: commit.parent,
        timestamp: commit.timestamp,
        message: commit.message,
        diffs,
    }))
}

#[derive(Debug, Deserialize)]
struct UndoRequest {
    hashes: Vec<CommitHash>,
}

async fn undo(
    State(state): State<AppState>,
    Json(req): Json<UndoRequest>,
) -> ApiResult<RevertOutcome> {
    Ok(Json(state.engine.undo(&req.hashes).await?))
}

#[derive(Debug, Deserialize)]
struct RollbackRequest {
    target: CommitHash,
}

async fn rollback(
    State(state): State<AppState>,
    Json(req): Json<RollbackRequest>,
) -> ApiResult<RevertOutcome> {
    Ok(Json(state.engine.rollback(&req.target).await?))
}
