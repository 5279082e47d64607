use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};

use super::broadcast::{BoardEvent, BroadcastDispatcher};
use super::cascade::CascadeDeletionCoordinator;
use super::db::{BoardDb, DbHandle};
use super::gate::{FeedbackGate, feedback_key};
use super::lifecycle::Transition;
use super::models::*;
use super::notify::NotificationFanout;
use super::registry::ConnectionRegistry;
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub dispatcher: BroadcastDispatcher,
    pub fanout: NotificationFanout,
    pub cascade: CascadeDeletionCoordinator,
    pub gate: Box<dyn FeedbackGate>,
}

impl AppState {
    /// Wire the live-update components around one registry: the one the
    /// fan-out's dispatcher already holds.
    pub fn new(db: DbHandle, fanout: NotificationFanout, gate: Box<dyn FeedbackGate>) -> Self {
        let dispatcher = fanout.dispatcher().clone();
        let cascade =
            CascadeDeletionCoordinator::new(db.clone(), Arc::clone(dispatcher.registry()));
        Self {
            db,
            dispatcher,
            fanout,
            cascade,
            gate,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.dispatcher.registry()
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateBoardRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize, Default)]
pub struct UpdateBoardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visible_columns: Option<Vec<String>>,
    pub visible_fields: Option<Vec<String>>,
}

impl UpdateBoardRequest {
    fn into_patch(self) -> Result<BoardPatch, BoardError> {
        let visible_columns = self
            .visible_columns
            .map(|names| names.iter().map(|n| n.parse()).collect::<Result<Vec<Column>, _>>())
            .transpose()?;
        let visible_fields = self
            .visible_fields
            .map(|names| names.iter().map(|n| n.parse()).collect::<Result<Vec<IdeaField>, _>>())
            .transpose()?;
        Ok(BoardPatch {
            name: self.name,
            description: self.description,
            visible_columns,
            visible_fields,
        })
    }
}

fn default_confidence() -> u8 {
    Confidence::LOW.value()
}

#[derive(Deserialize)]
pub struct CreateIdeaRequest {
    pub one_liner: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub value_statement: String,
    #[serde(default)]
    pub reach: u8,
    #[serde(default)]
    pub impact: u8,
    #[serde(default = "default_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub effort: u8,
}

impl CreateIdeaRequest {
    fn into_new_idea(self) -> Result<NewIdea, BoardError> {
        Ok(NewIdea {
            one_liner: self.one_liner,
            description: self.description,
            value_statement: self.value_statement,
            rice: RiceScore::new(self.reach, self.impact, self.confidence, self.effort)?,
        })
    }
}

#[derive(Deserialize, Default)]
pub struct UpdateIdeaRequest {
    pub one_liner: Option<String>,
    pub description: Option<String>,
    pub value_statement: Option<String>,
    pub reach: Option<u8>,
    pub impact: Option<u8>,
    pub confidence: Option<u8>,
    pub effort: Option<u8>,
}

impl UpdateIdeaRequest {
    /// Text and RICE edits only; workflow fields go through the lifecycle.
    fn into_patch(self, current: &Idea) -> Result<IdeaPatch, BoardError> {
        let mut patch = IdeaPatch::default();
        if let Some(v) = &self.one_liner {
            patch.one_liner = Some(check_text("one_liner", v, true, ONE_LINER_MAX)?);
        }
        if let Some(v) = &self.description {
            patch.description = Some(check_text("description", v, false, LONG_TEXT_MAX)?);
        }
        if let Some(v) = &self.value_statement {
            patch.value_statement = Some(check_text("value_statement", v, false, LONG_TEXT_MAX)?);
        }
        if self.reach.is_some()
            || self.impact.is_some()
            || self.confidence.is_some()
            || self.effort.is_some()
        {
            let rice = current.rice;
            patch.rice = Some(RiceScore::new(
                self.reach.unwrap_or(rice.reach),
                self.impact.unwrap_or(rice.impact),
                self.confidence.unwrap_or(rice.confidence.value()),
                self.effort.unwrap_or(rice.effort),
            )?);
        }
        Ok(patch)
    }
}

#[derive(Deserialize)]
pub struct MoveIdeaRequest {
    pub column: String,
    pub position: i32,
}

#[derive(Deserialize)]
pub struct ProgressRequest {
    pub in_progress: bool,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct EmojiRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub idea_id: i64,
    pub thumbs_up: i64,
    pub emoji_reactions: std::collections::BTreeMap<String, i64>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    TooManyRequests(String),
    /// A rolled-back transaction; the same request may be retried.
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Unavailable(msg) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({"error": msg, "retryable": true})),
                )
                    .into_response();
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        let message = err.to_string();
        match err {
            BoardError::Validation { .. } => ApiError::BadRequest(message),
            BoardError::NotFound { .. } => ApiError::NotFound(message),
            BoardError::RateLimited => ApiError::TooManyRequests(message),
            BoardError::Transaction(_) => ApiError::Unavailable(message),
            BoardError::Database(e) => {
                tracing::error!(error = %format!("{:#}", e), "Database error");
                ApiError::Internal(message)
            }
        }
    }
}

/// Handlers only produce untyped errors from `DbHandle::call`; anything not
/// already a `BoardError` is a storage failure.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<BoardError>() {
            Ok(board_err) => board_err.into(),
            Err(other) => BoardError::Database(other).into(),
        }
    }
}

// ── Extractors ────────────────────────────────────────────────────────

/// Header set by the upstream authentication layer.
pub const OWNER_HEADER: &str = "x-owner-id";

/// The authenticated board owner.
pub struct OwnerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| OwnerId(v.to_string()))
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", OWNER_HEADER)))
    }
}

/// Best-effort identity of an anonymous viewer, used for rate limiting and
/// notification payloads.
pub struct ClientOrigin(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientOrigin {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientOrigin(client_origin(parts)))
    }
}

fn client_origin(parts: &Parts) -> String {
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/boards", get(list_boards).post(create_board))
        .route(
            "/api/boards/{id}",
            get(get_board).patch(update_board).delete(delete_board),
        )
        .route("/api/boards/{id}/token", post(regenerate_token))
        .route("/api/boards/{id}/ideas", post(create_idea))
        .route(
            "/api/ideas/{id}",
            get(get_idea).patch(update_idea).delete(delete_idea),
        )
        .route("/api/ideas/{id}/move", patch(move_idea))
        .route("/api/ideas/{id}/progress", patch(set_progress))
        .route("/api/ideas/{id}/status", patch(set_status))
        .route("/api/public/{token}", get(get_public_board))
        .route(
            "/api/public/{token}/ideas/{idea_id}/thumbs-up",
            post(public_thumbs_up),
        )
        .route("/api/public/{token}/ideas/{idea_id}/emoji", post(public_emoji))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Fetch a board the caller owns. Someone else's board is reported exactly
/// like a missing one.
pub(crate) fn owned_board(db: &BoardDb, board_id: i64, owner: &str) -> anyhow::Result<Board> {
    match db.find_board(board_id)? {
        Some(board) if board.owner_id == owner => Ok(board),
        _ => Err(BoardError::board_not_found(board_id).into()),
    }
}

fn owned_idea(db: &BoardDb, idea_id: i64, owner: &str) -> anyhow::Result<(Board, Idea)> {
    let idea = db
        .find_idea(idea_id)?
        .ok_or_else(|| BoardError::idea_not_found(idea_id))?;
    match db.find_board(idea.board_id)? {
        Some(board) if board.owner_id == owner => Ok((board, idea)),
        _ => Err(BoardError::idea_not_found(idea_id).into()),
    }
}

/// Ownership check and transition under one database lock. Returns the
/// board with the idea before and after.
async fn run_transition(
    state: &SharedState,
    owner: String,
    idea_id: i64,
    transition: Transition,
) -> Result<(Board, Idea, Idea), ApiError> {
    let result = state
        .db
        .call(move |db| {
            let (board, _) = owned_idea(db, idea_id, &owner)?;
            let (before, after) = db.transition_idea(idea_id, &transition)?;
            Ok((board, before, after))
        })
        .await?;
    Ok(result)
}

fn announce_move(dispatcher: &BroadcastDispatcher, board: &Board, before: &Idea, after: &Idea) {
    dispatcher.broadcast(
        board,
        &BoardEvent::IdeaMoved {
            idea_id: after.id,
            from_column: before.column,
            to_column: after.column,
            position: after.position,
            status: after.status,
        },
    );
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_boards(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
) -> Result<impl IntoResponse, ApiError> {
    let boards = state.db.call(move |db| db.list_boards(&owner)).await?;
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Json(req): Json<CreateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| db.create_board(&owner, &req.name, &req.description))
        .await?;
    Ok((StatusCode::CREATED, Json(board)))
}

async fn get_board(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .db
        .call(move |db| {
            owned_board(db, id, &owner)?;
            Ok(db
                .get_board_view(id)?
                .ok_or_else(|| BoardError::board_not_found(id))?)
        })
        .await?;
    Ok(Json(view))
}

async fn update_board(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
    Json(req): Json<UpdateBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let patch = req.into_patch()?;
    let board = state
        .db
        .call(move |db| {
            owned_board(db, id, &owner)?;
            db.update_board(id, &patch)
        })
        .await?;
    state.dispatcher.broadcast(
        &board,
        &BoardEvent::BoardUpdated {
            board: board.clone(),
        },
    );
    Ok(Json(board))
}

async fn delete_board(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.cascade.delete_board(id, &owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn regenerate_token(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| {
            owned_board(db, id, &owner)?;
            db.regenerate_public_token(id)
        })
        .await?;
    Ok(Json(board))
}

async fn create_idea(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(board_id): Path<i64>,
    Json(req): Json<CreateIdeaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new_idea = req.into_new_idea()?;
    let (board, idea) = state
        .db
        .call(move |db| {
            let board = owned_board(db, board_id, &owner)?;
            let idea = db.create_idea(board_id, new_idea)?;
            Ok((board, idea))
        })
        .await?;
    state.dispatcher.broadcast(
        &board,
        &BoardEvent::IdeaUpdated { idea: idea.clone() },
    );
    Ok((StatusCode::CREATED, Json(idea)))
}

async fn get_idea(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, idea) = state.db.call(move |db| owned_idea(db, id, &owner)).await?;
    Ok(Json(idea))
}

async fn update_idea(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
    Json(req): Json<UpdateIdeaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (board, idea) = state
        .db
        .call(move |db| {
            let (board, current) = owned_idea(db, id, &owner)?;
            let patch = req.into_patch(&current)?;
            let idea = db.update_idea(id, &patch)?;
            Ok((board, idea))
        })
        .await?;
    state.dispatcher.broadcast(
        &board,
        &BoardEvent::IdeaUpdated { idea: idea.clone() },
    );
    Ok(Json(idea))
}

async fn delete_idea(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| {
            let (board, _) = owned_idea(db, id, &owner)?;
            db.delete_idea(id)?;
            Ok(board)
        })
        .await?;
    // No dedicated event for removals; viewers refetch on board_updated.
    state.dispatcher.broadcast(
        &board,
        &BoardEvent::BoardUpdated {
            board: board.clone(),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn move_idea(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
    Json(req): Json<MoveIdeaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let column: Column = req.column.parse()?;
    let transition = Transition::Move {
        column,
        position: req.position,
    };
    let (board, before, after) = run_transition(&state, owner, id, transition).await?;
    announce_move(&state.dispatcher, &board, &before, &after);
    if before.in_progress != after.in_progress {
        state.dispatcher.broadcast(
            &board,
            &BoardEvent::IdeaUpdated { idea: after.clone() },
        );
    }
    Ok(Json(after))
}

async fn set_progress(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
    Json(req): Json<ProgressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (board, _, after) =
        run_transition(&state, owner, id, Transition::MarkInProgress(req.in_progress)).await?;
    state.dispatcher.broadcast(
        &board,
        &BoardEvent::IdeaUpdated { idea: after.clone() },
    );
    Ok(Json(after))
}

async fn set_status(
    State(state): State<SharedState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status: IdeaStatus = req.status.parse()?;
    let (board, before, after) =
        run_transition(&state, owner, id, Transition::SetStatus(status)).await?;
    if before.column != after.column {
        announce_move(&state.dispatcher, &board, &before, &after);
    }
    state.dispatcher.broadcast(
        &board,
        &BoardEvent::IdeaUpdated { idea: after.clone() },
    );
    Ok(Json(after))
}

// ── Public link ───────────────────────────────────────────────────────

async fn get_public_board(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .db
        .call(move |db| {
            let board = db
                .find_board_by_token(&token)?
                .ok_or_else(|| BoardError::board_not_found("for this link"))?;
            Ok(db
                .get_board_view(board.id)?
                .ok_or_else(|| BoardError::board_not_found(board.id))?)
        })
        .await?;
    Ok(Json(PublicBoardView::from_board_view(&view)))
}

async fn public_thumbs_up(
    State(state): State<SharedState>,
    Path((token, idea_id)): Path<(String, i64)>,
    ClientOrigin(origin): ClientOrigin,
) -> Result<impl IntoResponse, ApiError> {
    record_public_feedback(&state, token, idea_id, FeedbackKind::ThumbsUp, origin).await
}

async fn public_emoji(
    State(state): State<SharedState>,
    Path((token, idea_id)): Path<(String, i64)>,
    ClientOrigin(origin): ClientOrigin,
    Json(req): Json<EmojiRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = FeedbackKind::emoji(&req.emoji)?;
    record_public_feedback(&state, token, idea_id, kind, origin).await
}

/// Gate, record, answer with the new counters, then fan out. Channel
/// results are never awaited here.
async fn record_public_feedback(
    state: &SharedState,
    token: String,
    idea_id: i64,
    kind: FeedbackKind,
    origin: String,
) -> Result<Json<FeedbackResponse>, ApiError> {
    if !state.gate.allow(&feedback_key(idea_id, &origin)) {
        return Err(BoardError::RateLimited.into());
    }

    let transition = Transition::RecordFeedback(kind.clone());
    let (board, idea) = state
        .db
        .call(move |db| {
            let board = db
                .find_board_by_token(&token)?
                .ok_or_else(|| BoardError::board_not_found("for this link"))?;
            // Only ideas the public view shows can receive feedback.
            let idea = db
                .find_idea(idea_id)?
                .filter(|i| {
                    i.board_id == board.id
                        && i.status != IdeaStatus::Archived
                        && board.visible_columns.contains(&i.column)
                })
                .ok_or_else(|| BoardError::idea_not_found(idea_id))?;
            let (_, after) = db.transition_idea(idea.id, &transition)?;
            Ok((board, after))
        })
        .await?;

    let event = FeedbackEvent::new(board.id, idea.id, kind, origin);
    tracing::info!(
        board_id = board.id,
        idea_id = idea.id,
        feedback = %event.kind,
        origin = %event.origin,
        "Recorded feedback"
    );
    state.dispatcher.broadcast(
        &board,
        &BoardEvent::IdeaUpdated { idea: idea.clone() },
    );
    state.fanout.notify(&board, &idea, &event);

    Ok(Json(FeedbackResponse {
        idea_id: idea.id,
        thumbs_up: idea.thumbs_up,
        emoji_reactions: idea.emoji_reactions,
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────
