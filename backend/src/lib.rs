use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use lineup_core::{Condition, GameError, GameEvent, LineupGrid, Session};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

pub mod config;
pub mod hub;
pub mod logging;
pub mod lookup;
pub mod registry;

use lookup::{LookupError, PlayerLookup};
use registry::{SessionEntry, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub lookup: Arc<dyn PlayerLookup>,
    pub lookup_timeout: Duration,
}

impl AppState {
    pub fn new(lookup: Arc<dyn PlayerLookup>, lookup_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            lookup,
            lookup_timeout,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/session", post(create_session))
        .route("/session/:code", get(get_session).delete(delete_session))
        .route("/session/:code/join", post(join_session))
        .route("/session/:code/condition", post(set_condition))
        .route("/session/:code/guess", post(submit_guess))
        .route("/ws/:code/:player", get(ws_handler))
        .with_state(state)
}

/// Public snapshot of a session, enough for a client to render the whole
/// board without polling.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionView {
    pub code: String,
    pub formation: Vec<u32>,
    pub players: Vec<String>,
    pub lineups: HashMap<String, LineupGrid>,
    pub current_index: usize,
    pub picker_index: usize,
    pub condition: Option<Condition>,
    pub used_players: Vec<String>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        let mut used_players: Vec<String> = session.used_players.iter().cloned().collect();
        used_players.sort();
        Self {
            code: session.code.clone(),
            formation: session.formation.clone(),
            players: session.players.clone(),
            lineups: session.lineups.clone(),
            current_index: session.current_index,
            picker_index: session.picker_index,
            condition: session.condition.clone(),
            used_players,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State(SessionView),
    Event(GameEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown session")]
    UnknownSession,
    #[error("display name required")]
    NameRequired,
    #[error("player lookup unavailable; the same guess is safe to retry")]
    LookupUnavailable,
    #[error("session state corrupted")]
    SessionCorrupted,
    #[error(transparent)]
    Game(#[from] GameError),
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
    retryable: bool,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownSession => "unknown_session",
            Self::NameRequired => "name_required",
            Self::LookupUnavailable => "lookup_unavailable",
            Self::SessionCorrupted => "session_corrupted",
            Self::Game(err) => match err {
                GameError::InvalidFormation => "invalid_formation",
                GameError::NameTaken => "name_taken",
                GameError::NotYourTurn => "not_your_turn",
                GameError::ConditionAlreadySet => "condition_already_set",
                GameError::NoActiveCondition => "no_active_condition",
                GameError::SlotOutOfRange => "slot_out_of_range",
                GameError::AlreadyUsed => "already_used",
                GameError::UnknownPlayer => "unknown_player",
                GameError::UnknownMember => "unknown_member",
                GameError::ConditionMismatch => "condition_mismatch",
                GameError::TurnChanged => "turn_changed",
            },
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::UnknownSession => StatusCode::NOT_FOUND,
            Self::NameRequired => StatusCode::BAD_REQUEST,
            Self::LookupUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::SessionCorrupted => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Game(err) => match err {
                GameError::InvalidFormation | GameError::SlotOutOfRange => StatusCode::BAD_REQUEST,
                GameError::UnknownPlayer | GameError::UnknownMember => StatusCode::NOT_FOUND,
                GameError::ConditionMismatch => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::CONFLICT,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
            retryable: matches!(self, Self::LookupUnavailable),
        };
        (self.status(), Json(body)).into_response()
    }
}

async fn resolve(state: &AppState, code: &str) -> Result<Arc<SessionEntry>, ApiError> {
    state
        .registry
        .get(code)
        .await
        .ok_or(ApiError::UnknownSession)
}

/// Releases the session lock and, on a failed invariant check, removes the
/// session from the registry. A corrupted session is fatal to that session
/// only; its peers and the process carry on.
async fn verify_intact(
    state: &AppState,
    code: &str,
    session: tokio::sync::MutexGuard<'_, Session>,
) -> Result<(), ApiError> {
    let intact = session.invariants_hold();
    drop(session);
    if intact {
        return Ok(());
    }
    state.registry.remove(code).await;
    tracing::error!(code = %code, "session invariants violated; session removed");
    Err(ApiError::SessionCorrupted)
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    formation: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct CreateSessionResponse {
    code: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.registry.create(payload.formation).await?;
    let code = entry.session.lock().await.code.clone();
    tracing::info!(code = %code, "session created");
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { code })))
}

async fn get_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let entry = resolve(&state, &code).await?;
    let session = entry.session.lock().await;
    Ok(Json(SessionView::from(&*session)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.registry.remove(&code).await {
        tracing::info!(code = %code, "session removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::UnknownSession)
    }
}

#[derive(Deserialize)]
struct JoinRequest {
    name: String,
}

async fn join_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<JoinRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::NameRequired);
    }
    let entry = resolve(&state, &code).await?;
    let mut session = entry.session.lock().await;
    let event = session.join(name)?;
    entry.hub.add_player(name);
    let view = SessionView::from(&*session);
    verify_intact(&state, &code, session).await?;

    tracing::info!(code = %code, player = %name, "player joined");
    entry.hub.broadcast(&ServerMessage::State(view.clone()));
    entry.hub.broadcast(&ServerMessage::Event(event));
    Ok(Json(view))
}

#[derive(Deserialize)]
struct SetConditionRequest {
    player: String,
    condition: Condition,
}

async fn set_condition(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<SetConditionRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let entry = resolve(&state, &code).await?;
    let mut session = entry.session.lock().await;
    let event = session.set_condition(&payload.player, payload.condition)?;
    let view = SessionView::from(&*session);
    verify_intact(&state, &code, session).await?;

    tracing::info!(code = %code, picker = %payload.player, "condition set");
    entry.hub.broadcast(&ServerMessage::State(view.clone()));
    entry.hub.broadcast(&ServerMessage::Event(event));
    Ok(Json(view))
}

#[derive(Deserialize)]
struct GuessRequest {
    player: String,
    slot_group: usize,
    slot_index: usize,
    footballer: String,
}

/// The one operation with a suspension point. The session lock is *not*
/// held across the lookup; instead the guess is validated up front, the
/// ticket pins the turn state, and `apply_guess` aborts with `TurnChanged`
/// if anything moved while the lookup was in flight.
async fn submit_guess(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<GuessRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let entry = resolve(&state, &code).await?;

    let ticket = {
        let session = entry.session.lock().await;
        session.validate_guess(
            &payload.player,
            payload.slot_group,
            payload.slot_index,
            &payload.footballer,
        )?
    };

    let attrs = match timeout(state.lookup_timeout, state.lookup.lookup(&payload.footballer)).await
    {
        Err(_) => {
            tracing::warn!(code = %code, footballer = %payload.footballer, "lookup timed out");
            return Err(ApiError::LookupUnavailable);
        }
        Ok(Err(LookupError::Unavailable)) => return Err(ApiError::LookupUnavailable),
        Ok(Ok(None)) => return Err(ApiError::Game(GameError::UnknownPlayer)),
        Ok(Ok(Some(attrs))) => attrs,
    };

    let (event, view) = {
        let mut session = entry.session.lock().await;
        let event = session.apply_guess(
            &ticket,
            &payload.player,
            payload.slot_group,
            payload.slot_index,
            &payload.footballer,
            &attrs,
        )?;
        let view = SessionView::from(&*session);
        verify_intact(&state, &code, session).await?;
        (event, view)
    };

    tracing::info!(
        code = %code,
        player = %payload.player,
        footballer = %payload.footballer,
        "guess accepted"
    );
    entry.hub.broadcast(&ServerMessage::State(view.clone()));
    entry.hub.broadcast(&ServerMessage::Event(event));
    Ok(Json(view))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((code, player)): Path<(String, String)>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, code, player))
}

async fn handle_socket(socket: WebSocket, state: AppState, code: String, player: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some(entry) = state.registry.get(&code).await else {
        let _ = sender.send(Message::Text("unknown session".into())).await;
        return;
    };
    let (handle, mut rx) = match entry.hub.register(&player) {
        Ok(registered) => registered,
        Err(_) => {
            let _ = sender.send(Message::Text("unknown player".into())).await;
            return;
        }
    };

    // Initial snapshot so a fresh connection can render immediately.
    let snapshot = {
        let session = entry.session.lock().await;
        ServerMessage::State(SessionView::from(&*session))
    };
    if sender
        .send(Message::Text(serde_json::to_string(&snapshot).unwrap()))
        .await
        .is_err()
    {
        entry.hub.unregister(&handle);
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender
                .send(Message::Text(serde_json::to_string(&msg).unwrap()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Actions arrive over HTTP; the socket is receive-only until close.
    let mut recv_task = tokio::spawn(async move { while let Some(Ok(_)) = receiver.next().await {} });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    entry.hub.unregister(&handle);
    tracing::debug!(code = %code, player = %player, "connection closed");
}
