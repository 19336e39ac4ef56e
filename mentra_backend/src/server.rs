use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::activities::{
    ActivityOutcome, ActivityService, Dashboard, MoodLog, NewSchedule, NewTask, PomodoroStats,
    ScheduleUpdate, StartSession, TaskQuery, TaskUpdate,
};
use crate::assistant::{ChatExchange, ChatService, DEFAULT_HISTORY_PAGE_LIMIT};
use crate::config::AuthMode;
use crate::database::MentraDatabase;
use crate::error::{domain_error, DomainError};
use crate::events::AppEvent;
use crate::models::{
    ChatMessage, ExpLogEntry, MoodEntry, PomodoroSession, Schedule, Streak, Task, User,
};
use crate::progress::{ProgressService, DEFAULT_EXP_HISTORY_LIMIT};
use crate::runtime::BackendRuntime;

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
pub struct ServerState {
    pub db: Arc<MentraDatabase>,
    pub activities: ActivityService,
    pub progress: ProgressService,
    pub chat: ChatService,
    pub auth_mode: AuthMode,
    pub ws_events: broadcast::Sender<ApiEventEnvelope>,
}

/// The user a request acts for, set by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[derive(Debug, Clone, Serialize)]
pub struct ApiEventEnvelope {
    pub event_type: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    #[serde(skip)]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    user: User,
    api_token: String,
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    #[serde(flatten)]
    user: User,
    exp_to_next_level: i64,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ScheduleQuery {
    #[serde(rename = "type")]
    schedule_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    deleted: bool,
}

#[derive(Debug, Serialize)]
struct ClearedResponse {
    message: &'static str,
    removed: usize,
}

pub async fn serve_backend(
    runtime: BackendRuntime,
    event_rx: flume::Receiver<AppEvent>,
) -> Result<()> {
    let bind_addr = runtime
        .config
        .bind_addr
        .parse::<SocketAddr>()
        .with_context(|| {
            format!(
                "Invalid bind_addr '{}' (expected host:port)",
                runtime.config.bind_addr
            )
        })?;

    if runtime.config.auth_mode == AuthMode::Disabled {
        runtime
            .db
            .ensure_local_user()
            .context("Failed to create the local user")?;
        tracing::warn!("Auth mode is disabled; all API routes act as the local user");
    }

    let (ws_events, _) = broadcast::channel(512);
    let state = Arc::new(ServerState {
        db: runtime.db.clone(),
        activities: runtime.activities.clone(),
        progress: runtime.progress.clone(),
        chat: runtime.chat.clone(),
        auth_mode: runtime.config.auth_mode,
        ws_events: ws_events.clone(),
    });

    spawn_event_bridge(event_rx, ws_events);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind backend server to {}", bind_addr))?;
    tracing::info!("Mentra backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Backend server failed")?;
    Ok(())
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/users", post(register_user))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/me", get(me))
        .route("/dashboard", get(dashboard))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/:id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/tasks/:id/complete", post(complete_task))
        .route("/tasks/:id/uncomplete", post(uncomplete_task))
        .route("/pomodoro", get(list_sessions))
        .route("/pomodoro/start", post(start_session))
        .route("/pomodoro/stats", get(pomodoro_stats))
        .route("/pomodoro/:id/pause", post(pause_session))
        .route("/pomodoro/:id/resume", post(resume_session))
        .route("/pomodoro/:id/complete", post(complete_session))
        .route("/pomodoro/:id/cancel", post(cancel_session))
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/schedules/:id",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/schedules/:id/complete", post(complete_schedule))
        .route("/schedules/:id/uncomplete", post(uncomplete_schedule))
        .route("/moods", get(list_moods).post(log_mood))
        .route("/moods/today", get(today_mood))
        .route("/moods/weekly", get(weekly_moods))
        .route("/moods/:id", get(get_mood))
        .route("/exp/history", get(exp_history))
        .route("/streak", get(streak))
        .route("/chat", post(send_chat))
        .route("/chat/history", get(chat_history).delete(clear_chat_history))
        .route("/ws/events", get(ws_events_route))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new().nest("/v1", public.merge(protected))
}

fn spawn_event_bridge(
    event_rx: flume::Receiver<AppEvent>,
    ws_events: broadcast::Sender<ApiEventEnvelope>,
) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            let _ = ws_events.send(map_app_event(&event));
        }
    });
}

fn map_app_event(event: &AppEvent) -> ApiEventEnvelope {
    ApiEventEnvelope {
        event_type: event.event_type().to_string(),
        emitted_at: Utc::now(),
        payload: event.payload(),
        user_id: event.user_id().to_string(),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    mut request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user = resolve_user(&state, &headers)?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

fn resolve_user(state: &ServerState, headers: &HeaderMap) -> Result<User, StatusCode> {
    if state.auth_mode == AuthMode::Disabled {
        return state.db.ensure_local_user().map_err(|error| {
            tracing::error!("Failed to load the local user: {:#}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        });
    }

    let token = bearer_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    match state.db.get_user_by_token(token) {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(StatusCode::UNAUTHORIZED),
        Err(error) => {
            tracing::error!("Token lookup failed: {:#}", error);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw.trim().strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn register_user(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() || name.chars().count() > 255 {
        return Err(api_error(
            DomainError::invalid("name", "must be 1 to 255 characters").into(),
        ));
    }
    let user = state.db.create_user(name).map_err(api_error)?;
    tracing::info!("Registered user {}", user.id);
    let api_token = user.api_token.clone();
    Ok((StatusCode::CREATED, Json(RegisterResponse { user, api_token })))
}

async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<ProfileResponse> {
    let exp_to_next_level = user.progress.exp_to_next_level();
    Json(ProfileResponse {
        user,
        exp_to_next_level,
    })
}

async fn dashboard(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Dashboard> {
    state.activities.dashboard(&user.id).map(Json).map_err(api_error)
}

// ----------------------------------------------------------------------------
// Tasks
// ----------------------------------------------------------------------------

async fn list_tasks(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Vec<Task>> {
    state
        .activities
        .list_tasks(&user.id, &query)
        .map(Json)
        .map_err(api_error)
}

async fn create_task(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = state
        .activities
        .create_task(&user.id, body)
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<String>,
) -> ApiResult<Task> {
    state
        .activities
        .get_task(&user.id, &task_id)
        .map(Json)
        .map_err(api_error)
}

async fn update_task(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<String>,
    Json(body): Json<TaskUpdate>,
) -> ApiResult<Task> {
    state
        .activities
        .update_task(&user.id, &task_id, body)
        .map(Json)
        .map_err(api_error)
}

async fn delete_task(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<String>,
) -> ApiResult<DeletedResponse> {
    state
        .activities
        .delete_task(&user.id, &task_id)
        .map_err(api_error)?;
    Ok(Json(DeletedResponse { deleted: true }))
}

async fn complete_task(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<String>,
) -> ApiResult<ActivityOutcome<Task>> {
    state
        .activities
        .complete_task(&user.id, &task_id)
        .map(Json)
        .map_err(api_error)
}

async fn uncomplete_task(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<String>,
) -> ApiResult<ActivityOutcome<Task>> {
    state
        .activities
        .uncomplete_task(&user.id, &task_id)
        .map(Json)
        .map_err(api_error)
}

// ----------------------------------------------------------------------------
// Pomodoro
// ----------------------------------------------------------------------------

async fn list_sessions(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<PomodoroSession>> {
    state
        .activities
        .list_sessions(&user.id, query.limit)
        .map(Json)
        .map_err(api_error)
}

async fn start_session(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    body: Option<Json<StartSession>>,
) -> Result<(StatusCode, Json<PomodoroSession>), ApiError> {
    let input = body.map(|Json(input)| input).unwrap_or_default();
    let session = state
        .activities
        .start_session(&user.id, input)
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn pomodoro_stats(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<PomodoroStats> {
    state
        .activities
        .pomodoro_stats(&user.id)
        .map(Json)
        .map_err(api_error)
}

async fn pause_session(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(session_id): Path<String>,
) -> ApiResult<PomodoroSession> {
    state
        .activities
        .pause_session(&user.id, &session_id)
        .map(Json)
        .map_err(api_error)
}

async fn resume_session(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(session_id): Path<String>,
) -> ApiResult<PomodoroSession> {
    state
        .activities
        .resume_session(&user.id, &session_id)
        .map(Json)
        .map_err(api_error)
}

async fn complete_session(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(session_id): Path<String>,
) -> ApiResult<ActivityOutcome<PomodoroSession>> {
    state
        .activities
        .complete_session(&user.id, &session_id)
        .map(Json)
        .map_err(api_error)
}

async fn cancel_session(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(session_id): Path<String>,
) -> ApiResult<PomodoroSession> {
    state
        .activities
        .cancel_session(&user.id, &session_id)
        .map(Json)
        .map_err(api_error)
}

// ----------------------------------------------------------------------------
// Schedules
// ----------------------------------------------------------------------------

async fn list_schedules(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<ScheduleQuery>,
) -> ApiResult<Vec<Schedule>> {
    state
        .activities
        .list_schedules(&user.id, query.schedule_type.as_deref())
        .map(Json)
        .map_err(api_error)
}

async fn create_schedule(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<NewSchedule>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    let schedule = state
        .activities
        .create_schedule(&user.id, body)
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn get_schedule(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(schedule_id): Path<String>,
) -> ApiResult<Schedule> {
    state
        .activities
        .get_schedule(&user.id, &schedule_id)
        .map(Json)
        .map_err(api_error)
}

async fn update_schedule(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(schedule_id): Path<String>,
    Json(body): Json<ScheduleUpdate>,
) -> ApiResult<Schedule> {
    state
        .activities
        .update_schedule(&user.id, &schedule_id, body)
        .map(Json)
        .map_err(api_error)
}

async fn delete_schedule(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(schedule_id): Path<String>,
) -> ApiResult<DeletedResponse> {
    state
        .activities
        .delete_schedule(&user.id, &schedule_id)
        .map_err(api_error)?;
    Ok(Json(DeletedResponse { deleted: true }))
}

async fn complete_schedule(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(schedule_id): Path<String>,
) -> ApiResult<ActivityOutcome<Schedule>> {
    state
        .activities
        .complete_schedule(&user.id, &schedule_id)
        .map(Json)
        .map_err(api_error)
}

async fn uncomplete_schedule(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(schedule_id): Path<String>,
) -> ApiResult<ActivityOutcome<Schedule>> {
    state
        .activities
        .uncomplete_schedule(&user.id, &schedule_id)
        .map(Json)
        .map_err(api_error)
}

// ----------------------------------------------------------------------------
// Moods, progress
// ----------------------------------------------------------------------------

async fn list_moods(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<MoodEntry>> {
    state
        .activities
        .list_moods(&user.id, query.limit)
        .map(Json)
        .map_err(api_error)
}

async fn log_mood(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<MoodLog>,
) -> ApiResult<MoodEntry> {
    state
        .activities
        .log_mood(&user.id, body)
        .map(Json)
        .map_err(api_error)
}

async fn today_mood(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Option<MoodEntry>> {
    state
        .activities
        .today_mood(&user.id)
        .map(Json)
        .map_err(api_error)
}

async fn get_mood(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(mood_id): Path<String>,
) -> ApiResult<MoodEntry> {
    state
        .activities
        .get_mood(&user.id, &mood_id)
        .map(Json)
        .map_err(api_error)
}

async fn weekly_moods(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Vec<MoodEntry>> {
    state
        .activities
        .weekly_moods(&user.id)
        .map(Json)
        .map_err(api_error)
}

async fn exp_history(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<ExpLogEntry>> {
    let limit = clamp_limit(query.limit, DEFAULT_EXP_HISTORY_LIMIT, 1, 200);
    state
        .progress
        .exp_history(&user.id, limit)
        .map(Json)
        .map_err(api_error)
}

async fn streak(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Streak> {
    state.progress.streak(&user.id).map(Json).map_err(api_error)
}

// ----------------------------------------------------------------------------
// Chat
// ----------------------------------------------------------------------------

async fn send_chat(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<ChatExchange> {
    state
        .chat
        .chat(&user.id, &body.message)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn chat_history(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<ChatMessage>> {
    let limit = clamp_limit(query.limit, DEFAULT_HISTORY_PAGE_LIMIT, 1, 500);
    state
        .chat
        .history(&user.id, limit)
        .map(Json)
        .map_err(api_error)
}

async fn clear_chat_history(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<ClearedResponse> {
    let removed = state.chat.clear_history(&user.id).map_err(api_error)?;
    Ok(Json(ClearedResponse {
        message: "Chat history cleared.",
        removed,
    }))
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

async fn ws_events_route(
    State(state): State<Arc<ServerState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_socket(state, user.id, socket))
}

async fn handle_events_socket(state: Arc<ServerState>, user_id: String, mut socket: WebSocket) {
    let mut rx = state.ws_events.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if event.user_id != user_id {
                            continue;
                        }
                        let payload = match serde_json::to_string(&event) {
                            Ok(serialized) => serialized,
                            Err(error) => {
                                tracing::warn!("Failed to serialize websocket event: {}", error);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Websocket subscriber lagged by {} event(s)", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

fn clamp_limit(value: Option<usize>, default: usize, min: usize, max: usize) -> usize {
    value.unwrap_or(default).clamp(min, max)
}

/// Maps domain failures onto status codes; anything else is a 500.
fn api_error(error: anyhow::Error) -> ApiError {
    match domain_error(&error) {
        Some(domain) if domain.is_validation() => (StatusCode::BAD_REQUEST, domain.to_string()),
        Some(domain @ DomainError::NotFound { .. }) => (StatusCode::NOT_FOUND, domain.to_string()),
        Some(DomainError::Conflict(message)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, message.clone())
        }
        _ => internal_error(error),
    }
}

fn internal_error(error: anyhow::Error) -> ApiError {
    tracing::error!("Request failed: {:#}", error);
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExpSource, UserProgress};
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_extracts_the_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer token-123"),
        );
        assert_eq!(bearer_token(&headers), Some("token-123"));
    }

    #[test]
    fn bearer_token_rejects_missing_or_malformed_headers() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn domain_errors_map_to_status_codes() {
        let (status, _) = api_error(DomainError::invalid("title", "must not be empty").into());
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = api_error(DomainError::NonPositiveAmount { amount: 0 }.into());
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = api_error(DomainError::not_found("task", "abc").into());
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("abc"));

        let (status, body) = api_error(DomainError::conflict("Task already completed.").into());
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body, "Task already completed.");

        let (status, _) = api_error(anyhow::anyhow!("disk on fire"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn context_wrapped_domain_errors_keep_their_status() {
        let error = anyhow::Error::new(DomainError::not_found("schedule", "s1"))
            .context("loading schedule");
        let (status, _) = api_error(error);
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn map_app_event_includes_event_type_and_timestamp() {
        let envelope = map_app_event(&AppEvent::ExpChanged {
            user_id: "u1".to_string(),
            amount: 10,
            source: ExpSource::Task,
            progress: UserProgress::default(),
            levels_gained: 0,
        });
        assert_eq!(envelope.event_type, "exp_changed");
        assert_eq!(envelope.payload["amount"], 10);
        assert_eq!(envelope.user_id, "u1");
        assert!(envelope.emitted_at <= Utc::now());

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("user_id").is_none());
    }

    #[test]
    fn clamp_limit_applies_default_and_bounds() {
        assert_eq!(clamp_limit(None, 50, 1, 500), 50);
        assert_eq!(clamp_limit(Some(0), 50, 1, 500), 1);
        assert_eq!(clamp_limit(Some(9999), 50, 1, 500), 500);
    }
}
