//! HTTP request handlers

use super::sse::snapshot_stream;
use super::types::{
    ErrorResponse, ExecuteFunctionCallRequest, SendMessageRequest, SessionView, SettingsRequest,
    SuccessResponse, ThreadListResponse, TokenRequest, TokenStatusResponse,
};
use super::AppState;
use crate::browser::PageInfo;
use crate::provider::ProviderKind;
use crate::runtime::SessionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Current conversation
        .route("/api/session", get(get_session))
        .route("/api/session/stream", get(stream_session))
        // User actions
        .route("/api/session/messages", post(send_message))
        .route("/api/session/stop", post(stop))
        .route(
            "/api/session/function-calls/execute",
            post(execute_function_call),
        )
        .route("/api/session/settings", put(update_settings))
        // Threads
        .route("/api/threads", get(list_threads))
        .route("/api/threads/new", post(new_thread))
        .route("/api/threads/:id/select", post(select_thread))
        // Browser
        .route("/api/page-info", get(get_page_info))
        .route("/api/open-settings", post(open_settings))
        // Provider tokens
        .route("/api/tokens/:provider", get(get_token_status).put(set_token))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Session
// ============================================================

async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(SessionView::from(state.session.snapshot().as_ref()))
}

async fn stream_session(State(state): State<AppState>) -> impl IntoResponse {
    snapshot_stream(state.session.subscribe())
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.session.send_message(req.text).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn stop(State(state): State<AppState>) -> Result<Json<SuccessResponse>, AppError> {
    state.session.stop().await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn execute_function_call(
    State(state): State<AppState>,
    Json(req): Json<ExecuteFunctionCallRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .session
        .execute_function_call(req.message_id, req.content_id)
        .await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<SessionView>, AppError> {
    state.session.set_auto_execute(req.auto_execute).await?;
    Ok(Json(SessionView::from(state.session.snapshot().as_ref())))
}

// ============================================================
// Threads
// ============================================================

async fn list_threads(
    State(state): State<AppState>,
) -> Result<Json<ThreadListResponse>, AppError> {
    let threads = state.store.get_threads().await.map_err(AppError::Internal)?;
    Ok(Json(ThreadListResponse { threads }))
}

async fn new_thread(State(state): State<AppState>) -> Result<Json<SessionView>, AppError> {
    state.session.new_thread().await?;
    Ok(Json(SessionView::from(state.session.snapshot().as_ref())))
}

async fn select_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    state.session.select_thread(id).await?;
    Ok(Json(SessionView::from(state.session.snapshot().as_ref())))
}

// ============================================================
// Browser
// ============================================================

async fn get_page_info(State(state): State<AppState>) -> Json<PageInfo> {
    let info = state.browser.subscribe_page_info().borrow().clone();
    Json(info)
}

async fn open_settings(State(state): State<AppState>) -> Result<Json<SuccessResponse>, AppError> {
    state
        .browser
        .open_extension_settings()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(SuccessResponse::ok()))
}

// ============================================================
// Provider Tokens
// ============================================================

fn parse_provider(name: &str) -> Result<ProviderKind, AppError> {
    ProviderKind::parse(name).ok_or_else(|| AppError::NotFound(format!("Unknown provider: {name}")))
}

async fn get_token_status(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Json<TokenStatusResponse>, AppError> {
    let provider = parse_provider(&provider)?;
    let token = state
        .tokens
        .get_token(provider.as_str())
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(TokenStatusResponse {
        provider: provider.as_str().to_string(),
        has_token: token.is_some_and(|t| !t.is_empty()),
    }))
}

async fn set_token(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenStatusResponse>, AppError> {
    let provider = parse_provider(&provider)?;
    let token = req.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("Token is empty".to_string()));
    }
    state
        .tokens
        .set_token(provider.as_str(), token)
        .await
        .map_err(AppError::Internal)?;
    tracing::info!(provider = provider.as_str(), "Stored provider token");
    Ok(Json(TokenStatusResponse {
        provider: provider.as_str().to_string(),
        has_token: true,
    }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("pagechat ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::EmptyMessage => AppError::BadRequest(e.to_string()),
            SessionError::ThreadNotFound(_) => AppError::NotFound(e.to_string()),
            SessionError::Transition(_) => AppError::Conflict(e.to_string()),
            SessionError::Storage(_) | SessionError::Closed => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
