//! HTTP request handlers

use super::types::{
    ChatRequest, ChatResponse, ConversationStatus, ErrorResponse, KindsResponse, RemoveResponse,
    UsageResponse,
};
use super::AppState;
use crate::session::{SessionError, SessionKey};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Conversations
        .route(
            "/api/conversations/:tenant_id/:conversation_id",
            get(get_conversation)
                .post(send_message)
                .delete(end_conversation),
        )
        // Introspection
        .route("/api/kinds", get(list_kinds))
        .route("/api/usage", get(get_usage))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Conversations
// ============================================================

async fn send_message(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(i64, i64)>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.task.trim().is_empty() {
        return Err(AppError::BadRequest("task must not be empty".to_string()));
    }

    let reply = state
        .manager
        .start_or_continue_conversation(
            tenant_id,
            conversation_id,
            &req.task,
            req.kind.as_deref(),
            &req.params,
        )
        .await?;

    Ok(Json(ChatResponse {
        session_name: reply.session_name,
        last_message: reply.last_message,
        state: reply.state,
    }))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(i64, i64)>,
) -> Result<Json<ConversationStatus>, AppError> {
    let key = SessionKey::new(tenant_id, conversation_id);
    let handle = state
        .manager
        .get(key)
        .ok_or_else(|| AppError::NotFound(format!("No live conversation {key}")))?;
    let Ok(session) = handle.try_lock() else {
        return Err(SessionError::SessionBusy {
            session: key.session_name(),
        }
        .into());
    };
    let awaiting_approval = session.context().lock().await.has_pending_approval();

    Ok(Json(ConversationStatus {
        session_name: session.name(),
        kind: session.kind().to_string(),
        state: session.state(),
        participants: session
            .participants()
            .iter()
            .filter(|p| p.speaks())
            .map(|p| p.role().to_string())
            .collect(),
        tools: session
            .dispatcher()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        max_round: session.max_round(),
        messages: session.transcript().len(),
        counters: session.counters(),
        awaiting_approval,
    }))
}

async fn end_conversation(
    State(state): State<AppState>,
    Path((tenant_id, conversation_id)): Path<(i64, i64)>,
) -> Json<RemoveResponse> {
    let removed = state
        .manager
        .pop(SessionKey::new(tenant_id, conversation_id))
        .is_some();
    Json(RemoveResponse { removed })
}

// ============================================================
// Introspection
// ============================================================

async fn list_kinds(State(state): State<AppState>) -> Json<KindsResponse> {
    Json(KindsResponse {
        kinds: state.manager.kind_names(),
    })
}

async fn get_usage(State(state): State<AppState>) -> Json<UsageResponse> {
    Json(UsageResponse {
        requests: state.usage.requests(),
        failures: state.usage.failures(),
        input_tokens: state.usage.input_tokens(),
        output_tokens: state.usage.output_tokens(),
    })
}

async fn get_version() -> &'static str {
    concat!("campaign-crew ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::UnknownKind { .. } => AppError::BadRequest(message),
            SessionError::SessionBusy { .. } | SessionError::DuplicateSession { .. } => {
                AppError::Conflict(message)
            }
            SessionError::TransientServiceError { .. } => AppError::Unavailable(message),
            _ => {
                tracing::error!(error = %message, "Conversation failed");
                AppError::Internal(message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
