use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::info;

use crate::models::chat::*;
use crate::services::ConversationManager;
use crate::utils::error::ApiError;

pub async fn chat_handler(
    State(manager): State<Arc<ConversationManager>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let message = request
        .message
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing field: message".to_string()))?;

    let conversation = ConversationRef::new(request.user_id, request.conversation_id);

    info!(
        "Chat request: user={}, conversation={}, message_len={}, language={:?}, persona={:?}",
        conversation.user_id,
        conversation.conversation_id,
        message.len(),
        request.language,
        request.persona
    );

    let response = manager
        .converse(
            &message,
            &conversation.external_id(),
            request.language.as_deref(),
            request.persona.as_deref(),
        )
        .await;

    Ok(Json(ChatResponse {
        response,
        user_id: conversation.user_id,
        conversation_id: conversation.conversation_id,
    }))
}

pub async fn history_handler(
    State(manager): State<Arc<ConversationManager>>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let conversation = ConversationRef::new(query.user_id, query.conversation_id);
    let history = manager.history(&conversation.external_id()).await;

    info!(
        "History request: user={}, conversation={}, turns={}",
        conversation.user_id,
        conversation.conversation_id,
        history.len()
    );

    Json(HistoryResponse {
        history,
        user_id: conversation.user_id,
        conversation_id: conversation.conversation_id,
    })
}

/// Body is optional here; an empty body means the default conversation.
pub async fn clear_history_handler(
    State(manager): State<Arc<ConversationManager>>,
    body: Bytes,
) -> Result<Json<ClearHistoryResponse>, ApiError> {
    let request: ClearHistoryRequest = parse_optional_json(&body)?;
    let conversation = ConversationRef::new(request.user_id, request.conversation_id);

    let session = manager.reset(&conversation.external_id()).await;
    info!(
        "History cleared: user={}, conversation={}, new thread={}, tracked ids={}",
        conversation.user_id,
        conversation.conversation_id,
        session,
        manager.active_threads()
    );

    Ok(Json(ClearHistoryResponse {
        status: "ok".to_string(),
        message: "History cleared".to_string(),
        user_id: conversation.user_id,
        conversation_id: conversation.conversation_id,
    }))
}

fn parse_optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))
}
