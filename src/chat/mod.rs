use axum::{extract::State, routing::post, Json, Router};
use log::debug;
use serde::Deserialize;
use std::sync::Arc;

use crate::llm::ChatMessage;
use crate::shared::models::TicketSource;
use crate::shared::state::AppState;
use crate::triage::{ContactInfo, TriageError, TriageOutcome, TriageRequest};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    /// Explicit history wins over the stored session.
    pub history: Option<Vec<ChatMessage>>,
    pub session_id: Option<String>,
    pub source: Option<TicketSource>,
    pub contact: Option<ContactInfo>,
}

/// Runs one chat turn through triage and remembers it in the session store.
pub async fn handle_chat(state: &AppState, req: ChatRequest) -> Result<TriageOutcome, TriageError> {
    let history = match (&req.history, &req.session_id) {
        (Some(history), _) => history.clone(),
        (None, Some(session_id)) => state.sessions.history(session_id).await,
        (None, None) => Vec::new(),
    };
    debug!(
        "[CHAT] session={:?} history_turns={}",
        req.session_id,
        history.len()
    );

    let outcome = state
        .triage
        .triage(TriageRequest {
            message: req.message.clone(),
            history,
            session_id: req.session_id.clone(),
            source: req.source.unwrap_or(TicketSource::Chat),
            contact: req.contact,
        })
        .await?;

    if let Some(session_id) = &req.session_id {
        state
            .sessions
            .record_exchange(session_id, req.message.trim(), &outcome.response)
            .await;
    }
    Ok(outcome)
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<TriageOutcome>, TriageError> {
    Ok(Json(handle_chat(&state, req).await?))
}

pub fn configure_chat_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/chat", post(chat))
}
