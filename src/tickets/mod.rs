pub mod error;
pub mod lifecycle;
pub mod service;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::models::{Ticket, TicketHistory};
use crate::shared::state::AppState;
use crate::store::TicketFilter;

pub use error::TicketError;
pub use service::{AssignRequest, CreateTicketRequest, ProcessResult, TicketService, UpdateTicketRequest};

#[derive(Debug, Serialize)]
pub struct CreateTicketResponse {
    pub ticket_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct AcceptRequest {
    pub agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub ticket_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ticket: Ticket,
    pub processing: Option<ProcessResult>,
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<CreateTicketResponse>), TicketError> {
    let ticket = state.tickets.create(req).await?;
    Ok((StatusCode::CREATED, Json(CreateTicketResponse { ticket_id: ticket.id })))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<TicketFilter>,
) -> Result<Json<Vec<Ticket>>, TicketError> {
    Ok(Json(state.tickets.list(&filter).await?))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(state.tickets.get(id).await?))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(state.tickets.update(id, req).await?))
}

pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, TicketError> {
    state.tickets.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn accept_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<AcceptRequest>>,
) -> Result<Json<Ticket>, TicketError> {
    let agent = body.and_then(|Json(req)| req.agent);
    Ok(Json(state.tickets.accept(id, agent).await?))
}

pub async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(state.tickets.assign(id, req).await?))
}

pub async fn complete_remote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(state.tickets.complete_remote(id).await?))
}

pub async fn request_on_site(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(state.tickets.request_on_site(id).await?))
}

pub async fn close_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(state.tickets.close(id).await?))
}

pub async fn ticket_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TicketHistory>>, TicketError> {
    Ok(Json(state.tickets.history(id).await?))
}

pub async fn process_with_ai(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessResult>, TicketError> {
    Ok(Json(state.tickets.process_with_ai(req.ticket_id).await?))
}

/// Create followed by AI processing. The ticket is kept even if processing fails.
pub async fn ingest_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), TicketError> {
    let ticket = state.tickets.create(req).await?;
    let processing = match state.tickets.process_with_ai(ticket.id).await {
        Ok(result) => Some(result),
        Err(e) => {
            warn!("[TICKETS] ingest processing for {} failed: {}", ticket.id, e);
            None
        }
    };
    let ticket = state.tickets.get(ticket.id).await.unwrap_or(ticket);
    Ok((StatusCode::CREATED, Json(IngestResponse { ticket, processing })))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route(
            "/api/tickets/:id",
            get(get_ticket).patch(update_ticket).delete(delete_ticket),
        )
        .route("/api/tickets/:id/accept", post(accept_ticket))
        .route("/api/tickets/:id/assign", post(assign_ticket))
        .route("/api/tickets/:id/complete_remote", post(complete_remote))
        .route("/api/tickets/:id/request_on_site", post(request_on_site))
        .route("/api/tickets/:id/close", post(close_ticket))
        .route("/api/tickets/:id/history", get(ticket_history))
        .route("/api/ai/process", post(process_with_ai))
        .route("/api/ingest", post(ingest_ticket))
}
