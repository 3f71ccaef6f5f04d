use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{MetricsSnapshot, StoreError, SupportStore, TicketFilter};
use crate::shared::models::{
    ClassificationFeedback, Department, Interaction, ResponseTime, RoutingError, Ticket,
    TicketHistory, TicketMessage, TicketStatus,
};

#[derive(Default)]
struct Tables {
    departments: Vec<Department>,
    tickets: HashMap<Uuid, Ticket>,
    messages: Vec<TicketMessage>,
    history: Vec<TicketHistory>,
    interactions: Vec<Interaction>,
    feedback: Vec<ClassificationFeedback>,
    routing_errors: Vec<RoutingError>,
    response_times: Vec<ResponseTime>,
}

/// In-process store used by tests and local runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_departments(departments: Vec<Department>) -> Self {
        Self {
            tables: RwLock::new(Tables {
                departments,
                ..Default::default()
            }),
        }
    }

    pub async fn interactions(&self) -> Vec<Interaction> {
        self.tables.read().await.interactions.clone()
    }

    pub async fn routing_errors(&self) -> Vec<RoutingError> {
        self.tables.read().await.routing_errors.clone()
    }

    pub async fn response_times(&self) -> Vec<ResponseTime> {
        self.tables.read().await.response_times.clone()
    }

    pub async fn feedback(&self) -> Vec<ClassificationFeedback> {
        self.tables.read().await.feedback.clone()
    }

    pub async fn tickets(&self) -> Vec<Ticket> {
        self.tables.read().await.tickets.values().cloned().collect()
    }
}

fn replace_ticket(tables: &mut Tables, ticket: &Ticket, expected_status: TicketStatus) -> Result<(), StoreError> {
    let current = tables
        .tickets
        .get_mut(&ticket.id)
        .ok_or_else(|| StoreError::NotFound(format!("ticket {}", ticket.id)))?;
    if current.status != expected_status {
        return Err(StoreError::Conflict(format!(
            "ticket {} is {} (expected {})",
            ticket.id, current.status, expected_status
        )));
    }
    *current = ticket.clone();
    Ok(())
}

fn in_window(at: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    at >= from && at <= to
}

#[async_trait]
impl SupportStore for MemoryStore {
    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.departments.iter().find(|d| d.id == id).cloned())
    }

    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .departments
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn create_ticket(&self, ticket: &Ticket, messages: &[TicketMessage]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.tickets.contains_key(&ticket.id) {
            return Err(StoreError::Conflict(format!("ticket {} already exists", ticket.id)));
        }
        tables.tickets.insert(ticket.id, ticket.clone());
        tables.messages.extend(messages.iter().cloned());
        Ok(())
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Ticket, StoreError> {
        let tables = self.tables.read().await;
        tables
            .tickets
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", id)))
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.read().await;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| filter.department_id.map_or(true, |d| t.department_id == Some(d)))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets
            .into_iter()
            .skip(filter.effective_offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect())
    }

    async fn update_ticket(&self, ticket: &Ticket, expected_status: TicketStatus) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        replace_ticket(&mut tables, ticket, expected_status)
    }

    async fn delete_ticket(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.tickets.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("ticket {}", id)));
        }
        tables.messages.retain(|m| m.ticket_id != id);
        tables.history.retain(|h| h.ticket_id != id);
        Ok(())
    }

    async fn list_ticket_messages(&self, ticket_id: Uuid) -> Result<Vec<TicketMessage>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn tickets_past_accept_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tickets
            .values()
            .filter(|t| t.status == TicketStatus::New)
            .filter(|t| t.sla_accept_deadline.map_or(false, |d| d <= now))
            .cloned()
            .collect())
    }

    async fn tickets_past_remote_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tickets
            .values()
            .filter(|t| matches!(t.status, TicketStatus::Accepted | TicketStatus::InProgress))
            .filter(|t| t.sla_remote_deadline.map_or(false, |d| d <= now))
            .cloned()
            .collect())
    }

    async fn append_history(&self, entry: &TicketHistory) -> Result<(), StoreError> {
        self.tables.write().await.history.push(entry.clone());
        Ok(())
    }

    async fn list_history(&self, ticket_id: Uuid) -> Result<Vec<TicketHistory>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .filter(|h| h.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn insert_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        self.tables.write().await.interactions.push(interaction.clone());
        Ok(())
    }

    async fn insert_feedback(&self, feedback: &ClassificationFeedback) -> Result<(), StoreError> {
        self.tables.write().await.feedback.push(feedback.clone());
        Ok(())
    }

    async fn insert_routing_error(&self, error: &RoutingError) -> Result<(), StoreError> {
        self.tables.write().await.routing_errors.push(error.clone());
        Ok(())
    }

    async fn record_feedback(
        &self,
        ticket: &Ticket,
        expected_status: TicketStatus,
        feedback: &ClassificationFeedback,
        routing_errors: &[RoutingError],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        replace_ticket(&mut tables, ticket, expected_status)?;
        tables.feedback.push(feedback.clone());
        tables.routing_errors.extend(routing_errors.iter().cloned());
        Ok(())
    }

    async fn insert_response_time(&self, sample: &ResponseTime) -> Result<(), StoreError> {
        self.tables.write().await.response_times.push(sample.clone());
        Ok(())
    }

    async fn metrics_snapshot(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MetricsSnapshot, StoreError> {
        let tables = self.tables.read().await;
        Ok(MetricsSnapshot {
            tickets: tables
                .tickets
                .values()
                .filter(|t| in_window(t.created_at, from, to))
                .cloned()
                .collect(),
            interactions: tables
                .interactions
                .iter()
                .filter(|i| in_window(i.created_at, from, to))
                .cloned()
                .collect(),
            feedback: tables
                .feedback
                .iter()
                .filter(|f| in_window(f.created_at, from, to))
                .cloned()
                .collect(),
            routing_errors: tables
                .routing_errors
                .iter()
                .filter(|e| in_window(e.created_at, from, to))
                .cloned()
                .collect(),
            response_times: tables
                .response_times
                .iter()
                .filter(|r| in_window(r.created_at, from, to))
                .cloned()
                .collect(),
        })
    }
}
