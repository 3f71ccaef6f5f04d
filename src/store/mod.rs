pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::shared::models::{
    ClassificationFeedback, Department, Interaction, ResponseTime, RoutingError, Ticket,
    TicketHistory, TicketMessage, TicketStatus,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => Self::NotFound("record not found".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for StoreError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Connection(e.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketFilter {
    pub department_id: Option<Uuid>,
    pub status: Option<TicketStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TicketFilter {
    pub const MAX_LIMIT: i64 = 100;
    pub const DEFAULT_LIMIT: i64 = 50;

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Everything the metrics aggregation reads for one window.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub tickets: Vec<Ticket>,
    pub interactions: Vec<Interaction>,
    pub feedback: Vec<ClassificationFeedback>,
    pub routing_errors: Vec<RoutingError>,
    pub response_times: Vec<ResponseTime>,
}

#[async_trait]
pub trait SupportStore: Send + Sync {
    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, StoreError>;

    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>, StoreError>;

    /// Inserts the ticket and its opening messages atomically.
    async fn create_ticket(&self, ticket: &Ticket, messages: &[TicketMessage]) -> Result<(), StoreError>;

    async fn get_ticket(&self, id: Uuid) -> Result<Ticket, StoreError>;

    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, StoreError>;

    /// Replaces the row only if its status is still `expected_status`; otherwise `Conflict`.
    async fn update_ticket(&self, ticket: &Ticket, expected_status: TicketStatus) -> Result<(), StoreError>;

    /// Removes the ticket together with its messages and history. Interactions keep
    /// their `ticket_id` as an audit reference.
    async fn delete_ticket(&self, id: Uuid) -> Result<(), StoreError>;

    async fn list_ticket_messages(&self, ticket_id: Uuid) -> Result<Vec<TicketMessage>, StoreError>;

    async fn tickets_past_accept_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError>;

    async fn tickets_past_remote_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError>;

    async fn append_history(&self, entry: &TicketHistory) -> Result<(), StoreError>;

    async fn list_history(&self, ticket_id: Uuid) -> Result<Vec<TicketHistory>, StoreError>;

    async fn insert_interaction(&self, interaction: &Interaction) -> Result<(), StoreError>;

    async fn insert_feedback(&self, feedback: &ClassificationFeedback) -> Result<(), StoreError>;

    async fn insert_routing_error(&self, error: &RoutingError) -> Result<(), StoreError>;

    /// Writes the corrected ticket, the feedback and its routing errors in one
    /// transaction, guarded by `expected_status` like [`SupportStore::update_ticket`].
    async fn record_feedback(
        &self,
        ticket: &Ticket,
        expected_status: TicketStatus,
        feedback: &ClassificationFeedback,
        routing_errors: &[RoutingError],
    ) -> Result<(), StoreError>;

    async fn insert_response_time(&self, sample: &ResponseTime) -> Result<(), StoreError>;

    async fn metrics_snapshot(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MetricsSnapshot, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_limit_is_capped() {
        let filter = TicketFilter {
            limit: Some(500),
            offset: Some(-3),
            ..Default::default()
        };
        assert_eq!(filter.effective_limit(), 100);
        assert_eq!(filter.effective_offset(), 0);
        assert_eq!(TicketFilter::default().effective_limit(), 50);
    }
}
