use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use std::str::FromStr;
use uuid::Uuid;

use super::{MetricsSnapshot, StoreError, SupportStore, TicketFilter};
use crate::shared::models::{
    ClassificationFeedback, Department, Interaction, ResponseTime, RoutingError, Ticket,
    TicketHistory, TicketMessage, TicketStatus,
};
use crate::shared::schema::{
    classification_feedback, departments, interactions, response_times, routing_errors,
    ticket_history, ticket_messages, tickets,
};
use crate::shared::utils::DbPool;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
#[diesel(treat_none_as_null = true)]
struct TicketRow {
    id: Uuid,
    source: String,
    subject: String,
    description: String,
    language: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    department_id: Option<Uuid>,
    priority: String,
    status: String,
    client_type: Option<String>,
    summary: Option<String>,
    assigned_to: Option<String>,
    auto_resolved: bool,
    need_on_site: bool,
    classification_confidence: Option<f64>,
    sla_accept_deadline: Option<DateTime<Utc>>,
    sla_remote_deadline: Option<DateTime<Utc>>,
    first_response_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = departments)]
struct DepartmentRow {
    id: Uuid,
    name: String,
    sla_accept_minutes: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ticket_messages)]
struct MessageRow {
    id: Uuid,
    ticket_id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ticket_history)]
struct HistoryRow {
    id: Uuid,
    ticket_id: Uuid,
    field: String,
    old_value: Option<String>,
    new_value: Option<String>,
    reason: Option<String>,
    changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = interactions)]
struct InteractionRow {
    id: Uuid,
    session_id: Option<String>,
    source: String,
    message: String,
    answer: String,
    confidence: f64,
    max_similarity: f64,
    category: Option<String>,
    ticket_created: bool,
    ticket_id: Option<Uuid>,
    response_time_ms: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = classification_feedback)]
struct FeedbackRow {
    id: Uuid,
    ticket_id: Uuid,
    predicted_category: Option<String>,
    actual_category: Option<String>,
    predicted_department_id: Option<Uuid>,
    actual_department_id: Option<Uuid>,
    predicted_priority: Option<String>,
    actual_priority: Option<String>,
    is_correct: bool,
    comment: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = routing_errors)]
struct RoutingErrorRow {
    id: Uuid,
    ticket_id: Uuid,
    initial_department_id: Option<Uuid>,
    corrected_department_id: Option<Uuid>,
    initial_category: Option<String>,
    corrected_category: Option<String>,
    error_type: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = response_times)]
struct ResponseTimeRow {
    id: Uuid,
    ticket_id: Uuid,
    response_time_seconds: f64,
    response_type: String,
    created_at: DateTime<Utc>,
}

fn parse_column<T>(column: &str, raw: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|e| StoreError::Database(format!("bad value in {}: {}", column, e)))
}

fn parse_optional<T>(column: &str, raw: Option<String>) -> Result<Option<T>, StoreError>
where
    T: FromStr<Err = String>,
{
    raw.map(|v| parse_column(column, &v)).transpose()
}

impl From<&Ticket> for TicketRow {
    fn from(t: &Ticket) -> Self {
        Self {
            id: t.id,
            source: t.source.to_string(),
            subject: t.subject.clone(),
            description: t.description.clone(),
            language: t.language.clone(),
            category: t.category.clone(),
            subcategory: t.subcategory.clone(),
            department_id: t.department_id,
            priority: t.priority.to_string(),
            status: t.status.to_string(),
            client_type: t.client_type.map(|c| c.to_string()),
            summary: t.summary.clone(),
            assigned_to: t.assigned_to.clone(),
            auto_resolved: t.auto_resolved,
            need_on_site: t.need_on_site,
            classification_confidence: t.classification_confidence,
            sla_accept_deadline: t.sla_accept_deadline,
            sla_remote_deadline: t.sla_remote_deadline,
            first_response_at: t.first_response_at,
            closed_at: t.closed_at,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            source: parse_column("tickets.source", &row.source)?,
            subject: row.subject,
            description: row.description,
            language: row.language,
            category: row.category,
            subcategory: row.subcategory,
            department_id: row.department_id,
            priority: parse_column("tickets.priority", &row.priority)?,
            status: parse_column("tickets.status", &row.status)?,
            client_type: parse_optional("tickets.client_type", row.client_type)?,
            summary: row.summary,
            assigned_to: row.assigned_to,
            auto_resolved: row.auto_resolved,
            need_on_site: row.need_on_site,
            classification_confidence: row.classification_confidence,
            sla_accept_deadline: row.sla_accept_deadline,
            sla_remote_deadline: row.sla_remote_deadline,
            first_response_at: row.first_response_at,
            closed_at: row.closed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<DepartmentRow> for Department {
    fn from(row: DepartmentRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            sla_accept_minutes: row.sla_accept_minutes,
        }
    }
}

impl From<&TicketMessage> for MessageRow {
    fn from(m: &TicketMessage) -> Self {
        Self {
            id: m.id,
            ticket_id: m.ticket_id,
            role: m.role.clone(),
            content: m.content.clone(),
            created_at: m.created_at,
        }
    }
}

impl From<MessageRow> for TicketMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            ticket_id: row.ticket_id,
            role: row.role,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

impl From<&TicketHistory> for HistoryRow {
    fn from(h: &TicketHistory) -> Self {
        Self {
            id: h.id,
            ticket_id: h.ticket_id,
            field: h.field.clone(),
            old_value: h.old_value.clone(),
            new_value: h.new_value.clone(),
            reason: h.reason.clone(),
            changed_at: h.changed_at,
        }
    }
}

impl From<HistoryRow> for TicketHistory {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id,
            ticket_id: row.ticket_id,
            field: row.field,
            old_value: row.old_value,
            new_value: row.new_value,
            reason: row.reason,
            changed_at: row.changed_at,
        }
    }
}

impl From<&Interaction> for InteractionRow {
    fn from(i: &Interaction) -> Self {
        Self {
            id: i.id,
            session_id: i.session_id.clone(),
            source: i.source.to_string(),
            message: i.message.clone(),
            answer: i.answer.clone(),
            confidence: i.confidence,
            max_similarity: i.max_similarity,
            category: i.category.clone(),
            ticket_created: i.ticket_created,
            ticket_id: i.ticket_id,
            response_time_ms: i.response_time_ms,
            created_at: i.created_at,
        }
    }
}

impl TryFrom<InteractionRow> for Interaction {
    type Error = StoreError;

    fn try_from(row: InteractionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            source: parse_column("interactions.source", &row.source)?,
            message: row.message,
            answer: row.answer,
            confidence: row.confidence,
            max_similarity: row.max_similarity,
            category: row.category,
            ticket_created: row.ticket_created,
            ticket_id: row.ticket_id,
            response_time_ms: row.response_time_ms,
            created_at: row.created_at,
        })
    }
}

impl From<&ClassificationFeedback> for FeedbackRow {
    fn from(f: &ClassificationFeedback) -> Self {
        Self {
            id: f.id,
            ticket_id: f.ticket_id,
            predicted_category: f.predicted_category.clone(),
            actual_category: f.actual_category.clone(),
            predicted_department_id: f.predicted_department_id,
            actual_department_id: f.actual_department_id,
            predicted_priority: f.predicted_priority.map(|p| p.to_string()),
            actual_priority: f.actual_priority.map(|p| p.to_string()),
            is_correct: f.is_correct,
            comment: f.comment.clone(),
            created_at: f.created_at,
        }
    }
}

impl TryFrom<FeedbackRow> for ClassificationFeedback {
    type Error = StoreError;

    fn try_from(row: FeedbackRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            ticket_id: row.ticket_id,
            predicted_category: row.predicted_category,
            actual_category: row.actual_category,
            predicted_department_id: row.predicted_department_id,
            actual_department_id: row.actual_department_id,
            predicted_priority: parse_optional("feedback.predicted_priority", row.predicted_priority)?,
            actual_priority: parse_optional("feedback.actual_priority", row.actual_priority)?,
            is_correct: row.is_correct,
            comment: row.comment,
            created_at: row.created_at,
        })
    }
}

impl From<&RoutingError> for RoutingErrorRow {
    fn from(e: &RoutingError) -> Self {
        Self {
            id: e.id,
            ticket_id: e.ticket_id,
            initial_department_id: e.initial_department_id,
            corrected_department_id: e.corrected_department_id,
            initial_category: e.initial_category.clone(),
            corrected_category: e.corrected_category.clone(),
            error_type: e.error_type.to_string(),
            created_at: e.created_at,
        }
    }
}

impl TryFrom<RoutingErrorRow> for RoutingError {
    type Error = StoreError;

    fn try_from(row: RoutingErrorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            ticket_id: row.ticket_id,
            initial_department_id: row.initial_department_id,
            corrected_department_id: row.corrected_department_id,
            initial_category: row.initial_category,
            corrected_category: row.corrected_category,
            error_type: parse_column("routing_errors.error_type", &row.error_type)?,
            created_at: row.created_at,
        })
    }
}

impl From<&ResponseTime> for ResponseTimeRow {
    fn from(r: &ResponseTime) -> Self {
        Self {
            id: r.id,
            ticket_id: r.ticket_id,
            response_time_seconds: r.response_time_seconds,
            response_type: r.response_type.to_string(),
            created_at: r.created_at,
        }
    }
}

impl TryFrom<ResponseTimeRow> for ResponseTime {
    type Error = StoreError;

    fn try_from(row: ResponseTimeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            ticket_id: row.ticket_id,
            response_time_seconds: row.response_time_seconds,
            response_type: parse_column("response_times.response_type", &row.response_type)?,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Replaces the ticket row only while its status is still `expected_status`.
fn guarded_update(conn: &mut PgConnection, row: &TicketRow, expected_status: TicketStatus) -> Result<(), StoreError> {
    let updated = diesel::update(
        tickets::table
            .filter(tickets::id.eq(row.id))
            .filter(tickets::status.eq(expected_status.as_str())),
    )
    .set(row)
    .execute(conn)?;
    if updated == 1 {
        return Ok(());
    }
    let current: Option<String> = tickets::table
        .find(row.id)
        .select(tickets::status)
        .first(conn)
        .optional()?;
    match current {
        None => Err(StoreError::NotFound(format!("ticket {}", row.id))),
        Some(status) => Err(StoreError::Conflict(format!(
            "ticket {} is {} (expected {})",
            row.id, status, expected_status
        ))),
    }
}

/// Diesel-backed store. Every call runs on the blocking pool with its own connection.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
    }
}

#[async_trait]
impl SupportStore for PgStore {
    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, StoreError> {
        self.run(move |conn| {
            let row = departments::table
                .find(id)
                .select(DepartmentRow::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(Department::from))
        })
        .await
    }

    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>, StoreError> {
        let name = name.to_string();
        self.run(move |conn| {
            let row = departments::table
                .filter(departments::name.ilike(name))
                .select(DepartmentRow::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(Department::from))
        })
        .await
    }

    async fn create_ticket(&self, ticket: &Ticket, messages: &[TicketMessage]) -> Result<(), StoreError> {
        let row = TicketRow::from(ticket);
        let message_rows: Vec<MessageRow> = messages.iter().map(MessageRow::from).collect();
        self.run(move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::insert_into(tickets::table).values(&row).execute(conn)?;
                if !message_rows.is_empty() {
                    diesel::insert_into(ticket_messages::table)
                        .values(&message_rows)
                        .execute(conn)?;
                }
                Ok(())
            })?;
            Ok(())
        })
        .await
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Ticket, StoreError> {
        self.run(move |conn| {
            let row = tickets::table
                .find(id)
                .select(TicketRow::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("ticket {}", id)))?;
            Ticket::try_from(row)
        })
        .await
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, StoreError> {
        let filter = filter.clone();
        self.run(move |conn| {
            let mut query = tickets::table.into_boxed();
            if let Some(department_id) = filter.department_id {
                query = query.filter(tickets::department_id.eq(department_id));
            }
            if let Some(status) = filter.status {
                query = query.filter(tickets::status.eq(status.as_str()));
            }
            let rows = query
                .order(tickets::created_at.desc())
                .limit(filter.effective_limit())
                .offset(filter.effective_offset())
                .select(TicketRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn update_ticket(&self, ticket: &Ticket, expected_status: TicketStatus) -> Result<(), StoreError> {
        let row = TicketRow::from(ticket);
        self.run(move |conn| guarded_update(conn, &row, expected_status)).await
    }

    async fn delete_ticket(&self, id: Uuid) -> Result<(), StoreError> {
        self.run(move |conn| {
            let deleted = diesel::delete(tickets::table.find(id)).execute(conn)?;
            if deleted == 0 {
                return Err(StoreError::NotFound(format!("ticket {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn list_ticket_messages(&self, ticket_id: Uuid) -> Result<Vec<TicketMessage>, StoreError> {
        self.run(move |conn| {
            let rows = ticket_messages::table
                .filter(ticket_messages::ticket_id.eq(ticket_id))
                .order(ticket_messages::created_at.asc())
                .select(MessageRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(TicketMessage::from).collect())
        })
        .await
    }

    async fn tickets_past_accept_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError> {
        self.run(move |conn| {
            let rows = tickets::table
                .filter(tickets::status.eq(TicketStatus::New.as_str()))
                .filter(tickets::sla_accept_deadline.le(now))
                .select(TicketRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn tickets_past_remote_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError> {
        self.run(move |conn| {
            let rows = tickets::table
                .filter(tickets::status.eq_any([
                    TicketStatus::Accepted.as_str(),
                    TicketStatus::InProgress.as_str(),
                ]))
                .filter(tickets::sla_remote_deadline.le(now))
                .select(TicketRow::as_select())
                .load(conn)?;
            convert_all(rows)
        })
        .await
    }

    async fn append_history(&self, entry: &TicketHistory) -> Result<(), StoreError> {
        let row = HistoryRow::from(entry);
        self.run(move |conn| {
            diesel::insert_into(ticket_history::table).values(&row).execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn list_history(&self, ticket_id: Uuid) -> Result<Vec<TicketHistory>, StoreError> {
        self.run(move |conn| {
            let rows = ticket_history::table
                .filter(ticket_history::ticket_id.eq(ticket_id))
                .order(ticket_history::changed_at.asc())
                .select(HistoryRow::as_select())
                .load(conn)?;
            Ok(rows.into_iter().map(TicketHistory::from).collect())
        })
        .await
    }

    async fn insert_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        let row = InteractionRow::from(interaction);
        self.run(move |conn| {
            diesel::insert_into(interactions::table).values(&row).execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn insert_feedback(&self, feedback: &ClassificationFeedback) -> Result<(), StoreError> {
        let row = FeedbackRow::from(feedback);
        self.run(move |conn| {
            diesel::insert_into(classification_feedback::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn insert_routing_error(&self, error: &RoutingError) -> Result<(), StoreError> {
        let row = RoutingErrorRow::from(error);
        self.run(move |conn| {
            diesel::insert_into(routing_errors::table).values(&row).execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn record_feedback(
        &self,
        ticket: &Ticket,
        expected_status: TicketStatus,
        feedback: &ClassificationFeedback,
        routing_errors: &[RoutingError],
    ) -> Result<(), StoreError> {
        let row = TicketRow::from(ticket);
        let feedback_row = FeedbackRow::from(feedback);
        let error_rows: Vec<RoutingErrorRow> = routing_errors.iter().map(RoutingErrorRow::from).collect();
        self.run(move |conn| {
            conn.transaction::<_, StoreError, _>(|conn| {
                guarded_update(conn, &row, expected_status)?;
                diesel::insert_into(classification_feedback::table)
                    .values(&feedback_row)
                    .execute(conn)?;
                if !error_rows.is_empty() {
                    diesel::insert_into(routing_errors::table)
                        .values(&error_rows)
                        .execute(conn)?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn insert_response_time(&self, sample: &ResponseTime) -> Result<(), StoreError> {
        let row = ResponseTimeRow::from(sample);
        self.run(move |conn| {
            diesel::insert_into(response_times::table).values(&row).execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn metrics_snapshot(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MetricsSnapshot, StoreError> {
        self.run(move |conn| {
            let ticket_rows = tickets::table
                .filter(tickets::created_at.between(from, to))
                .select(TicketRow::as_select())
                .load(conn)?;
            let interaction_rows = interactions::table
                .filter(interactions::created_at.between(from, to))
                .select(InteractionRow::as_select())
                .load(conn)?;
            let feedback_rows = classification_feedback::table
                .filter(classification_feedback::created_at.between(from, to))
                .select(FeedbackRow::as_select())
                .load(conn)?;
            let error_rows = routing_errors::table
                .filter(routing_errors::created_at.between(from, to))
                .select(RoutingErrorRow::as_select())
                .load(conn)?;
            let response_rows = response_times::table
                .filter(response_times::created_at.between(from, to))
                .select(ResponseTimeRow::as_select())
                .load(conn)?;

            Ok(MetricsSnapshot {
                tickets: convert_all(ticket_rows)?,
                interactions: convert_all(interaction_rows)?,
                feedback: convert_all(feedback_rows)?,
                routing_errors: convert_all(error_rows)?,
                response_times: convert_all(response_rows)?,
            })
        })
        .await
    }
}
