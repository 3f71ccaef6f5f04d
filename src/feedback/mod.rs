//! Human corrections of predicted classification and routing.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::shared::models::{ClassificationFeedback, Priority, RoutingError, Ticket, TicketHistory};
use crate::shared::state::AppState;
use crate::shared::utils::with_retry;
use crate::store::{StoreError, SupportStore};
use crate::tickets::lifecycle::{apply, TicketAction};
use crate::tickets::TicketError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackRequest {
    pub actual_category: Option<String>,
    pub actual_department_id: Option<Uuid>,
    pub actual_priority: Option<Priority>,
    /// Overrides the equality-derived verdict.
    pub is_correct: Option<bool>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackResult {
    pub feedback: ClassificationFeedback,
    pub routing_errors: Vec<RoutingError>,
    pub ticket: Ticket,
}

pub struct FeedbackRecorder {
    store: Arc<dyn SupportStore>,
    retry: RetryConfig,
}

impl FeedbackRecorder {
    pub fn new(store: Arc<dyn SupportStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Records the correction, logs at most one routing error per corrected field,
    /// moves the ticket to the actual department and puts it in progress. The ticket
    /// change, the feedback and the routing errors are committed together.
    pub async fn record(&self, ticket_id: Uuid, req: FeedbackRequest) -> Result<FeedbackResult, TicketError> {
        let mut ticket = match self.store.get_ticket(ticket_id).await {
            Ok(ticket) => ticket,
            Err(StoreError::NotFound(_)) => {
                return Err(TicketError::NotFound(format!("ticket {}", ticket_id)))
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(department_id) = req.actual_department_id {
            if self.store.get_department(department_id).await?.is_none() {
                return Err(TicketError::Validation(format!("unknown department {}", department_id)));
            }
        }

        let now = Utc::now();
        let actual_category = req
            .actual_category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .or_else(|| ticket.category.clone());
        let actual_department_id = req.actual_department_id.or(ticket.department_id);
        let actual_priority = req.actual_priority.unwrap_or(ticket.priority);

        let category_changed = actual_category != ticket.category;
        let department_changed = actual_department_id != ticket.department_id;
        let priority_changed = actual_priority != ticket.priority;

        let feedback = ClassificationFeedback {
            id: Uuid::new_v4(),
            ticket_id,
            predicted_category: ticket.category.clone(),
            actual_category: actual_category.clone(),
            predicted_department_id: ticket.department_id,
            actual_department_id,
            predicted_priority: Some(ticket.priority),
            actual_priority: Some(actual_priority),
            is_correct: req
                .is_correct
                .unwrap_or(!(category_changed || department_changed || priority_changed)),
            comment: req.comment,
            created_at: now,
        };

        let mut routing_errors = Vec::new();
        if department_changed {
            routing_errors.push(RoutingError::wrong_department(&ticket, actual_department_id, now));
        }
        if category_changed {
            if let Some(category) = actual_category.as_deref() {
                routing_errors.push(RoutingError::wrong_category(&ticket, category, now));
            }
        }

        let expected = ticket.status;
        ticket.category = actual_category;
        ticket.department_id = actual_department_id;
        ticket.priority = actual_priority;
        let transition = apply(&mut ticket, TicketAction::StartWork, now)?;
        with_retry(&self.retry, "feedback record", || {
            self.store
                .record_feedback(&ticket, expected, &feedback, &routing_errors)
        })
        .await?;

        if transition.changed() {
            let entry = TicketHistory::status_change(
                ticket_id,
                transition.from,
                transition.to,
                Some("classification feedback"),
                now,
            );
            if let Err(e) = self.store.append_history(&entry).await {
                warn!("[FEEDBACK] history for {} not recorded: {}", ticket_id, e);
            }
        }

        info!(
            "[FEEDBACK] ticket {} correct={} routing_errors={}",
            ticket_id,
            feedback.is_correct,
            routing_errors.len()
        );
        Ok(FeedbackResult {
            feedback,
            routing_errors,
            ticket,
        })
    }
}

pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResult>, TicketError> {
    Ok(Json(state.feedback.record(id, req).await?))
}

pub fn configure_feedback_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/tickets/:id/feedback", post(submit_feedback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{RoutingErrorType, TicketSource, TicketStatus};
    use crate::shared::test_utils::{memory_store, test_departments, FlakyStore};

    async fn routed_ticket(store: &Arc<crate::store::MemoryStore>) -> Ticket {
        let mut ticket = Ticket::new(TicketSource::Portal, "Нет интернета", "С утра нет связи", Utc::now());
        ticket.category = Some("network".to_string());
        ticket.department_id = Some(test_departments()[0].id);
        ticket.priority = Priority::High;
        store.create_ticket(&ticket, &[]).await.expect("create");
        ticket
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            base_delay: std::time::Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_department_change_logs_exactly_one_routing_error() {
        let store = memory_store();
        let ticket = routed_ticket(&store).await;
        let recorder = FeedbackRecorder::new(store.clone(), fast_retry());

        let network = test_departments()[1].id;
        let result = recorder
            .record(
                ticket.id,
                FeedbackRequest {
                    actual_department_id: Some(network),
                    ..Default::default()
                },
            )
            .await
            .expect("feedback");

        assert!(!result.feedback.is_correct);
        assert_eq!(result.ticket.status, TicketStatus::InProgress);
        assert_eq!(result.ticket.department_id, Some(network));

        let errors = store.routing_errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, RoutingErrorType::WrongDepartment);
        assert_eq!(errors[0].corrected_department_id, Some(network));
    }

    #[tokio::test]
    async fn test_confirmation_is_correct_without_errors() {
        let store = memory_store();
        let ticket = routed_ticket(&store).await;
        let recorder = FeedbackRecorder::new(store.clone(), fast_retry());

        let result = recorder
            .record(ticket.id, FeedbackRequest::default())
            .await
            .expect("feedback");
        assert!(result.feedback.is_correct);
        assert!(store.routing_errors().await.is_empty());
        assert_eq!(store.feedback().await.len(), 1);
        assert_eq!(result.ticket.status, TicketStatus::InProgress);
    }

    #[tokio::test]
    async fn test_category_correction_and_override() {
        let store = memory_store();
        let ticket = routed_ticket(&store).await;
        let recorder = FeedbackRecorder::new(store.clone(), fast_retry());

        let result = recorder
            .record(
                ticket.id,
                FeedbackRequest {
                    actual_category: Some("equipment".to_string()),
                    is_correct: Some(true),
                    ..Default::default()
                },
            )
            .await
            .expect("feedback");
        assert!(result.feedback.is_correct);
        assert_eq!(result.routing_errors.len(), 1);
        assert_eq!(result.routing_errors[0].error_type, RoutingErrorType::WrongCategory);
        assert_eq!(result.ticket.category.as_deref(), Some("equipment"));
    }

    #[tokio::test]
    async fn test_unknown_department_rejected() {
        let store = memory_store();
        let ticket = routed_ticket(&store).await;
        let recorder = FeedbackRecorder::new(store.clone(), fast_retry());
        let err = recorder
            .record(
                ticket.id,
                FeedbackRequest {
                    actual_department_id: Some(Uuid::new_v4()),
                    ..Default::default()
                },
            )
            .await
            .expect_err("unknown department");
        assert!(matches!(err, TicketError::Validation(_)));
        assert!(store.feedback().await.is_empty());
    }

    #[tokio::test]
    async fn test_closed_ticket_conflicts() {
        let store = memory_store();
        let mut ticket = routed_ticket(&store).await;
        let now = Utc::now();
        apply(&mut ticket, TicketAction::AutoResolve, now).expect("auto resolve");
        store.update_ticket(&ticket, TicketStatus::New).await.expect("update");

        let recorder = FeedbackRecorder::new(store.clone(), fast_retry());
        let err = recorder
            .record(ticket.id, FeedbackRequest::default())
            .await
            .expect_err("terminal ticket");
        assert!(matches!(err, TicketError::Lifecycle(_)));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_ticket_uncorrected() {
        let mut flaky = FlakyStore::healthy();
        flaky.fail_feedback = true;
        let store = Arc::new(flaky);
        let mut ticket = Ticket::new(TicketSource::Portal, "Нет интернета", "С утра нет связи", Utc::now());
        ticket.category = Some("network".to_string());
        ticket.department_id = Some(test_departments()[0].id);
        store.create_ticket(&ticket, &[]).await.expect("create");

        let recorder = FeedbackRecorder::new(store.clone(), fast_retry());
        let request = FeedbackRequest {
            actual_department_id: Some(test_departments()[1].id),
            ..Default::default()
        };
        let err = recorder
            .record(ticket.id, request.clone())
            .await
            .expect_err("write fails");
        assert!(matches!(err, TicketError::Database(_)));

        let stored = store.get_ticket(ticket.id).await.expect("ticket");
        assert_eq!(stored.status, TicketStatus::New);
        assert_eq!(stored.department_id, Some(test_departments()[0].id));
        assert!(store.inner.routing_errors().await.is_empty());

        // the correction is still pending, so a retry against a healthy store logs it
        let recorder = FeedbackRecorder::new(Arc::new(store_with(&stored).await), fast_retry());
        let result = recorder.record(ticket.id, request).await.expect("retry");
        assert_eq!(result.routing_errors.len(), 1);
    }

    async fn store_with(ticket: &Ticket) -> crate::store::MemoryStore {
        let store = crate::store::MemoryStore::with_departments(test_departments());
        store.create_ticket(ticket, &[]).await.expect("create");
        store
    }
}
