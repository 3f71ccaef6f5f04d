use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::error::TicketError;
use super::lifecycle::{apply, TicketAction, Transition};
use crate::classifier::Classifier;
use crate::config::{RetryConfig, SlaConfig, TriageConfig};
use crate::generator::AnswerGenerator;
use crate::kb::KnowledgeRetriever;
use crate::shared::models::{
    ClientType, Priority, ResponseTime, ResponseType, RoutingError, Ticket, TicketHistory,
    TicketMessage, TicketSource, TicketStatus,
};
use crate::shared::utils::with_retry;
use crate::sla::{compute_deadlines, set_deadlines};
use crate::store::{StoreError, SupportStore, TicketFilter};

const AUTO_RESOLVE_REASON: &str = "resolved automatically from the knowledge base";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTicketRequest {
    #[serde(default)]
    pub source: TicketSource,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub client_type: Option<ClientType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTicketRequest {
    pub department_id: Option<Uuid>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<TicketStatus>,
    pub need_on_site: Option<bool>,
    pub assigned_to: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignRequest {
    pub department_id: Option<Uuid>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub ticket_id: Uuid,
    pub language: String,
    pub category: String,
    pub subcategory: String,
    pub department_id: Option<Uuid>,
    pub priority: Priority,
    pub summary: String,
    pub auto_resolve: bool,
    pub suggested_response: Option<String>,
    pub degraded: Vec<String>,
}

/// Ticket operations shared by the HTTP handlers and intake.
pub struct TicketService {
    store: Arc<dyn SupportStore>,
    classifier: Arc<dyn Classifier>,
    retriever: Arc<dyn KnowledgeRetriever>,
    generator: Arc<dyn AnswerGenerator>,
    triage: TriageConfig,
    sla: SlaConfig,
    retry: RetryConfig,
}

impl TicketService {
    pub fn new(
        store: Arc<dyn SupportStore>,
        classifier: Arc<dyn Classifier>,
        retriever: Arc<dyn KnowledgeRetriever>,
        generator: Arc<dyn AnswerGenerator>,
        triage: TriageConfig,
        sla: SlaConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            retriever,
            generator,
            triage,
            sla,
            retry,
        }
    }

    pub async fn create(&self, req: CreateTicketRequest) -> Result<Ticket, TicketError> {
        let subject = req.subject.trim();
        let description = req.description.trim();
        if subject.is_empty() && description.is_empty() {
            return Err(TicketError::Validation(
                "subject or description is required".to_string(),
            ));
        }

        let now = Utc::now();
        let mut ticket = Ticket::new(req.source, subject, description, now);
        ticket.client_type = req.client_type;
        let opening = TicketMessage::new(ticket.id, "user", &ticket.full_text(), now);

        with_retry(&self.retry, "ticket insert", || {
            self.store.create_ticket(&ticket, std::slice::from_ref(&opening))
        })
        .await?;

        info!("[TICKETS] created {} from {}", ticket.id, ticket.source);
        Ok(ticket)
    }

    pub async fn get(&self, id: Uuid) -> Result<Ticket, TicketError> {
        self.store
            .get_ticket(id)
            .await
            .map_err(|e| read_failure(&format!("ticket {}", id), e))
    }

    pub async fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, TicketError> {
        self.store
            .list_tickets(filter)
            .await
            .map_err(|e| read_failure("tickets", e))
    }

    pub async fn history(&self, id: Uuid) -> Result<Vec<TicketHistory>, TicketError> {
        self.get(id).await?;
        self.store
            .list_history(id)
            .await
            .map_err(|e| read_failure(&format!("history of ticket {}", id), e))
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), TicketError> {
        self.store.delete_ticket(id).await?;
        info!("[TICKETS] deleted {}", id);
        Ok(())
    }

    /// Classifies the ticket, fixes its SLA deadlines and auto-resolves it when the
    /// classifier and the grounded answer are both confident enough. Only `new`
    /// tickets are processed; routing set by an agent is never overwritten.
    pub async fn process_with_ai(&self, id: Uuid) -> Result<ProcessResult, TicketError> {
        let mut ticket = self.get(id).await?;
        if ticket.status != TicketStatus::New {
            return Err(TicketError::Conflict(format!(
                "ticket {} is {}, only new tickets are processed",
                id, ticket.status
            )));
        }
        let text = ticket.full_text();
        let mut degraded = Vec::new();

        let (classification, retrieved) = tokio::join!(
            self.classifier.classify(&text, Some(ticket.subject.as_str())),
            self.retriever.retrieve(
                &text,
                self.triage.process_retrieval_k,
                self.triage.source_filter.as_deref()
            ),
        );
        if let Some(reason) = classification.fallback_reason() {
            degraded.push(format!("classification: {}", reason));
        }
        if let Some(reason) = retrieved.fallback_reason() {
            degraded.push(format!("retrieval: {}", reason));
        }
        let classification_live = !classification.is_fallback();
        let classification = classification.into_value();
        let snippets = retrieved.into_value();

        let (generated, summary) = tokio::join!(
            self.generator.generate(&text, &snippets, &[], &classification.language),
            self.generator.summarize(&text, &classification.language),
        );
        if let Some(reason) = generated.fallback_reason() {
            degraded.push(format!("generation: {}", reason));
        }
        if let Some(reason) = summary.fallback_reason() {
            degraded.push(format!("summary: {}", reason));
        }
        let generation_live = !generated.is_fallback();
        let generated = generated.into_value();
        let summary = summary.into_value();

        let department = match self.store.find_department_by_name(&classification.department).await {
            Ok(department) => department,
            Err(e) => {
                warn!("[TICKETS] department lookup for {} failed: {}", classification.department, e);
                None
            }
        };

        let now = Utc::now();
        let expected = ticket.status;
        ticket.language = Some(classification.language.clone());
        ticket.category = Some(classification.category.clone());
        ticket.subcategory = Some(classification.subcategory.clone());
        ticket.department_id = department.as_ref().map(|d| d.id);
        ticket.priority = classification.priority;
        ticket.classification_confidence = Some(classification.confidence);
        ticket.summary = Some(summary.clone());
        ticket.updated_at = now;
        if ticket.sla_accept_deadline.is_none() {
            let accept_minutes = department
                .as_ref()
                .map(|d| i64::from(d.sla_accept_minutes))
                .unwrap_or(self.sla.accept_minutes);
            set_deadlines(&mut ticket, compute_deadlines(now, accept_minutes, self.sla.remote_minutes));
        }

        let threshold = self.triage.auto_resolve_confidence;
        let auto_resolve = classification_live
            && generation_live
            && classification.auto_resolve_candidate
            && classification.confidence > threshold
            && generated.confidence > threshold
            && generated.directive.is_none()
            && !generated.need_on_site
            && !generated.answer.is_empty();

        let transition = if auto_resolve {
            Some(apply(&mut ticket, TicketAction::AutoResolve, now)?)
        } else {
            None
        };

        self.store.update_ticket(&ticket, expected).await?;

        if let Some(transition) = transition {
            self.record_history(&ticket, transition, Some(AUTO_RESOLVE_REASON)).await;
            let sample = ResponseTime::since_creation(&ticket, ResponseType::Auto, now);
            if let Err(e) = self.store.insert_response_time(&sample).await {
                warn!("[TICKETS] response time for {} not recorded: {}", ticket.id, e);
            }
        }

        info!(
            "[TICKETS] processed {} category={} confidence={:.2} auto_resolve={}",
            ticket.id, classification.category, classification.confidence, auto_resolve
        );

        let suggested_response = (generation_live && !generated.answer.is_empty()).then_some(generated.answer);
        Ok(ProcessResult {
            ticket_id: ticket.id,
            language: classification.language,
            category: classification.category,
            subcategory: classification.subcategory,
            department_id: ticket.department_id,
            priority: ticket.priority,
            summary,
            auto_resolve,
            suggested_response,
            degraded,
        })
    }

    pub async fn accept(&self, id: Uuid, agent: Option<String>) -> Result<Ticket, TicketError> {
        let (ticket, _) = self
            .transition(id, TicketAction::Accept, None, |ticket| {
                if agent.is_some() {
                    ticket.assigned_to = agent;
                }
                Ok(())
            })
            .await?;
        Ok(ticket)
    }

    /// Moves the ticket to another department and/or assignee. A department change
    /// on an already-routed ticket is logged as a routing error.
    pub async fn assign(&self, id: Uuid, req: AssignRequest) -> Result<Ticket, TicketError> {
        if req.department_id.is_none() && req.assigned_to.is_none() {
            return Err(TicketError::Validation(
                "department_id or assigned_to is required".to_string(),
            ));
        }
        if let Some(department_id) = req.department_id {
            self.ensure_department(department_id).await?;
        }

        let now = Utc::now();
        let mut routing_error = None;
        let (ticket, _) = self
            .transition(id, TicketAction::Assign, None, |ticket| {
                if let Some(department_id) = req.department_id {
                    if ticket.department_id.is_some() && ticket.department_id != Some(department_id) {
                        routing_error = Some(RoutingError::wrong_department(ticket, Some(department_id), now));
                    }
                    ticket.department_id = Some(department_id);
                }
                if let Some(assignee) = req.assigned_to {
                    ticket.assigned_to = Some(assignee);
                }
                Ok(())
            })
            .await?;

        if let Some(routing_error) = routing_error {
            self.record_routing_error(&routing_error).await?;
        }
        Ok(ticket)
    }

    pub async fn update(&self, id: Uuid, req: UpdateTicketRequest) -> Result<Ticket, TicketError> {
        if let Some(department_id) = req.department_id {
            self.ensure_department(department_id).await?;
        }
        let action = match req.status {
            Some(status) => Some(TicketAction::for_target(status).ok_or_else(|| {
                TicketError::Validation(format!("status cannot be set to {}", status))
            })?),
            None => None,
        };

        let now = Utc::now();
        let mut ticket = self.get(id).await?;
        let expected = ticket.status;
        let mut routing_errors = Vec::new();

        if let Some(department_id) = req.department_id {
            if ticket.department_id.is_some() && ticket.department_id != Some(department_id) {
                routing_errors.push(RoutingError::wrong_department(&ticket, Some(department_id), now));
            }
            ticket.department_id = Some(department_id);
        }
        if let Some(category) = req.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            if ticket.category.is_some() && ticket.category.as_deref() != Some(category) {
                routing_errors.push(RoutingError::wrong_category(&ticket, category, now));
            }
            ticket.category = Some(category.to_string());
        }
        if let Some(priority) = req.priority {
            ticket.priority = priority;
        }
        if let Some(need_on_site) = req.need_on_site {
            ticket.need_on_site = need_on_site;
        }
        if let Some(assignee) = req.assigned_to {
            ticket.assigned_to = Some(assignee);
        }
        ticket.updated_at = now;

        let transition = match action {
            Some(action) => Some(apply(&mut ticket, action, now)?),
            None => None,
        };

        self.store.update_ticket(&ticket, expected).await?;

        if let Some(transition) = transition {
            self.after_transition(&ticket, transition, req.reason.as_deref(), now).await;
        }
        for routing_error in &routing_errors {
            self.record_routing_error(routing_error).await?;
        }
        Ok(ticket)
    }

    pub async fn complete_remote(&self, id: Uuid) -> Result<Ticket, TicketError> {
        Ok(self.transition(id, TicketAction::CompleteRemote, None, |_| Ok(())).await?.0)
    }

    pub async fn request_on_site(&self, id: Uuid) -> Result<Ticket, TicketError> {
        Ok(self.transition(id, TicketAction::RequestOnSite, None, |_| Ok(())).await?.0)
    }

    pub async fn close(&self, id: Uuid) -> Result<Ticket, TicketError> {
        Ok(self.transition(id, TicketAction::Close, None, |_| Ok(())).await?.0)
    }

    /// Loads the ticket, applies field changes and the lifecycle action, and persists
    /// it only if nobody changed its status meanwhile.
    pub(crate) async fn transition<F>(
        &self,
        id: Uuid,
        action: TicketAction,
        reason: Option<&str>,
        mutate: F,
    ) -> Result<(Ticket, Transition), TicketError>
    where
        F: FnOnce(&mut Ticket) -> Result<(), TicketError>,
    {
        let now = Utc::now();
        let mut ticket = self.get(id).await?;
        let expected = ticket.status;
        mutate(&mut ticket)?;
        let transition = apply(&mut ticket, action, now)?;

        self.store.update_ticket(&ticket, expected).await?;
        self.after_transition(&ticket, transition, reason, now).await;
        info!("[TICKETS] {} {:?}: {} -> {}", id, action, transition.from, transition.to);

        Ok((ticket, transition))
    }

    async fn after_transition(
        &self,
        ticket: &Ticket,
        transition: Transition,
        reason: Option<&str>,
        now: chrono::DateTime<Utc>,
    ) {
        self.record_history(ticket, transition, reason).await;
        if transition.to == TicketStatus::Accepted && ticket.first_response_at == Some(now) {
            let sample = ResponseTime::since_creation(ticket, ResponseType::Human, now);
            if let Err(e) = self.store.insert_response_time(&sample).await {
                warn!("[TICKETS] response time for {} not recorded: {}", ticket.id, e);
            }
        }
    }

    async fn record_history(&self, ticket: &Ticket, transition: Transition, reason: Option<&str>) {
        if !transition.changed() {
            return;
        }
        let entry = TicketHistory::status_change(ticket.id, transition.from, transition.to, reason, ticket.updated_at);
        if let Err(e) = self.store.append_history(&entry).await {
            warn!("[TICKETS] history for {} not recorded: {}", ticket.id, e);
        }
    }

    async fn record_routing_error(&self, routing_error: &RoutingError) -> Result<(), TicketError> {
        with_retry(&self.retry, "routing error insert", || {
            self.store.insert_routing_error(routing_error)
        })
        .await?;
        warn!(
            "[TICKETS] routing error {} on ticket {}",
            routing_error.error_type, routing_error.ticket_id
        );
        Ok(())
    }

    async fn ensure_department(&self, id: Uuid) -> Result<(), TicketError> {
        match self.store.get_department(id).await? {
            Some(_) => Ok(()),
            None => Err(TicketError::Validation(format!("unknown department {}", id))),
        }
    }
}

/// Reads never surface storage failures other than as "not found".
fn read_failure(what: &str, e: StoreError) -> TicketError {
    if !matches!(e, StoreError::NotFound(_)) {
        error!("[TICKETS] failed to load {}: {}", what, e);
    }
    TicketError::NotFound(what.to_string())
}
