use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::classifier::{Classification, Classifier};
use crate::generator::{AnswerGenerator, GeneratedAnswer};
use crate::kb::{KnowledgeRetriever, Snippet};
use crate::llm::parser::EscalateDirective;
use crate::llm::{ChatMessage, LLMProvider, LlmError};
use crate::shared::models::{
    ClassificationFeedback, Department, Interaction, Priority, ResponseTime, RoutingError, Ticket,
    TicketHistory, TicketMessage, TicketStatus,
};
use crate::shared::outcome::Outcome;
use crate::store::{MemoryStore, MetricsSnapshot, StoreError, SupportStore, TicketFilter};

#[derive(Debug)]
pub struct MockLLMProvider {
    pub response: String,
    pub fail: bool,
    pub embedding: Vec<f32>,
}

impl MockLLMProvider {
    pub fn new() -> Self {
        Self {
            response: "Mock LLM response".to_string(),
            fail: false,
            embedding: vec![0.1, 0.2, 0.3],
        }
    }

    pub fn with_response(response: &str) -> Self {
        Self {
            response: response.to_string(),
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

impl Default for MockLLMProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for MockLLMProvider {
    async fn generate(&self, _messages: &[ChatMessage], _config: &Value) -> Result<String, LlmError> {
        if self.fail {
            return Err(LlmError::Status {
                status: 503,
                body: "mock provider unavailable".to_string(),
            });
        }
        Ok(self.response.clone())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        if self.fail {
            return Err(LlmError::Malformed("mock embedding unavailable".to_string()));
        }
        Ok(self.embedding.clone())
    }
}

pub struct MockClassifier {
    pub classification: Classification,
    pub fallback: bool,
}

impl MockClassifier {
    pub fn new(category: &str, department: &str, confidence: f64, auto_resolve_candidate: bool) -> Self {
        Self {
            classification: Classification {
                language: "ru".to_string(),
                category: category.to_string(),
                subcategory: "general".to_string(),
                department: department.to_string(),
                priority: Priority::Medium,
                auto_resolve_candidate,
                confidence,
            },
            fallback: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            classification: Classification::fallback(""),
            fallback: true,
        }
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, _text: &str, _subject: Option<&str>) -> Outcome<Classification> {
        if self.fallback {
            Outcome::fallback(self.classification.clone(), "mock classifier unavailable")
        } else {
            Outcome::Live(self.classification.clone())
        }
    }
}

#[derive(Default)]
pub struct MockRetriever {
    pub snippets: Vec<Snippet>,
    pub calls: AtomicUsize,
}

impl MockRetriever {
    pub fn with_similarity(similarity: f64) -> Self {
        Self {
            snippets: vec![Snippet::new("Справочный фрагмент базы знаний", similarity)],
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeRetriever for MockRetriever {
    async fn retrieve(&self, _query: &str, k: usize, _source_filter: Option<&str>) -> Outcome<Vec<Snippet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Outcome::Live(self.snippets.iter().take(k).cloned().collect())
    }
}

pub struct MockGenerator {
    pub answer: GeneratedAnswer,
    pub fallback: bool,
    pub summary: String,
}

impl MockGenerator {
    pub fn answering(answer: &str, confidence: f64) -> Self {
        Self {
            answer: GeneratedAnswer {
                answer: answer.to_string(),
                resolution_steps: Vec::new(),
                need_on_site: false,
                confidence,
                directive: None,
            },
            fallback: false,
            summary: "Краткое резюме".to_string(),
        }
    }

    pub fn escalating(answer: &str, confidence: f64, reason: &str) -> Self {
        let mut generator = Self::answering(answer, confidence);
        generator.answer.directive = Some(EscalateDirective {
            confidence,
            reason: reason.to_string(),
        });
        generator
    }

    pub fn needing_on_site(answer: &str, confidence: f64) -> Self {
        let mut generator = Self::answering(answer, confidence);
        generator.answer.need_on_site = true;
        generator
    }

    pub fn unavailable() -> Self {
        Self {
            answer: GeneratedAnswer::fallback(),
            fallback: true,
            summary: String::new(),
        }
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(
        &self,
        _query: &str,
        _snippets: &[Snippet],
        _history: &[ChatMessage],
        _language: &str,
    ) -> Outcome<GeneratedAnswer> {
        if self.fallback {
            Outcome::fallback(self.answer.clone(), "mock generator unavailable")
        } else {
            Outcome::Live(self.answer.clone())
        }
    }

    async fn summarize(&self, text: &str, _language: &str) -> Outcome<String> {
        if self.fallback {
            Outcome::fallback(text.to_string(), "mock generator unavailable")
        } else {
            Outcome::Live(self.summary.clone())
        }
    }
}

pub fn test_departments() -> Vec<Department> {
    ["TechSupport", "Network", "Sales", "Billing", "LocalOffice"]
        .iter()
        .enumerate()
        .map(|(i, name)| Department {
            id: Uuid::from_u128(i as u128 + 1),
            name: name.to_string(),
            sla_accept_minutes: if *name == "Billing" { 30 } else { 15 },
        })
        .collect()
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_departments(test_departments()))
}

/// Memory store whose writes and reads can be made to fail.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_ticket_writes: bool,
    pub fail_interactions: bool,
    pub fail_feedback: bool,
    pub fail_list_reads: bool,
    pub fail_update_for: Option<Uuid>,
    pub fail_deadline_queries: AtomicBool,
    pub ticket_write_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(fail_ticket_writes: bool, fail_interactions: bool) -> Self {
        Self {
            inner: MemoryStore::with_departments(test_departments()),
            fail_ticket_writes,
            fail_interactions,
            fail_feedback: false,
            fail_list_reads: false,
            fail_update_for: None,
            fail_deadline_queries: AtomicBool::new(false),
            ticket_write_attempts: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(false, false)
    }

    fn unavailable() -> StoreError {
        StoreError::Connection("database unavailable".to_string())
    }

    fn deadline_queries_fail(&self) -> bool {
        self.fail_deadline_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SupportStore for FlakyStore {
    async fn get_department(&self, id: Uuid) -> Result<Option<Department>, StoreError> {
        self.inner.get_department(id).await
    }

    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>, StoreError> {
        self.inner.find_department_by_name(name).await
    }

    async fn create_ticket(&self, ticket: &Ticket, messages: &[TicketMessage]) -> Result<(), StoreError> {
        self.ticket_write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_ticket_writes {
            return Err(Self::unavailable());
        }
        self.inner.create_ticket(ticket, messages).await
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Ticket, StoreError> {
        self.inner.get_ticket(id).await
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, StoreError> {
        if self.fail_list_reads {
            return Err(Self::unavailable());
        }
        self.inner.list_tickets(filter).await
    }

    async fn update_ticket(&self, ticket: &Ticket, expected_status: TicketStatus) -> Result<(), StoreError> {
        self.ticket_write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_ticket_writes || self.fail_update_for == Some(ticket.id) {
            return Err(Self::unavailable());
        }
        self.inner.update_ticket(ticket, expected_status).await
    }

    async fn delete_ticket(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_ticket(id).await
    }

    async fn list_ticket_messages(&self, ticket_id: Uuid) -> Result<Vec<TicketMessage>, StoreError> {
        self.inner.list_ticket_messages(ticket_id).await
    }

    async fn tickets_past_accept_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError> {
        if self.deadline_queries_fail() {
            return Err(Self::unavailable());
        }
        self.inner.tickets_past_accept_deadline(now).await
    }

    async fn tickets_past_remote_deadline(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, StoreError> {
        if self.deadline_queries_fail() {
            return Err(Self::unavailable());
        }
        self.inner.tickets_past_remote_deadline(now).await
    }

    async fn append_history(&self, entry: &TicketHistory) -> Result<(), StoreError> {
        self.inner.append_history(entry).await
    }

    async fn list_history(&self, ticket_id: Uuid) -> Result<Vec<TicketHistory>, StoreError> {
        if self.fail_list_reads {
            return Err(Self::unavailable());
        }
        self.inner.list_history(ticket_id).await
    }

    async fn insert_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        if self.fail_interactions {
            return Err(Self::unavailable());
        }
        self.inner.insert_interaction(interaction).await
    }

    async fn insert_feedback(&self, feedback: &ClassificationFeedback) -> Result<(), StoreError> {
        self.inner.insert_feedback(feedback).await
    }

    async fn insert_routing_error(&self, error: &RoutingError) -> Result<(), StoreError> {
        self.inner.insert_routing_error(error).await
    }

    async fn record_feedback(
        &self,
        ticket: &Ticket,
        expected_status: TicketStatus,
        feedback: &ClassificationFeedback,
        routing_errors: &[RoutingError],
    ) -> Result<(), StoreError> {
        if self.fail_feedback {
            return Err(Self::unavailable());
        }
        self.inner
            .record_feedback(ticket, expected_status, feedback, routing_errors)
            .await
    }

    async fn insert_response_time(&self, sample: &ResponseTime) -> Result<(), StoreError> {
        self.inner.insert_response_time(sample).await
    }

    async fn metrics_snapshot(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MetricsSnapshot, StoreError> {
        self.inner.metrics_snapshot(from, to).await
    }
}
