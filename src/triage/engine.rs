use axum::{response::IntoResponse, Json};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::policy::{decide, DecisionInputs, TriageDecision};
use super::rules::{self, RoutingDecision};
use crate::classifier::Classifier;
use crate::config::{RetryConfig, SlaConfig, TriageConfig};
use crate::generator::AnswerGenerator;
use crate::kb::{max_similarity, KnowledgeRetriever, Snippet};
use crate::llm::parser::EscalateDirective;
use crate::llm::ChatMessage;
use crate::shared::models::{ClientType, Interaction, Ticket, TicketMessage, TicketSource};
use crate::shared::utils::{truncate_chars, with_retry};
use crate::sla::{compute_deadlines, set_deadlines};
use crate::store::SupportStore;

pub const TICKET_ACKNOWLEDGEMENT: &str =
    "Хорошо, ваш запрос зарегистрирован. Наши специалисты свяжутся с вами.";

const SUBJECT_CHARS: usize = 80;
const SNIPPET_ANSWER_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Ticket creation failed: {0}")]
    TicketCreation(String),
}

impl IntoResponse for TriageError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let (status, message) = match &self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::TicketCreation(msg) => {
                error!("[TRIAGE] {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Не удалось обработать обращение, попробуйте позже".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub client_type: Option<ClientType>,
}

#[derive(Debug, Clone, Default)]
pub struct TriageRequest {
    pub message: String,
    pub history: Vec<ChatMessage>,
    pub session_id: Option<String>,
    pub source: TicketSource,
    pub contact: Option<ContactInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriageOutcome {
    pub response: String,
    pub can_answer: bool,
    pub should_create_ticket: bool,
    pub ticket_id: Option<Uuid>,
    pub sources: Vec<Snippet>,
    pub confidence: f64,
    pub decision: TriageDecision,
    pub degraded: Vec<String>,
}

pub struct TriageEngine {
    classifier: Arc<dyn Classifier>,
    retriever: Arc<dyn KnowledgeRetriever>,
    generator: Arc<dyn AnswerGenerator>,
    store: Arc<dyn SupportStore>,
    config: TriageConfig,
    sla: SlaConfig,
    retry: RetryConfig,
}

impl TriageEngine {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        retriever: Arc<dyn KnowledgeRetriever>,
        generator: Arc<dyn AnswerGenerator>,
        store: Arc<dyn SupportStore>,
        config: TriageConfig,
        sla: SlaConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            classifier,
            retriever,
            generator,
            store,
            config,
            sla,
            retry,
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub async fn triage(&self, request: TriageRequest) -> Result<TriageOutcome, TriageError> {
        let started = Instant::now();
        let message = request.message.trim();
        if message.is_empty() {
            return Err(TriageError::Validation("Сообщение не может быть пустым".to_string()));
        }

        let window_start = request.history.len().saturating_sub(self.config.history_window);
        let history = &request.history[window_start..];
        let mut degraded = Vec::new();

        let (classification, retrieved) = tokio::join!(
            self.classifier.classify(message, None),
            self.retriever
                .retrieve(message, self.config.retrieval_k, self.config.source_filter.as_deref()),
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
        let s_max = max_similarity(&snippets);

        let generated = self
            .generator
            .generate(message, &snippets, history, &classification.language)
            .await;
        let generation_fallback = generated.fallback_reason().map(str::to_string);
        let generated = generated.into_value();

        let directive = match &generation_fallback {
            Some(reason) => {
                degraded.push(format!("generation: {}", reason));
                Some(EscalateDirective {
                    confidence: 0.0,
                    reason: "answer generation unavailable".to_string(),
                })
            }
            None => generated.directive.clone(),
        };

        let inputs = DecisionInputs {
            max_similarity: s_max,
            answer_chars: if generation_fallback.is_some() {
                0
            } else {
                generated.answer.chars().count()
            },
            directive,
            physical_intervention: rules::needs_physical_intervention(message),
            informational: rules::is_informational(message),
        };
        let decision = decide(&inputs, &self.config);
        info!(
            "[TRIAGE] s_max={:.3} c_cls={:.2} c_gen={:.2} answer_chars={} physical={} informational={} -> {:?}",
            s_max,
            classification.confidence,
            generated.confidence,
            inputs.answer_chars,
            inputs.physical_intervention,
            inputs.informational,
            decision
        );

        let (response, ticket_id, category) = match &decision {
            TriageDecision::Escalate { .. } => {
                let client_type = request
                    .contact
                    .as_ref()
                    .and_then(|c| c.client_type)
                    .unwrap_or_else(|| rules::extract_client_type(message, history));
                let routing = rules::route(message, history, client_type);
                let ticket = self
                    .open_ticket(
                        &request,
                        message,
                        history,
                        &routing,
                        client_type,
                        &classification.language,
                        classification.confidence,
                    )
                    .await?;

                let visible = if generation_fallback.is_some() {
                    String::new()
                } else {
                    generated.answer.clone()
                };
                let response = if visible.is_empty() {
                    TICKET_ACKNOWLEDGEMENT.to_string()
                } else {
                    format!("{}\n\n{}", visible, TICKET_ACKNOWLEDGEMENT)
                };
                (response, Some(ticket.id), Some(routing.category))
            }
            TriageDecision::AutoResolve { .. } => {
                let response = if generated.answer.is_empty() {
                    snippets
                        .first()
                        .map(|s| truncate_chars(s.content.trim(), SNIPPET_ANSWER_CHARS))
                        .unwrap_or_default()
                } else {
                    generated.answer.clone()
                };
                let category = classification_live.then(|| classification.category.clone());
                (response, None, category)
            }
        };

        let now = Utc::now();
        let mut interaction = Interaction::new(
            request.session_id.clone(),
            request.source,
            message,
            &response,
            decision.confidence(),
            s_max,
            ticket_id,
            started.elapsed().as_millis() as i64,
            now,
        );
        interaction.category = category;
        self.record_interaction(&interaction).await;

        Ok(TriageOutcome {
            response,
            can_answer: !decision.is_escalation(),
            should_create_ticket: decision.is_escalation(),
            ticket_id,
            sources: snippets,
            confidence: decision.confidence(),
            decision,
            degraded,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_ticket(
        &self,
        request: &TriageRequest,
        message: &str,
        history: &[ChatMessage],
        routing: &RoutingDecision,
        client_type: ClientType,
        language: &str,
        classifier_confidence: f64,
    ) -> Result<Ticket, TriageError> {
        let department = match self.store.find_department_by_name(&routing.department).await {
            Ok(department) => department,
            Err(e) => {
                warn!("[TRIAGE] department lookup for {} failed: {}", routing.department, e);
                None
            }
        };
        let accept_minutes = department
            .as_ref()
            .map(|d| i64::from(d.sla_accept_minutes))
            .unwrap_or(self.sla.accept_minutes);

        let now = Utc::now();
        let subject = truncate_chars(message, SUBJECT_CHARS);
        let mut ticket = Ticket::new(request.source, &subject, message, now);
        ticket.language = Some(language.to_string());
        ticket.category = Some(routing.category.clone());
        ticket.subcategory = Some(routing.subcategory.clone());
        ticket.department_id = department.map(|d| d.id);
        ticket.priority = routing.priority;
        ticket.client_type = Some(client_type);
        ticket.classification_confidence = Some(classifier_confidence);
        set_deadlines(&mut ticket, compute_deadlines(now, accept_minutes, self.sla.remote_minutes));

        let mut messages: Vec<TicketMessage> = history
            .iter()
            .map(|turn| TicketMessage::new(ticket.id, &turn.role, &turn.content, now))
            .collect();
        messages.push(TicketMessage::new(ticket.id, "user", message, now));

        with_retry(&self.retry, "ticket creation", || self.store.create_ticket(&ticket, &messages))
            .await
            .map_err(|e| TriageError::TicketCreation(e.to_string()))?;

        info!(
            "[TRIAGE] opened ticket {} category={} department={} priority={}",
            ticket.id, routing.category, routing.department, ticket.priority
        );
        Ok(ticket)
    }

    async fn record_interaction(&self, interaction: &Interaction) {
        let result = with_retry(&self.retry, "interaction log", || {
            self.store.insert_interaction(interaction)
        })
        .await;
        if let Err(e) = result {
            error!("[TRIAGE] interaction {} not recorded: {}", interaction.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{Priority, TicketStatus};
    use crate::shared::test_utils::{
        memory_store, test_departments, FlakyStore, MockClassifier, MockGenerator, MockRetriever,
    };
    use crate::monitoring::aggregate;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn engine(
        store: Arc<dyn SupportStore>,
        retriever: MockRetriever,
        generator: MockGenerator,
    ) -> TriageEngine {
        TriageEngine::new(
            Arc::new(MockClassifier::new("network", "TechSupport", 0.9, false)),
            Arc::new(retriever),
            Arc::new(generator),
            store,
            TriageConfig::default(),
            SlaConfig::default(),
            fast_retry(),
        )
    }

    fn request(message: &str) -> TriageRequest {
        TriageRequest {
            message: message.to_string(),
            session_id: Some("session-1".to_string()),
            source: TicketSource::Chat,
            ..Default::default()
        }
    }

    fn tariff_answer() -> String {
        "Доступны тарифы «Домашний» за 5000 тенге и «Максимальный» за 9000 тенге, оба без ограничения трафика и с бесплатным роутером.".to_string()
    }

    #[tokio::test]
    async fn test_router_failure_opens_equipment_ticket() {
        let store = memory_store();
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.05), MockGenerator::answering("", 0.0));

        let outcome = engine.triage(request("у меня не работает роутер")).await.expect("triage");

        assert!(outcome.should_create_ticket);
        assert!(!outcome.can_answer);
        assert_eq!(outcome.response, TICKET_ACKNOWLEDGEMENT);
        let ticket_id = outcome.ticket_id.expect("ticket id");

        let ticket = store.get_ticket(ticket_id).await.expect("ticket");
        assert_eq!(ticket.category.as_deref(), Some("equipment"));
        assert!(ticket.priority >= Priority::High);
        assert_eq!(ticket.status, TicketStatus::New);
        assert_eq!(ticket.department_id, Some(test_departments()[0].id));
        assert!(ticket.sla_accept_deadline.is_some());

        let interactions = store.interactions().await;
        assert_eq!(interactions.len(), 1);
        assert!(interactions[0].ticket_created);
        assert_eq!(interactions[0].ticket_id, Some(ticket_id));
        assert_eq!(store.list_ticket_messages(ticket_id).await.expect("messages").len(), 1);
    }

    #[tokio::test]
    async fn test_tariff_question_auto_resolves() {
        let store = memory_store();
        let answer = tariff_answer();
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.6), MockGenerator::answering(&answer, 0.9));

        let outcome = engine.triage(request("какие тарифы на интернет?")).await.expect("triage");

        assert!(outcome.can_answer);
        assert!(!outcome.should_create_ticket);
        assert!(outcome.ticket_id.is_none());
        assert_eq!(outcome.decision, TriageDecision::AutoResolve { confidence: 0.6 });
        assert_eq!(outcome.response, answer);
        assert_eq!(outcome.sources.len(), 1);
        assert!(store.tickets().await.is_empty());

        let interactions = store.interactions().await;
        assert_eq!(interactions.len(), 1);
        assert!(!interactions[0].ticket_created);
        assert!(interactions[0].ticket_id.is_none());
        assert_eq!(interactions[0].category.as_deref(), Some("network"));
    }

    #[tokio::test]
    async fn test_directive_escalates_despite_similarity() {
        let store = memory_store();
        let engine = engine(
            store.clone(),
            MockRetriever::with_similarity(0.9),
            MockGenerator::escalating("Для этого нужен специалист, мы передадим запрос.", 0.8, "нужен доступ к аккаунту"),
        );

        let outcome = engine.triage(request("смените мне тариф на корпоративный")).await.expect("triage");
        assert!(outcome.should_create_ticket);
        assert!(outcome.response.ends_with(TICKET_ACKNOWLEDGEMENT));
        assert!(!outcome.response.contains("NEEDS_TICKET"));
        assert_eq!(store.tickets().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_before_processing() {
        let store = memory_store();
        let retriever = Arc::new(MockRetriever::with_similarity(0.9));
        let engine = TriageEngine::new(
            Arc::new(MockClassifier::new("other", "TechSupport", 0.5, false)),
            retriever.clone(),
            Arc::new(MockGenerator::answering("ответ", 0.5)),
            store.clone(),
            TriageConfig::default(),
            SlaConfig::default(),
            fast_retry(),
        );

        let err = engine.triage(request("   ")).await.expect_err("empty message");
        assert!(matches!(err, TriageError::Validation(_)));
        assert_eq!(retriever.call_count(), 0);
        assert!(store.interactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_opens_ticket_without_placeholder() {
        let store = memory_store();
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.5), MockGenerator::unavailable());

        let outcome = engine.triage(request("как настроить wi-fi")).await.expect("triage");
        assert!(outcome.should_create_ticket);
        assert_eq!(outcome.response, TICKET_ACKNOWLEDGEMENT);
        assert!(outcome.degraded.iter().any(|d| d.starts_with("generation")));
    }

    #[tokio::test]
    async fn test_degraded_classifier_still_answers() {
        let store = memory_store();
        let engine = TriageEngine::new(
            Arc::new(MockClassifier::unavailable()),
            Arc::new(MockRetriever::with_similarity(0.6)),
            Arc::new(MockGenerator::answering(&tariff_answer(), 0.9)),
            store.clone(),
            TriageConfig::default(),
            SlaConfig::default(),
            fast_retry(),
        );

        let outcome = engine.triage(request("какие тарифы на интернет?")).await.expect("triage");
        assert!(outcome.can_answer);
        assert!(outcome.degraded.iter().any(|d| d.starts_with("classification")));
        assert!(store.interactions().await[0].category.is_none());
    }

    #[tokio::test]
    async fn test_billing_ticket_uses_department_sla() {
        let store = memory_store();
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.05), MockGenerator::answering("", 0.0));

        let outcome = engine.triage(request("не могу оплатить счёт")).await.expect("triage");
        let ticket = store.get_ticket(outcome.ticket_id.expect("ticket")).await.expect("ticket");
        let accept = ticket.sla_accept_deadline.expect("accept deadline");
        let remote = ticket.sla_remote_deadline.expect("remote deadline");
        assert_eq!(ticket.department_id, Some(test_departments()[3].id));
        assert_eq!(accept - ticket.created_at, chrono::Duration::minutes(30));
        assert_eq!(remote - accept, chrono::Duration::minutes(60));
    }

    #[tokio::test]
    async fn test_corporate_contact_raises_priority() {
        let store = memory_store();
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.05), MockGenerator::answering("", 0.0));

        let mut req = request("вопрос по тарифу");
        req.contact = Some(ContactInfo {
            client_type: Some(ClientType::Corporate),
            ..Default::default()
        });
        let outcome = engine.triage(req).await.expect("triage");
        let ticket = store.get_ticket(outcome.ticket_id.expect("ticket")).await.expect("ticket");
        assert_eq!(ticket.priority, Priority::High);
        assert_eq!(ticket.client_type, Some(ClientType::Corporate));
    }

    #[tokio::test]
    async fn test_ticket_creation_failure_is_surfaced_after_retries() {
        let store = Arc::new(FlakyStore::new(true, false));
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.05), MockGenerator::answering("", 0.0));

        let err = engine.triage(request("у меня не работает роутер")).await.expect_err("ticket write fails");
        assert!(matches!(err, TriageError::TicketCreation(_)));
        assert_eq!(
            store.ticket_write_attempts.load(std::sync::atomic::Ordering::SeqCst),
            3
        );
        assert!(store.inner.interactions().await.is_empty());
    }

    #[tokio::test]
    async fn test_interaction_log_failure_does_not_fail_answer() {
        let store = Arc::new(FlakyStore::new(false, true));
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.6), MockGenerator::answering(&tariff_answer(), 0.9));

        let outcome = engine.triage(request("какие тарифы на интернет?")).await.expect("triage");
        assert!(outcome.can_answer);
    }

    #[tokio::test]
    async fn test_history_is_windowed() {
        let store: Arc<MemoryStore> = memory_store();
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.05), MockGenerator::answering("", 0.0));

        let mut req = request("всё ещё не показывает");
        req.history = (0..30)
            .map(|i| ChatMessage::user(format!("сообщение {}", i)))
            .chain(std::iter::once(ChatMessage::user("у меня тв приставка")))
            .collect();
        let outcome = engine.triage(req).await.expect("triage");
        let ticket_id = outcome.ticket_id.expect("ticket");
        let ticket = store.get_ticket(ticket_id).await.expect("ticket");
        assert_eq!(ticket.category.as_deref(), Some("tv"));
        // 10 history turns plus the current message
        assert_eq!(store.list_ticket_messages(ticket_id).await.expect("messages").len(), 11);
    }

    #[tokio::test]
    async fn test_deleting_escalated_ticket_keeps_metrics() {
        let store = memory_store();
        let engine = engine(store.clone(), MockRetriever::with_similarity(0.05), MockGenerator::answering("", 0.0));
        let outcome = engine.triage(request("у меня не работает роутер")).await.expect("triage");
        let ticket_id = outcome.ticket_id.expect("ticket id");

        let now = Utc::now();
        let from = now - chrono::Duration::days(1);
        let to = now + chrono::Duration::minutes(1);
        let before = aggregate(&store.metrics_snapshot(from, to).await.expect("snapshot"), from, to);

        store.delete_ticket(ticket_id).await.expect("delete");
        let after = aggregate(&store.metrics_snapshot(from, to).await.expect("snapshot"), from, to);

        assert_eq!(before.auto_resolve.auto_resolved_count, 0);
        assert_eq!(after.auto_resolve.auto_resolved_count, 0);
        assert_eq!(after.auto_resolve.total_count, before.auto_resolve.total_count);
        let interactions = store.interactions().await;
        assert!(interactions[0].ticket_created);
        assert_eq!(interactions[0].ticket_id, Some(ticket_id));
    }
}
