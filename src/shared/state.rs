use std::sync::Arc;

use crate::classifier::Classifier;
use crate::config::{AppConfig, RetryConfig, SessionConfig, SlaConfig, TriageConfig};
use crate::feedback::FeedbackRecorder;
use crate::generator::AnswerGenerator;
use crate::kb::KnowledgeRetriever;
use crate::session::SessionStore;
use crate::store::SupportStore;
use crate::tickets::TicketService;
use crate::triage::TriageEngine;

/// External capabilities, constructed once at startup or replaced by fakes in tests.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn SupportStore>,
    pub classifier: Arc<dyn Classifier>,
    pub retriever: Arc<dyn KnowledgeRetriever>,
    pub generator: Arc<dyn AnswerGenerator>,
}

pub struct AppState {
    pub store: Arc<dyn SupportStore>,
    pub retriever: Arc<dyn KnowledgeRetriever>,
    pub triage: TriageEngine,
    pub tickets: TicketService,
    pub feedback: FeedbackRecorder,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(services: Services, config: &AppConfig) -> Self {
        Self::from_parts(
            services,
            config.triage.clone(),
            config.sla.clone(),
            &config.session,
            config.retry.clone(),
        )
    }

    pub fn from_parts(
        services: Services,
        triage: TriageConfig,
        sla: SlaConfig,
        session: &SessionConfig,
        retry: RetryConfig,
    ) -> Self {
        let Services {
            store,
            classifier,
            retriever,
            generator,
        } = services;

        Self {
            triage: TriageEngine::new(
                classifier.clone(),
                retriever.clone(),
                generator.clone(),
                store.clone(),
                triage.clone(),
                sla.clone(),
                retry.clone(),
            ),
            tickets: TicketService::new(
                store.clone(),
                classifier,
                retriever.clone(),
                generator,
                triage.clone(),
                sla,
                retry.clone(),
            ),
            feedback: FeedbackRecorder::new(store.clone(), retry),
            sessions: SessionStore::from_config(session, triage.history_window),
            store,
            retriever,
        }
    }
}
