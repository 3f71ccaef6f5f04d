use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::llm::parser::extract_json;
use crate::llm::{ChatMessage, LLMProvider};
use crate::shared::models::Priority;
use crate::shared::outcome::Outcome;

pub const CATEGORIES: [&str; 6] = ["network", "telephony", "tv", "billing", "equipment", "other"];
pub const DEPARTMENTS: [&str; 5] = ["TechSupport", "Network", "Sales", "Billing", "LocalOffice"];

const SYSTEM_PROMPT: &str = "Ты классифицируешь обращения клиентов телеком-оператора. \
Ответь только JSON-объектом с полями: \
language (\"ru\" или \"kz\"), \
category (network, telephony, tv, billing, equipment, other), \
subcategory (короткий идентификатор, например internet_speed, vpn_access, payment_issue), \
department (TechSupport, Network, Sales, Billing, LocalOffice), \
priority (critical, high, medium, low), \
auto_resolve_candidate (true, если вопрос можно закрыть автоматическим ответом), \
confidence (число от 0 до 1). \
При сомнениях ставь auto_resolve_candidate=false и confidence ниже 0.7.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub language: String,
    pub category: String,
    pub subcategory: String,
    pub department: String,
    pub priority: Priority,
    pub auto_resolve_candidate: bool,
    pub confidence: f64,
}

impl Classification {
    /// Safe value used when the classification capability is unavailable.
    pub fn fallback(text: &str) -> Self {
        Self {
            language: detect_language(text).to_string(),
            category: "other".to_string(),
            subcategory: "general".to_string(),
            department: "TechSupport".to_string(),
            priority: Priority::Medium,
            auto_resolve_candidate: false,
            confidence: 0.0,
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, subject: Option<&str>) -> Outcome<Classification>;
}

/// `kz` when Kazakh-only letters appear, `ru` otherwise.
pub fn detect_language(text: &str) -> &'static str {
    const KAZAKH_LETTERS: &str = "әғқңөұүһіӘҒҚҢӨҰҮҺІ";
    if text.chars().any(|c| KAZAKH_LETTERS.contains(c)) {
        "kz"
    } else {
        "ru"
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    language: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    department: Option<String>,
    priority: Option<String>,
    auto_resolve_candidate: Option<bool>,
    confidence: Option<f64>,
}

/// Normalises model output; unknown labels collapse to the fallback values.
fn normalize(raw: RawClassification, text: &str) -> Classification {
    let language = match raw.language.as_deref().map(str::to_lowercase).as_deref() {
        Some("kz") | Some("kk") => "kz".to_string(),
        Some("ru") => "ru".to_string(),
        _ => detect_language(text).to_string(),
    };
    let category = raw
        .category
        .map(|c| c.to_lowercase())
        .filter(|c| CATEGORIES.contains(&c.as_str()))
        .unwrap_or_else(|| "other".to_string());
    let department = raw
        .department
        .and_then(|d| {
            DEPARTMENTS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(&d))
                .map(|known| known.to_string())
        })
        .unwrap_or_else(|| "TechSupport".to_string());

    Classification {
        language,
        category,
        subcategory: raw
            .subcategory
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "general".to_string()),
        department,
        priority: raw
            .priority
            .and_then(|p| p.parse().ok())
            .unwrap_or(Priority::Medium),
        auto_resolve_candidate: raw.auto_resolve_candidate.unwrap_or(false),
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
    }
}

pub struct LlmClassifier {
    llm: Arc<dyn LLMProvider>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, text: &str, subject: Option<&str>) -> Outcome<Classification> {
        let prompt = match subject.filter(|s| !s.trim().is_empty()) {
            Some(subject) => format!("Тема: {}\n\nОписание: {}", subject, text),
            None => text.to_string(),
        };
        let messages = [ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)];
        let config: Value = json!({"temperature": 0.3, "json": true});

        let raw = match self.llm.generate(&messages, &config).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[CLASSIFIER] provider failed, using fallback: {}", e);
                return Outcome::fallback(Classification::fallback(text), e.to_string());
            }
        };

        match serde_json::from_str::<RawClassification>(&extract_json(&raw)) {
            Ok(parsed) => Outcome::Live(normalize(parsed, text)),
            Err(e) => {
                warn!("[CLASSIFIER] unparseable classification, using fallback: {}", e);
                Outcome::fallback(
                    Classification::fallback(text),
                    format!("unparseable classification: {}", e),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::MockLLMProvider;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("Интернет не работает"), "ru");
        assert_eq!(detect_language("Интернет қосылмайды"), "kz");
    }

    #[tokio::test]
    async fn test_classify_parses_model_output() {
        let llm = Arc::new(MockLLMProvider::with_response(
            r#"```json
{"language":"ru","category":"network","subcategory":"internet_speed","department":"network","priority":"high","auto_resolve_candidate":true,"confidence":0.92}
```"#,
        ));
        let classifier = LlmClassifier::new(llm);
        let outcome = classifier.classify("Медленный интернет", Some("Скорость")).await;
        assert!(!outcome.is_fallback());
        let classification = outcome.into_value();
        assert_eq!(classification.category, "network");
        assert_eq!(classification.department, "Network");
        assert_eq!(classification.priority, Priority::High);
        assert!(classification.auto_resolve_candidate);
    }

    #[tokio::test]
    async fn test_unknown_labels_are_normalized() {
        let llm = Arc::new(MockLLMProvider::with_response(
            r#"{"category":"weather","department":"Marketing","priority":"asap","confidence":3.0}"#,
        ));
        let classification = LlmClassifier::new(llm).classify("текст", None).await.into_value();
        assert_eq!(classification.category, "other");
        assert_eq!(classification.department, "TechSupport");
        assert_eq!(classification.priority, Priority::Medium);
        assert_eq!(classification.confidence, 1.0);
        assert_eq!(classification.subcategory, "general");
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_fallback() {
        let llm = Arc::new(MockLLMProvider::failing());
        let outcome = LlmClassifier::new(llm).classify("Интернет қосылмайды", None).await;
        assert!(outcome.is_fallback());
        let value = outcome.value();
        assert_eq!(value.category, "other");
        assert_eq!(value.confidence, 0.0);
        assert_eq!(value.language, "kz");
        assert!(!value.auto_resolve_candidate);
    }

    #[tokio::test]
    async fn test_garbage_output_degrades_to_fallback() {
        let llm = Arc::new(MockLLMProvider::with_response("I cannot help with that"));
        let outcome = LlmClassifier::new(llm).classify("роутер", None).await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.value().category, "other");
    }
}
