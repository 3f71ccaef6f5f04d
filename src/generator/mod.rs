use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use crate::kb::Snippet;
use crate::llm::parser::{extract_json, split_directive, strip_citations, EscalateDirective};
use crate::llm::{ChatMessage, LLMProvider};
use crate::shared::outcome::Outcome;
use crate::shared::utils::truncate_chars;

pub const FALLBACK_ANSWER: &str =
    "Спасибо за обращение. Мы рассмотрим вашу заявку в ближайшее время.";

const SUMMARY_FALLBACK_CHARS: usize = 200;
const MIN_GROUNDING: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub resolution_steps: Vec<String>,
    pub need_on_site: bool,
    pub confidence: f64,
    pub directive: Option<EscalateDirective>,
}

impl GeneratedAnswer {
    pub fn fallback() -> Self {
        Self {
            answer: FALLBACK_ANSWER.to_string(),
            resolution_steps: Vec::new(),
            need_on_site: false,
            confidence: 0.0,
            directive: None,
        }
    }

    /// Returned without calling the model when nothing was retrieved.
    pub fn without_knowledge() -> Self {
        Self {
            answer: String::new(),
            resolution_steps: Vec::new(),
            need_on_site: false,
            confidence: 0.0,
            directive: None,
        }
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        query: &str,
        snippets: &[Snippet],
        history: &[ChatMessage],
        language: &str,
    ) -> Outcome<GeneratedAnswer>;

    async fn summarize(&self, text: &str, language: &str) -> Outcome<String>;
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Share of the answer's content words that also occur in the snippets.
pub fn grounding_score(answer: &str, snippets: &[Snippet]) -> f64 {
    let answer_words = words(answer);
    if answer_words.is_empty() {
        return 0.0;
    }
    let known: HashSet<String> = snippets.iter().flat_map(|s| words(&s.content)).collect();
    let covered = answer_words.iter().filter(|w| known.contains(*w)).count();
    covered as f64 / answer_words.len() as f64
}

fn build_system_prompt(snippets: &[Snippet], language: &str) -> String {
    let mut context = String::new();
    for (i, snippet) in snippets.iter().enumerate() {
        context.push_str(&format!("[Фрагмент {}]\n{}\n\n", i + 1, snippet.content.trim()));
    }
    format!(
        "Ты ассистент службы поддержки телеком-оператора. Отвечай на языке {language}, \
кратко (2-4 предложения), используя ТОЛЬКО факты из фрагментов базы знаний ниже. \
Не добавляй сведений, которых нет во фрагментах, и не перечисляй источники.\n\
Ответь JSON-объектом с полями: answer (текст для клиента), resolution_steps (массив шагов), \
need_on_site (true, если нужен выезд специалиста), confidence (0-1).\n\
Если во фрагментах нет ответа или требуется вмешательство сотрудника, добавь в конец поля answer блок:\n\
[TICKET_REQUIRED]\nCONFIDENCE: <0.0-1.0>\nNEEDS_TICKET: true\nREASON: <причина>\n\n\
Фрагменты:\n{context}"
    )
}

#[derive(Debug, Deserialize)]
struct RawAnswer {
    answer: Option<String>,
    resolution_steps: Option<Vec<String>>,
    need_on_site: Option<bool>,
    confidence: Option<f64>,
}

/// Turns raw model output into a clean answer; plain-text replies are accepted too.
pub fn parse_answer(raw: &str) -> GeneratedAnswer {
    let parsed = serde_json::from_str::<RawAnswer>(&extract_json(raw)).ok();
    let (text, steps, need_on_site, confidence) = match parsed {
        Some(p) => (
            p.answer.unwrap_or_default(),
            p.resolution_steps.unwrap_or_default(),
            p.need_on_site.unwrap_or(false),
            p.confidence.unwrap_or(0.5),
        ),
        None => (raw.to_string(), Vec::new(), false, 0.5),
    };

    let (visible, directive) = split_directive(&text);
    GeneratedAnswer {
        answer: strip_citations(&visible),
        resolution_steps: steps,
        need_on_site,
        confidence: confidence.clamp(0.0, 1.0),
        directive,
    }
}

pub struct LlmAnswerGenerator {
    llm: Arc<dyn LLMProvider>,
}

impl LlmAnswerGenerator {
    pub fn new(llm: Arc<dyn LLMProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    async fn generate(
        &self,
        query: &str,
        snippets: &[Snippet],
        history: &[ChatMessage],
        language: &str,
    ) -> Outcome<GeneratedAnswer> {
        if snippets.is_empty() {
            return Outcome::Live(GeneratedAnswer::without_knowledge());
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(build_system_prompt(snippets, language)));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(query));

        let raw = match self
            .llm
            .generate(&messages, &json!({"temperature": 0.5, "json": true}))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("[GENERATOR] provider failed, using fallback answer: {}", e);
                return Outcome::fallback(GeneratedAnswer::fallback(), e.to_string());
            }
        };

        let mut generated = parse_answer(&raw);
        if !generated.answer.is_empty() {
            let grounding = grounding_score(&generated.answer, snippets);
            debug!("[GENERATOR] grounding score {:.2}", grounding);
            if grounding < MIN_GROUNDING {
                warn!(
                    "[GENERATOR] answer weakly grounded ({:.2}), capping confidence",
                    grounding
                );
                generated.confidence = generated.confidence.min(grounding);
            }
        }
        Outcome::Live(generated)
    }

    async fn summarize(&self, text: &str, language: &str) -> Outcome<String> {
        let prompt = format!(
            "Составь краткое резюме обращения (1-3 предложения) на языке {}:\n\n{}",
            language, text
        );
        match self
            .llm
            .generate(
                &[ChatMessage::user(prompt)],
                &json!({"temperature": 0.3, "max_tokens": 150}),
            )
            .await
        {
            Ok(summary) if !summary.trim().is_empty() => Outcome::Live(summary.trim().to_string()),
            Ok(_) => Outcome::fallback(
                truncate_chars(text, SUMMARY_FALLBACK_CHARS),
                "empty summary",
            ),
            Err(e) => {
                warn!("[GENERATOR] summary failed, truncating description: {}", e);
                Outcome::fallback(truncate_chars(text, SUMMARY_FALLBACK_CHARS), e.to_string())
            }
        }
    }
}
