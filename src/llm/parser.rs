//! Parsing helpers for model output: JSON extraction, the escalate directive and
//! citation clean-up of user-visible answers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

pub const DIRECTIVE_MARKER: &str = "[TICKET_REQUIRED]";

static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CONFIDENCE:\s*([0-9]*\.?[0-9]+)").expect("Invalid confidence regex")
});
static NEEDS_TICKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)NEEDS_TICKET:\s*(true|false)").expect("Invalid needs-ticket regex")
});
static REASON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)REASON:\s*([^\n]+)").expect("Invalid reason regex"));
static INLINE_DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)CONFIDENCE:\s*([0-9]*\.?[0-9]+)\s*REASON:\s*([^\n]+)")
        .expect("Invalid inline directive regex")
});
static SOURCES_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:-{3,}\s*)?(?:Источники|Sources):.*$").expect("Invalid sources regex")
});
static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\[Информация\s+\d+\](?:\s*\(Страница\s+\d+\))?")
        .expect("Invalid citation regex")
});

/// Explicit request from the generator to open a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalateDirective {
    pub confidence: f64,
    pub reason: String,
}

pub fn extract_json(response: &str) -> String {
    let response = response.trim();

    if let Some(start) = response.find("```") {
        if let Some(json_start) = response[start..].find('{') {
            let json_part = &response[start + json_start..];
            if let Some(end) = json_part.find("```") {
                return json_part[..end].trim().to_string();
            }
        }
    }

    if let Some(start) = response.find('{') {
        if let Some(end) = response.rfind('}') {
            if end > start {
                return response[start..=end].to_string();
            }
        }
    }

    response.to_string()
}

fn parse_confidence(raw: &str) -> f64 {
    raw.parse::<f64>().unwrap_or(0.0).clamp(0.0, 1.0)
}

/// Splits the directive out of `text`, returning the visible part and the directive if
/// the model asked for a ticket. A block that says `NEEDS_TICKET: false` is removed but
/// yields no directive.
pub fn split_directive(text: &str) -> (String, Option<EscalateDirective>) {
    if let Some(pos) = text.find(DIRECTIVE_MARKER) {
        let visible = text[..pos].trim().to_string();
        let block = &text[pos + DIRECTIVE_MARKER.len()..];

        let needs_ticket = NEEDS_TICKET_RE
            .captures(block)
            .map(|c| c[1].eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        if !needs_ticket {
            return (visible, None);
        }

        let confidence = CONFIDENCE_RE
            .captures(block)
            .map(|c| parse_confidence(&c[1]))
            .unwrap_or(0.0);
        let reason = REASON_RE
            .captures(block)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        return (visible, Some(EscalateDirective { confidence, reason }));
    }

    if let Some(caps) = INLINE_DIRECTIVE_RE.captures(text) {
        let directive = EscalateDirective {
            confidence: parse_confidence(&caps[1]),
            reason: caps[2].trim().to_string(),
        };
        let visible = INLINE_DIRECTIVE_RE.replace_all(text, "").trim().to_string();
        return (visible, Some(directive));
    }

    (text.trim().to_string(), None)
}

/// Removes trailing source listings and inline citation markers.
pub fn strip_citations(text: &str) -> String {
    let without_sources = SOURCES_BLOCK_RE.replace(text, "");
    CITATION_RE.replace_all(&without_sources, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
        assert_eq!(extract_json("noise {\"b\":2} tail"), "{\"b\":2}");
        assert_eq!(extract_json("plain"), "plain");
    }

    #[test]
    fn test_split_block_directive() {
        let raw = "Мы не нашли решения.\n\n[TICKET_REQUIRED]\nCONFIDENCE: 0.85\nNEEDS_TICKET: true\nREASON: требуется выезд мастера";
        let (visible, directive) = split_directive(raw);
        assert_eq!(visible, "Мы не нашли решения.");
        let directive = directive.expect("directive");
        assert!((directive.confidence - 0.85).abs() < 1e-9);
        assert_eq!(directive.reason, "требуется выезд мастера");
    }

    #[test]
    fn test_split_block_without_ticket() {
        let raw = "Ответ.\n[TICKET_REQUIRED]\nCONFIDENCE: 0.4\nNEEDS_TICKET: false\nREASON: нет";
        let (visible, directive) = split_directive(raw);
        assert_eq!(visible, "Ответ.");
        assert!(directive.is_none());
    }

    #[test]
    fn test_split_inline_directive() {
        let raw = "Не могу помочь.\nCONFIDENCE: 1.7 REASON: нужен специалист";
        let (visible, directive) = split_directive(raw);
        assert_eq!(visible, "Не могу помочь.");
        let directive = directive.expect("directive");
        assert_eq!(directive.confidence, 1.0);
        assert!(!visible.contains("CONFIDENCE"));
    }

    #[test]
    fn test_no_directive() {
        let (visible, directive) = split_directive("  Тариф стоит 5000 тенге.  ");
        assert_eq!(visible, "Тариф стоит 5000 тенге.");
        assert!(directive.is_none());
    }

    #[test]
    fn test_strip_citations() {
        let raw = "Перезагрузите роутер [Информация 1] (Страница 3).\n\nИсточники:\n- manual.pdf";
        assert_eq!(strip_citations(raw), "Перезагрузите роутер.");
    }
}
