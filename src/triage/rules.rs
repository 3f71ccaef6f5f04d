//! Keyword routing for escalated conversations.
//!
//! One ordered table maps conversation text to category, subcategory, department
//! and a base priority; priority adjustments are applied afterwards.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::llm::ChatMessage;
use crate::shared::models::{ClientType, Priority};

fn compile(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){}", pattern)).expect("Invalid routing rule regex")
}

struct SubRule {
    pattern: Regex,
    subcategory: &'static str,
    priority: Priority,
    department: Option<&'static str>,
}

struct CategoryRule {
    category: &'static str,
    pattern: Regex,
    department: &'static str,
    sub_rules: Vec<SubRule>,
    default_subcategory: &'static str,
}

fn sub(pattern: &str, subcategory: &'static str, priority: Priority) -> SubRule {
    SubRule {
        pattern: compile(pattern),
        subcategory,
        priority,
        department: None,
    }
}

static RULES: LazyLock<Vec<CategoryRule>> = LazyLock::new(|| {
    vec![
        CategoryRule {
            category: "network",
            pattern: compile(r"интернет|подключ|соединен|связь|\bсеть|network|internet|wi-?fi"),
            department: "TechSupport",
            sub_rules: vec![
                sub(r"скорост|медлен|тормоз|\blag|speed", "internet_speed", Priority::High),
                sub(
                    r"нет интернет|не работает|отключ|disconnect",
                    "connection_issue",
                    Priority::Critical,
                ),
                SubRule {
                    pattern: compile(r"\bvpn"),
                    subcategory: "vpn_access",
                    priority: Priority::Medium,
                    department: Some("Network"),
                },
            ],
            default_subcategory: "general_network",
        },
        CategoryRule {
            category: "telephony",
            pattern: compile(r"телефон|звонок|звонки|telephony|\bcall|phone"),
            department: "TechSupport",
            sub_rules: vec![sub(
                r"не звон|не работает|не могу позвонить",
                "call_issue",
                Priority::High,
            )],
            default_subcategory: "general_telephony",
        },
        CategoryRule {
            category: "tv",
            pattern: compile(r"телевизор|\bтв\b|\btv\b|канал|программа"),
            department: "TechSupport",
            sub_rules: vec![sub(
                r"не работает|нет сигнал|не показывает",
                "signal_issue",
                Priority::High,
            )],
            default_subcategory: "general_tv",
        },
        CategoryRule {
            category: "billing",
            pattern: compile(r"оплат|плат[её]ж|сч[её]т|биллинг|billing|тариф|цена|стоимость|деньги"),
            department: "Billing",
            sub_rules: vec![sub(
                r"не могу оплат|проблем|ошибк|не проходит",
                "payment_issue",
                Priority::High,
            )],
            default_subcategory: "general_billing",
        },
        CategoryRule {
            category: "equipment",
            pattern: compile(r"оборудован|роутер|модем|устройств|equipment|device"),
            department: "TechSupport",
            sub_rules: vec![sub(
                r"не работает|сломал|поломк|замен",
                "equipment_failure",
                Priority::High,
            )],
            default_subcategory: "general_equipment",
        },
    ]
});

static URGENT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"срочно|критич|urgent|critical|не работает|полностью"));
static IMPORTANT_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"важно|important|проблем|problem"));
static QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"вопрос|информац|уточнени|question"));

static PHYSICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(concat!(
        r"(роутер|модем|оборудование|приставка)\s+(не\s+работает|сломал(ся|ось|ась)?)",
        r"|не\s+работает\s+(роутер|модем|оборудование|приставка)",
        r"|сломал(ся|ось|ась)?\s+(роутер|модем|оборудование|приставка)",
        r"|диагностика оборудования|техническая поломка|требуется ремонт",
        r"|нужен выезд|выезд мастера|помощь специалиста на месте|замена оборудования"
    ))
});

static INFORMATIONAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(concat!(
        r"\?|^\s*(могу ли|можно ли|как|что|где|когда|сколько|какие|какой|какая|каков)\b",
        r"|информац|узнать|расскажи|объясни|вопрос"
    ))
});

static CORPORATE_NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"не\s+корпоратив|не\s+юридическ|частн|физическое лицо|^\s*нет\b")
});
static CORPORATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"корпоратив|бизнес|компани|организаци|юридическое лицо|^\s*да\b")
});

/// Routing derived from the keyword table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingDecision {
    pub category: String,
    pub subcategory: String,
    pub department: String,
    pub priority: Priority,
}

fn conversation_text(message: &str, history: &[ChatMessage]) -> String {
    let mut text = message.to_lowercase();
    for turn in history.iter().filter(|t| t.role == "user") {
        text.push(' ');
        text.push_str(&turn.content.to_lowercase());
    }
    text
}

/// Evaluates the rule table once; the first matching category wins.
pub fn route(message: &str, history: &[ChatMessage], client_type: ClientType) -> RoutingDecision {
    let text = conversation_text(message, history);

    let mut decision = RoutingDecision {
        category: "other".to_string(),
        subcategory: "general".to_string(),
        department: "TechSupport".to_string(),
        priority: Priority::Medium,
    };

    if let Some(rule) = RULES.iter().find(|r| r.pattern.is_match(&text)) {
        decision.category = rule.category.to_string();
        decision.department = rule.department.to_string();
        decision.subcategory = rule.default_subcategory.to_string();
        if let Some(sub_rule) = rule.sub_rules.iter().find(|s| s.pattern.is_match(&text)) {
            decision.subcategory = sub_rule.subcategory.to_string();
            decision.priority = sub_rule.priority;
            if let Some(department) = sub_rule.department {
                decision.department = department.to_string();
            }
        }
    }

    decision.priority = adjust_priority(decision.priority, &text, client_type);
    decision
}

fn adjust_priority(base: Priority, text: &str, client_type: ClientType) -> Priority {
    let mut priority = if URGENT_RE.is_match(text) {
        Priority::Critical
    } else if IMPORTANT_RE.is_match(text) {
        base.at_least(Priority::High)
    } else if QUESTION_RE.is_match(text) && base == Priority::Medium {
        Priority::Low
    } else {
        base
    };

    if client_type == ClientType::Corporate {
        priority = priority.at_least(Priority::High);
    }
    priority
}

/// Equipment failure or on-site work phrased in the current message only.
pub fn needs_physical_intervention(message: &str) -> bool {
    PHYSICAL_RE.is_match(&message.to_lowercase())
}

pub fn is_informational(message: &str) -> bool {
    INFORMATIONAL_RE.is_match(&message.to_lowercase())
}

/// Client type stated in the conversation; negations win over corporate keywords.
pub fn extract_client_type(message: &str, history: &[ChatMessage]) -> ClientType {
    let mut found = None;
    for text in history
        .iter()
        .filter(|t| t.role == "user")
        .map(|t| t.content.as_str())
        .chain(std::iter::once(message))
    {
        let lower = text.to_lowercase();
        if CORPORATE_NEGATIVE_RE.is_match(&lower) {
            found = Some(ClientType::Private);
        } else if CORPORATE_RE.is_match(&lower) {
            found = Some(ClientType::Corporate);
        }
    }
    found.unwrap_or_default()
}

/// Display-only category for interactions stored without one.
pub fn display_category(message: &str) -> &'static str {
    static DISPLAY: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
        vec![
            ("billing", compile(r"тариф|цена|стоимость|оплат|биллинг")),
            ("network", compile(r"интернет|сеть|подключ|скорост")),
            ("telephony", compile(r"телефон|звонок")),
            ("tv", compile(r"\bтв\b|телевизор|канал")),
            ("equipment", compile(r"роутер|модем|оборудован")),
        ]
    });
    let lower = message.to_lowercase();
    DISPLAY
        .iter()
        .find(|(_, re)| re.is_match(&lower))
        .map(|(category, _)| *category)
        .unwrap_or("other")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_failure_routes_to_equipment() {
        let decision = route("у меня не работает роутер", &[], ClientType::Private);
        assert_eq!(decision.category, "equipment");
        assert_eq!(decision.subcategory, "equipment_failure");
        assert!(decision.priority >= Priority::High);
    }

    #[test]
    fn test_rule_order_network_before_equipment() {
        let decision = route("нет интернета, роутер мигает", &[], ClientType::Private);
        assert_eq!(decision.category, "network");
        assert_eq!(decision.subcategory, "connection_issue");
        assert_eq!(decision.priority, Priority::Critical);
    }

    #[test]
    fn test_vpn_goes_to_network_department() {
        let decision = route("не подключается VPN к офисной сети", &[], ClientType::Private);
        assert_eq!(decision.subcategory, "vpn_access");
        assert_eq!(decision.department, "Network");
    }

    #[test]
    fn test_billing_question_is_low_priority() {
        let decision = route("вопрос по тарифу", &[], ClientType::Private);
        assert_eq!(decision.category, "billing");
        assert_eq!(decision.department, "Billing");
        assert_eq!(decision.priority, Priority::Low);
    }

    #[test]
    fn test_corporate_client_at_least_high() {
        let private = route("вопрос по тарифу", &[], ClientType::Private);
        let corporate = route("вопрос по тарифу", &[], ClientType::Corporate);
        assert_eq!(private.priority, Priority::Low);
        assert_eq!(corporate.priority, Priority::High);

        let critical = route("срочно нет интернета", &[], ClientType::Corporate);
        assert_eq!(critical.priority, Priority::Critical);
    }

    #[test]
    fn test_unmatched_is_other() {
        let decision = route("здравствуйте", &[], ClientType::Private);
        assert_eq!(decision.category, "other");
        assert_eq!(decision.department, "TechSupport");
        assert_eq!(decision.priority, Priority::Medium);
    }

    #[test]
    fn test_history_contributes_to_routing() {
        let history = vec![ChatMessage::user("у меня тв приставка"), ChatMessage::assistant("Понял")];
        let decision = route("ничего не показывает", &history, ClientType::Private);
        assert_eq!(decision.category, "tv");
        assert_eq!(decision.subcategory, "signal_issue");
    }

    #[test]
    fn test_physical_intervention_both_word_orders() {
        assert!(needs_physical_intervention("у меня не работает роутер"));
        assert!(needs_physical_intervention("Модем не работает с утра"));
        assert!(needs_physical_intervention("Нужен выезд мастера"));
        assert!(!needs_physical_intervention("какие роутеры вы продаёте?"));
    }

    #[test]
    fn test_informational_detection() {
        assert!(is_informational("какие тарифы на интернет?"));
        assert!(is_informational("Как оплатить услуги"));
        assert!(!is_informational("у меня не работает роутер"));
    }

    #[test]
    fn test_client_type_extraction() {
        let history = vec![ChatMessage::user("Мы компания, юридическое лицо")];
        assert_eq!(extract_client_type("не работает интернет", &history), ClientType::Corporate);
        assert_eq!(
            extract_client_type("нет, не корпоративный", &history),
            ClientType::Private
        );
        assert_eq!(extract_client_type("привет", &[]), ClientType::Private);
    }

    #[test]
    fn test_display_category() {
        assert_eq!(display_category("Сколько стоит тариф?"), "billing");
        assert_eq!(display_category("не работает телевизор"), "tv");
        assert_eq!(display_category("спасибо"), "other");
    }
}
