use serde::Serialize;

use crate::config::TriageConfig;
use crate::llm::parser::EscalateDirective;

/// Signals the auto-resolve / escalate policy is evaluated over.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionInputs {
    pub max_similarity: f64,
    /// Characters of the user-visible answer; 0 when generation fell back.
    pub answer_chars: usize,
    pub directive: Option<EscalateDirective>,
    pub physical_intervention: bool,
    pub informational: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    Directive { reason: String },
    PhysicalIntervention,
    NoRelevantKnowledge,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum TriageDecision {
    AutoResolve { confidence: f64 },
    Escalate { confidence: f64, reason: EscalationReason },
}

impl TriageDecision {
    pub fn is_escalation(&self) -> bool {
        matches!(self, Self::Escalate { .. })
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::AutoResolve { confidence } | Self::Escalate { confidence, .. } => *confidence,
        }
    }
}

/// Ordered policy; the first matching rule decides.
///
/// 1. explicit directive escalates;
/// 2. a substantive answer above the (phrasing-dependent) similarity threshold auto-resolves;
/// 3. a physical-intervention request without a substantive answer escalates;
/// 4. no relevant knowledge escalates;
/// 5. otherwise auto-resolve.
pub fn decide(inputs: &DecisionInputs, config: &TriageConfig) -> TriageDecision {
    let s_max = inputs.max_similarity.clamp(0.0, 1.0);
    let auto_confidence = s_max.max(config.min_auto_confidence);

    if let Some(directive) = &inputs.directive {
        return TriageDecision::Escalate {
            confidence: directive.confidence,
            reason: EscalationReason::Directive {
                reason: directive.reason.clone(),
            },
        };
    }

    let substantive = inputs.answer_chars > config.min_answer_chars;
    let threshold = if inputs.informational {
        config.informational_threshold
    } else {
        config.similarity_threshold
    };
    if substantive && s_max >= threshold {
        return TriageDecision::AutoResolve {
            confidence: auto_confidence,
        };
    }

    if inputs.physical_intervention && !substantive {
        return TriageDecision::Escalate {
            confidence: s_max,
            reason: EscalationReason::PhysicalIntervention,
        };
    }

    if s_max < config.similarity_threshold {
        return TriageDecision::Escalate {
            confidence: s_max,
            reason: EscalationReason::NoRelevantKnowledge,
        };
    }

    TriageDecision::AutoResolve {
        confidence: auto_confidence,
    }
}
