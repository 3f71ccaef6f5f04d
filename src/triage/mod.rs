//! Auto-resolve or escalate decisions for incoming messages.

pub mod engine;
pub mod policy;
pub mod rules;

pub use engine::{ContactInfo, TriageEngine, TriageError, TriageOutcome, TriageRequest, TICKET_ACKNOWLEDGEMENT};
pub use policy::{decide, DecisionInputs, EscalationReason, TriageDecision};
pub use rules::RoutingDecision;
