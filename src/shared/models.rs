use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    Accepted,
    InProgress,
    Resolved,
    AutoResolved,
    Escalated,
    OnSite,
    Closed,
}

string_enum!(TicketStatus {
    New => "new",
    Accepted => "accepted",
    InProgress => "in_progress",
    Resolved => "resolved",
    AutoResolved => "auto_resolved",
    Escalated => "escalated",
    OnSite => "on_site",
    Closed => "closed",
});

impl TicketStatus {
    /// Statuses for which `closed_at` must be set.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::AutoResolved | Self::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(Priority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl Priority {
    fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn at_least(self, floor: Priority) -> Priority {
        if self.rank() >= floor.rank() {
            self
        } else {
            floor
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    #[default]
    Portal,
    Chat,
    Email,
    Phone,
    CallAgent,
    Telegram,
}

string_enum!(TicketSource {
    Portal => "portal",
    Chat => "chat",
    Email => "email",
    Phone => "phone",
    CallAgent => "call_agent",
    Telegram => "telegram",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingErrorType {
    WrongDepartment,
    WrongCategory,
}

string_enum!(RoutingErrorType {
    WrongDepartment => "wrong_department",
    WrongCategory => "wrong_category",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Human,
    Auto,
}

string_enum!(ResponseType {
    Human => "human",
    Auto => "auto",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Corporate,
    #[default]
    Private,
}

string_enum!(ClientType {
    Corporate => "corporate",
    Private => "private",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: Uuid,
    pub source: TicketSource,
    pub subject: String,
    pub description: String,
    pub language: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub department_id: Option<Uuid>,
    pub priority: Priority,
    pub status: TicketStatus,
    pub client_type: Option<ClientType>,
    pub summary: Option<String>,
    pub assigned_to: Option<String>,
    pub auto_resolved: bool,
    pub need_on_site: bool,
    pub classification_confidence: Option<f64>,
    pub sla_accept_deadline: Option<DateTime<Utc>>,
    pub sla_remote_deadline: Option<DateTime<Utc>>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(source: TicketSource, subject: &str, description: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            subject: subject.to_string(),
            description: description.to_string(),
            language: None,
            category: None,
            subcategory: None,
            department_id: None,
            priority: Priority::Medium,
            status: TicketStatus::New,
            client_type: None,
            summary: None,
            assigned_to: None,
            auto_resolved: false,
            need_on_site: false,
            classification_confidence: None,
            sla_accept_deadline: None,
            sla_remote_deadline: None,
            first_response_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Text handed to the classifier and generator.
    pub fn full_text(&self) -> String {
        if self.subject.is_empty() {
            self.description.clone()
        } else if self.description.is_empty() {
            self.subject.clone()
        } else {
            format!("{}\n\n{}", self.subject, self.description)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl TicketMessage {
    pub fn new(ticket_id: Uuid, role: &str, content: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            role: role.to_string(),
            content: content.to_string(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketHistory {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl TicketHistory {
    pub fn status_change(
        ticket_id: Uuid,
        from: TicketStatus,
        to: TicketStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            field: "status".to_string(),
            old_value: Some(from.to_string()),
            new_value: Some(to.to_string()),
            reason: reason.map(str::to_string),
            changed_at: now,
        }
    }
}

/// One logged exchange. `ticket_created` and `ticket_id` are only ever set together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub source: TicketSource,
    pub message: String,
    pub answer: String,
    pub confidence: f64,
    pub max_similarity: f64,
    pub category: Option<String>,
    pub ticket_created: bool,
    pub ticket_id: Option<Uuid>,
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: Option<String>,
        source: TicketSource,
        message: &str,
        answer: &str,
        confidence: f64,
        max_similarity: f64,
        ticket_id: Option<Uuid>,
        response_time_ms: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            source,
            message: message.to_string(),
            answer: answer.to_string(),
            confidence,
            max_similarity,
            category: None,
            ticket_created: ticket_id.is_some(),
            ticket_id,
            response_time_ms,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationFeedback {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub predicted_category: Option<String>,
    pub actual_category: Option<String>,
    pub predicted_department_id: Option<Uuid>,
    pub actual_department_id: Option<Uuid>,
    pub predicted_priority: Option<Priority>,
    pub actual_priority: Option<Priority>,
    pub is_correct: bool,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingError {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub initial_department_id: Option<Uuid>,
    pub corrected_department_id: Option<Uuid>,
    pub initial_category: Option<String>,
    pub corrected_category: Option<String>,
    pub error_type: RoutingErrorType,
    pub created_at: DateTime<Utc>,
}

impl RoutingError {
    pub fn wrong_department(ticket: &Ticket, corrected: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            initial_department_id: ticket.department_id,
            corrected_department_id: corrected,
            initial_category: ticket.category.clone(),
            corrected_category: None,
            error_type: RoutingErrorType::WrongDepartment,
            created_at: now,
        }
    }

    pub fn wrong_category(ticket: &Ticket, corrected: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            initial_department_id: ticket.department_id,
            corrected_department_id: None,
            initial_category: ticket.category.clone(),
            corrected_category: Some(corrected.to_string()),
            error_type: RoutingErrorType::WrongCategory,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseTime {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub response_time_seconds: f64,
    pub response_type: ResponseType,
    pub created_at: DateTime<Utc>,
}

impl ResponseTime {
    pub fn since_creation(ticket: &Ticket, response_type: ResponseType, now: DateTime<Utc>) -> Self {
        let elapsed = (now - ticket.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            response_time_seconds: elapsed,
            response_type,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
    pub sla_accept_minutes: i32,
}
