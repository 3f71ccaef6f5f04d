//! Ticket status transitions.
//!
//! ```text
//! new ──accept/assign──▶ accepted ──start_work──▶ in_progress
//!  │ \                      │  \                      │
//!  │  auto_resolve          │   request_on_site ──▶ on_site
//!  │      ▼                 │                         │
//!  │  auto_resolved         └── complete_remote ──▶ resolved ──close──▶ closed
//!  └──escalate──▶ escalated ──accept──▶ accepted
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::models::{Ticket, TicketStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketAction {
    Accept,
    Assign,
    AutoResolve,
    Escalate,
    StartWork,
    RequestOnSite,
    CompleteRemote,
    Close,
}

impl TicketAction {
    /// Action that moves a ticket into `target`, used by status updates.
    pub fn for_target(target: TicketStatus) -> Option<Self> {
        match target {
            TicketStatus::New => None,
            TicketStatus::Accepted => Some(Self::Accept),
            TicketStatus::InProgress => Some(Self::StartWork),
            TicketStatus::Resolved => Some(Self::CompleteRemote),
            TicketStatus::AutoResolved => Some(Self::AutoResolve),
            TicketStatus::Escalated => Some(Self::Escalate),
            TicketStatus::OnSite => Some(Self::RequestOnSite),
            TicketStatus::Closed => Some(Self::Close),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot {action:?} a ticket in status {from}")]
pub struct LifecycleError {
    pub from: TicketStatus,
    pub action: TicketAction,
}

/// Next status for `action` taken in `current`, or an error for an undefined edge.
pub fn next_status(current: TicketStatus, action: TicketAction) -> Result<TicketStatus, LifecycleError> {
    use TicketAction as A;
    use TicketStatus as S;

    let next = match (current, action) {
        (S::New | S::Escalated, A::Accept) => S::Accepted,
        (S::New | S::Escalated, A::Assign) => S::Accepted,
        (S::Accepted | S::InProgress | S::OnSite, A::Assign) => current,
        (S::New, A::AutoResolve) => S::AutoResolved,
        (S::New | S::Accepted | S::InProgress, A::Escalate) => S::Escalated,
        (S::New | S::Accepted | S::InProgress | S::Escalated, A::StartWork) => S::InProgress,
        (S::Accepted | S::InProgress | S::Escalated, A::RequestOnSite) => S::OnSite,
        (S::Accepted | S::InProgress | S::Escalated | S::OnSite, A::CompleteRemote) => S::Resolved,
        (S::Resolved | S::Escalated | S::OnSite, A::Close) => S::Closed,
        _ => {
            return Err(LifecycleError {
                from: current,
                action,
            })
        }
    };
    Ok(next)
}

/// Status change produced by [`apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TicketStatus,
    pub to: TicketStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Applies `action` to the ticket together with the field side effects of the edge.
pub fn apply(ticket: &mut Ticket, action: TicketAction, now: DateTime<Utc>) -> Result<Transition, LifecycleError> {
    let from = ticket.status;
    let to = next_status(from, action)?;

    match action {
        TicketAction::Accept | TicketAction::Assign if to == TicketStatus::Accepted => {
            if ticket.first_response_at.is_none() {
                ticket.first_response_at = Some(now);
            }
        }
        TicketAction::AutoResolve => ticket.auto_resolved = true,
        TicketAction::RequestOnSite => ticket.need_on_site = true,
        _ => {}
    }

    ticket.status = to;
    ticket.closed_at = if to.is_closed() {
        ticket.closed_at.or(Some(now))
    } else {
        None
    };
    ticket.updated_at = now;

    Ok(Transition { from, to })
}
