use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use uuid::Uuid;

use crate::config::SlaConfig;
use crate::shared::models::{Ticket, TicketHistory};
use crate::store::{StoreError, SupportStore};
use crate::tickets::lifecycle::{apply, TicketAction};

pub const ACCEPT_DEADLINE_REASON: &str = "SLA accept deadline passed";
pub const REMOTE_DEADLINE_REASON: &str = "SLA remote deadline passed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlaDeadlines {
    pub accept: DateTime<Utc>,
    pub remote: DateTime<Utc>,
}

/// Deadlines fixed at classification time.
pub fn compute_deadlines(classified_at: DateTime<Utc>, accept_minutes: i64, remote_minutes: i64) -> SlaDeadlines {
    let accept = classified_at + ChronoDuration::minutes(accept_minutes);
    SlaDeadlines {
        accept,
        remote: accept + ChronoDuration::minutes(remote_minutes),
    }
}

pub fn set_deadlines(ticket: &mut Ticket, deadlines: SlaDeadlines) {
    ticket.sla_accept_deadline = Some(deadlines.accept);
    ticket.sla_remote_deadline = Some(deadlines.remote);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    AcceptDeadline,
    RemoteDeadline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaViolation {
    pub ticket_id: Uuid,
    pub violation_type: ViolationType,
    pub deadline: DateTime<Utc>,
}

/// Periodic enforcement of accept and remote deadlines.
pub struct SlaMonitor {
    store: Arc<dyn SupportStore>,
    period: Duration,
}

impl SlaMonitor {
    pub fn new(store: Arc<dyn SupportStore>, config: &SlaConfig) -> Self {
        Self {
            store,
            period: config.check_interval,
        }
    }

    /// Runs passes forever. A pass always finishes before the next tick is awaited.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("[SLA] monitor started, period {:?}", self.period);
            let mut tick = interval(self.period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                match self.run_pass(Utc::now()).await {
                    Ok(violations) if !violations.is_empty() => {
                        info!("[SLA] pass handled {} violations", violations.len());
                    }
                    Ok(_) => debug!("[SLA] pass clean"),
                    Err(e) => error!("[SLA] pass failed: {}", e),
                }
            }
        })
    }

    /// One pass over overdue tickets. Each ticket is updated on its own; a failure
    /// on one ticket is logged and the rest of the batch continues.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<Vec<SlaViolation>, StoreError> {
        let mut violations = Vec::new();

        for ticket in self.store.tickets_past_accept_deadline(now).await? {
            match self.escalate(ticket, now).await {
                Ok(Some(violation)) => violations.push(violation),
                Ok(None) => {}
                Err((id, e)) => error!("[SLA] failed to escalate ticket {}: {}", id, e),
            }
        }

        for ticket in self.store.tickets_past_remote_deadline(now).await? {
            match self.send_on_site(ticket, now).await {
                Ok(Some(violation)) => violations.push(violation),
                Ok(None) => {}
                Err((id, e)) => error!("[SLA] failed to move ticket {} on site: {}", id, e),
            }
        }

        Ok(violations)
    }

    async fn escalate(&self, mut ticket: Ticket, now: DateTime<Utc>) -> Result<Option<SlaViolation>, (Uuid, String)> {
        let id = ticket.id;
        let Some(deadline) = ticket.sla_accept_deadline else {
            return Ok(None);
        };
        let transition = apply(&mut ticket, TicketAction::Escalate, now).map_err(|e| (id, e.to_string()))?;

        match self.store.update_ticket(&ticket, transition.from).await {
            Ok(()) => {}
            Err(StoreError::Conflict(msg)) => {
                debug!("[SLA] ticket {} changed before escalation: {}", id, msg);
                return Ok(None);
            }
            Err(e) => return Err((id, e.to_string())),
        }

        let entry = TicketHistory::status_change(id, transition.from, transition.to, Some(ACCEPT_DEADLINE_REASON), now);
        if let Err(e) = self.store.append_history(&entry).await {
            warn!("[SLA] escalated ticket {} but history write failed: {}", id, e);
        }
        warn!("[SLA] ticket {} escalated, accept deadline {} passed", id, deadline);

        Ok(Some(SlaViolation {
            ticket_id: id,
            violation_type: ViolationType::AcceptDeadline,
            deadline,
        }))
    }

    async fn send_on_site(&self, mut ticket: Ticket, now: DateTime<Utc>) -> Result<Option<SlaViolation>, (Uuid, String)> {
        let id = ticket.id;
        let Some(deadline) = ticket.sla_remote_deadline else {
            return Ok(None);
        };
        let transition =
            apply(&mut ticket, TicketAction::RequestOnSite, now).map_err(|e| (id, e.to_string()))?;

        match self.store.update_ticket(&ticket, transition.from).await {
            Ok(()) => {}
            Err(StoreError::Conflict(msg)) => {
                debug!("[SLA] ticket {} changed before on-site move: {}", id, msg);
                return Ok(None);
            }
            Err(e) => return Err((id, e.to_string())),
        }

        let entry = TicketHistory::status_change(id, transition.from, transition.to, Some(REMOTE_DEADLINE_REASON), now);
        if let Err(e) = self.store.append_history(&entry).await {
            warn!("[SLA] moved ticket {} on site but history write failed: {}", id, e);
        }
        warn!("[SLA] ticket {} needs on-site visit, remote deadline {} passed", id, deadline);

        Ok(Some(SlaViolation {
            ticket_id: id,
            violation_type: ViolationType::RemoteDeadline,
            deadline,
        }))
    }
}
