#[cfg(test)]
mod sla_monitor_integration_tests {
    use chrono::{Duration, Utc};
    use deskserver::config::SlaConfig;
    use deskserver::shared::models::{Ticket, TicketSource, TicketStatus};
    use deskserver::sla::{SlaMonitor, ViolationType};
    use deskserver::store::{MemoryStore, SupportStore};
    use std::sync::Arc;

    fn ticket_with_deadlines(status: TicketStatus, accept_in: i64, remote_in: i64) -> Ticket {
        let now = Utc::now();
        let mut ticket = Ticket::new(TicketSource::Portal, "Нет интернета", "С утра не работает", now);
        ticket.status = status;
        ticket.sla_accept_deadline = Some(now + Duration::minutes(accept_in));
        ticket.sla_remote_deadline = Some(now + Duration::minutes(remote_in));
        ticket
    }

    fn monitor(store: &Arc<MemoryStore>) -> SlaMonitor {
        SlaMonitor::new(store.clone(), &SlaConfig::default())
    }

    #[tokio::test]
    async fn test_overdue_new_ticket_is_escalated_once() {
        let store = Arc::new(MemoryStore::new());
        let ticket = ticket_with_deadlines(TicketStatus::New, -5, 55);
        store.create_ticket(&ticket, &[]).await.expect("create");

        let violations = monitor(&store).run_pass(Utc::now()).await.expect("pass");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, ViolationType::AcceptDeadline);

        let stored = store.get_ticket(ticket.id).await.expect("ticket");
        assert_eq!(stored.status, TicketStatus::Escalated);
        let history = store.list_history(ticket.id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_value.as_deref(), Some("new"));
        assert_eq!(history[0].new_value.as_deref(), Some("escalated"));

        let again = monitor(&store).run_pass(Utc::now()).await.expect("second pass");
        assert!(again.is_empty());
        assert_eq!(
            store.get_ticket(ticket.id).await.expect("ticket").status,
            TicketStatus::Escalated
        );
    }

    #[tokio::test]
    async fn test_overdue_remote_work_goes_on_site() {
        let store = Arc::new(MemoryStore::new());
        let ticket = ticket_with_deadlines(TicketStatus::InProgress, -70, -10);
        store.create_ticket(&ticket, &[]).await.expect("create");

        let violations = monitor(&store).run_pass(Utc::now()).await.expect("pass");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].violation_type, ViolationType::RemoteDeadline);

        let stored = store.get_ticket(ticket.id).await.expect("ticket");
        assert_eq!(stored.status, TicketStatus::OnSite);
        assert!(stored.need_on_site);
    }

    #[tokio::test]
    async fn test_tickets_within_deadlines_are_untouched() {
        let store = Arc::new(MemoryStore::new());
        let fresh = ticket_with_deadlines(TicketStatus::New, 10, 70);
        let accepted = ticket_with_deadlines(TicketStatus::Accepted, -5, 30);
        let closed = ticket_with_deadlines(TicketStatus::Closed, -90, -30);
        for ticket in [&fresh, &accepted, &closed] {
            store.create_ticket(ticket, &[]).await.expect("create");
        }

        let violations = monitor(&store).run_pass(Utc::now()).await.expect("pass");
        assert!(violations.is_empty());
        assert_eq!(store.get_ticket(fresh.id).await.expect("fresh").status, TicketStatus::New);
        assert_eq!(
            store.get_ticket(accepted.id).await.expect("accepted").status,
            TicketStatus::Accepted
        );
        assert_eq!(store.get_ticket(closed.id).await.expect("closed").status, TicketStatus::Closed);
    }
}
