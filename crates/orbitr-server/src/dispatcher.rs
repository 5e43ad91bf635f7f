//! Background workers: the queue drain and the periodic sweeper.

use std::time::Duration;

use orbitr_protocol::now_unix;

use crate::realtime::EVENT_SYSTEM_HEALTH;
use crate::state::AppState;

const IDLE_POLL: Duration = Duration::from_millis(200);
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Start both workers on the current runtime.
pub fn spawn_workers(app: &AppState) {
    tokio::spawn(drain_queue(app.clone()));
    tokio::spawn(sweep(app.clone()));
}

/// Serve the ingestion queue in priority order, forever.
pub async fn drain_queue(app: AppState) {
    loop {
        if !drain_once(&app).await {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }
}

/// Process one queued event. Returns `false` when the queue was empty.
pub async fn drain_once(app: &AppState) -> bool {
    let Some(queued) = app.queue.dequeue() else {
        return false;
    };
    let waited_ms = ((now_unix() - queued.enqueued_at) * 1000.0).max(0.0);
    let event_id = queued.event.event_id.clone();
    match app.process_event(queued.event).await {
        Ok(outcome) => tracing::debug!(
            event_id = %event_id,
            priority = queued.priority,
            waited_ms,
            workflow = outcome.workflow.is_some(),
            "Queued event processed"
        ),
        Err(e) => tracing::warn!(event_id = %event_id, error = %e, "Queued event failed"),
    }
    true
}

/// Apply workflow deadlines and publish a health snapshot.
pub async fn sweep(app: AppState) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        sweep_once(&app);
    }
}

pub fn sweep_once(app: &AppState) {
    match app.workflows.expire_stale(now_unix()) {
        Ok(changed) if !changed.is_empty() => {
            tracing::info!(count = changed.len(), "Workflows expired or escalated")
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Workflow deadline sweep failed"),
    }
    app.hub.publish(EVENT_SYSTEM_HEALTH, app.health());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrbitrConfig;
    use orbitr_protocol::{Severity, StandardizedEvent};
    use orbitr_state::{AuditStore, RulesEngine};

    fn app() -> AppState {
        AppState::with_parts(OrbitrConfig::default(), AuditStore::open_in_memory().unwrap(), RulesEngine::with_builtins(), None)
    }

    #[tokio::test]
    async fn test_drain_serves_most_urgent_first() {
        let app = app();
        let low = StandardizedEvent::new("ticket_updated", "jira").with_severity(Severity::Low);
        let critical = StandardizedEvent::new("ssh_login", "bastion").with_severity(Severity::Critical);
        let critical_id = critical.correlation_id.clone();
        let low_id = low.correlation_id.clone();
        app.queue.enqueue(low).unwrap();
        app.queue.enqueue(critical).unwrap();

        assert!(drain_once(&app).await);
        assert!(app.store.audit_by_correlation(&critical_id).unwrap().is_some(), "critical served first");
        assert!(app.store.audit_by_correlation(&low_id).unwrap().is_none());

        assert!(drain_once(&app).await);
        assert!(!drain_once(&app).await, "queue is empty");
        assert_eq!(app.queue.stats().processed, 2);
    }

    #[test]
    fn test_sweep_publishes_health() {
        let app = app();
        let mut rx = app.hub.subscribe();
        sweep_once(&app);
        let message = rx.try_recv().unwrap();
        assert_eq!(message.event, EVENT_SYSTEM_HEALTH);
        assert_eq!(message.data["status"], "healthy");
    }
}
