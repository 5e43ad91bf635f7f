use orbitr_protocol::{Severity, StandardizedEvent};
use orbitr_state::priority::*;
use serde_json::json;

fn event(event_type: &str, severity: Severity) -> StandardizedEvent {
    StandardizedEvent::new(event_type, "test").with_severity(severity)
}

#[test]
fn test_prioritize_base_from_severity() {
    assert_eq!(prioritize(&event("login", Severity::Critical)), 1);
    assert_eq!(prioritize(&event("login", Severity::High)), 2);
    assert_eq!(prioritize(&event("login", Severity::Medium)), 3);
    assert_eq!(prioritize(&event("login", Severity::Low)), 4);
}

#[test]
fn test_prioritize_boosts_security_and_production() {
    assert_eq!(prioritize(&event("unauthorized_access", Severity::Low)), 3);
    let prod = event("security_scan", Severity::Low).with_payload(json!({"env": "production"}));
    assert_eq!(prioritize(&prod), 2, "two boosts");
    let critical = event("breach", Severity::Critical).with_payload(json!({"host": "prod-1"}));
    assert_eq!(prioritize(&critical), 1, "never below 1");
}

#[test]
fn test_dequeue_serves_most_urgent_then_fifo() {
    let q = EventQueue::new(10);
    let mut first_medium = event("a", Severity::Medium);
    first_medium.event_id = "m1".into();
    let mut second_medium = event("b", Severity::Medium);
    second_medium.event_id = "m2".into();
    q.enqueue(first_medium);
    q.enqueue(event("c", Severity::Low));
    q.enqueue(second_medium);
    q.enqueue(event("d", Severity::Critical));

    assert_eq!(q.dequeue().unwrap().priority, 1);
    assert_eq!(q.dequeue().unwrap().event.event_id, "m1");
    assert_eq!(q.dequeue().unwrap().event.event_id, "m2");
    assert_eq!(q.dequeue().unwrap().priority, 4);
    assert!(q.dequeue().is_none());
    assert_eq!(q.stats().processed, 4);
}

#[test]
fn test_full_queue_evicts_only_for_more_urgent() {
    let q = EventQueue::new(2);
    q.enqueue(event("a", Severity::Low));
    q.enqueue(event("b", Severity::Medium));

    assert!(q.enqueue(event("c", Severity::Low)).is_none(), "equal priority is dropped");
    assert_eq!(q.enqueue(event("d", Severity::Critical)), Some(1));

    let stats = q.stats();
    assert_eq!(stats.current_size, 2);
    assert_eq!(stats.dropped, 2, "one drop plus one eviction");
    let by = q.by_priority();
    assert_eq!(by["Low"], 0, "the low entry was evicted");
    assert_eq!(by["Critical"], 1);
    assert_eq!(by["Medium"], 1);
}
