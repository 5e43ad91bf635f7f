use orbitr_protocol::*;
use serde_json::json;

#[test]
fn test_event_defaults_from_minimal_json() {
    let ev: StandardizedEvent = serde_json::from_value(json!({
        "event_type": "ssh_login",
        "source_system": "bastion",
    }))
    .unwrap();
    assert_eq!(ev.severity, Severity::Medium);
    assert_eq!(ev.domain, Domain::Unknown);
    assert!(!ev.event_id.is_empty());
    assert_ne!(ev.event_id, ev.correlation_id, "ids are generated independently");
    assert!(ev.timestamp > 0.0);
}

#[test]
fn test_normalize_infers_domain_from_event_type() {
    let cases = [
        ("ssh_login", Domain::Security),
        ("AccessGranted", Domain::Security),
        ("billing_reconciliation", Domain::Financial),
        ("cpu_metric", Domain::Infrastructure),
        ("policy_change", Domain::Compliance),
        ("deployment", Domain::Unknown),
    ];
    for (event_type, expected) in cases {
        let mut ev = StandardizedEvent::new(event_type, "test");
        ev.normalize();
        assert_eq!(ev.domain, expected, "domain for {}", event_type);
    }
}

#[test]
fn test_normalize_keeps_explicit_domain() {
    let mut ev = StandardizedEvent::new("ssh_login", "test").with_domain(Domain::Financial);
    ev.normalize();
    assert_eq!(ev.domain, Domain::Financial);
}

#[test]
fn test_validate_rejects_empty_fields_and_bad_risk() {
    assert!(StandardizedEvent::new("", "src").validate().is_err());
    assert!(StandardizedEvent::new("x", " ").validate().is_err());
    let mut ev = StandardizedEvent::new("x", "src");
    ev.risk_score = 1.5;
    assert!(ev.validate().is_err());
    ev.risk_score = 1.0;
    assert!(ev.validate().is_ok());
}

#[test]
fn test_actor_and_resource_hints() {
    let ev = StandardizedEvent::new("access", "iam")
        .with_payload(json!({"username": "alice", "target": "prod-db-01"}));
    assert_eq!(ev.actor_hint().as_deref(), Some("alice"));
    assert_eq!(ev.resource_hint().as_deref(), Some("prod-db-01"));

    let mut explicit = ev.clone();
    explicit.actor_id = Some("bob".into());
    assert_eq!(explicit.actor_hint().as_deref(), Some("bob"));
}

#[test]
fn test_finding_builder_clamps_confidence() {
    let f = AgentFinding::new(AGENT_SECURITY_WATCHDOG, "x", "t", Severity::High, 1.7)
        .evidence("k", "v")
        .remediation("fix it");
    assert_eq!(f.confidence, 1.0);
    assert_eq!(f.evidence["k"], json!("v"));
    assert!((f.risk() - 0.8).abs() < 1e-9);
}

#[test]
fn test_severity_serializes_as_title_case() {
    let v = serde_json::to_value(Severity::Critical).unwrap();
    assert_eq!(v, json!("Critical"));
    let parsed: Severity = serde_json::from_value(json!("high")).unwrap();
    assert_eq!(parsed, Severity::High);
}
