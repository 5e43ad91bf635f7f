use chrono::{Local, TimeZone};
use orbitr_protocol::{Severity, StandardizedEvent};
use orbitr_state::rules::*;
use serde_json::json;

fn at_local_hour(hour: u32) -> f64 {
    Local
        .with_ymd_and_hms(2026, 3, 10, hour, 15, 0)
        .single()
        .unwrap()
        .timestamp() as f64
}

fn event(payload: serde_json::Value) -> StandardizedEvent {
    let mut ev = StandardizedEvent::new("access", "iam").with_payload(payload);
    ev.timestamp = at_local_hour(12);
    ev
}

fn ids(engine: &RulesEngine, ev: &StandardizedEvent) -> Vec<String> {
    engine.evaluate(ev).into_iter().map(|r| r.id.clone()).collect()
}

#[test]
fn test_working_hours_rule() {
    let engine = RulesEngine::with_builtins();
    let mut ev = event(json!({}));
    assert!(!ids(&engine, &ev).contains(&"POL-001".to_string()));
    ev.timestamp = at_local_hour(3);
    assert!(ids(&engine, &ev).contains(&"POL-001".to_string()));
    ev.timestamp = at_local_hour(23);
    assert!(ids(&engine, &ev).contains(&"POL-001".to_string()));
}

#[test]
fn test_change_ticket_rule_needs_high_severity_and_no_ticket() {
    let engine = RulesEngine::with_builtins();
    let ev = event(json!({})).with_severity(Severity::High);
    assert!(ids(&engine, &ev).contains(&"POL-002".to_string()));
    let ev = event(json!({"jira_id": "OPS-1"})).with_severity(Severity::High);
    assert!(!ids(&engine, &ev).contains(&"POL-002".to_string()));
    let ev = event(json!({})).with_severity(Severity::Medium);
    assert!(!ids(&engine, &ev).contains(&"POL-002".to_string()));
}

#[test]
fn test_mfa_rule_requires_explicit_false() {
    let engine = RulesEngine::with_builtins();
    let ev = event(json!({"action": "sudo rm", "mfa_present": false}));
    assert!(ids(&engine, &ev).contains(&"POL-003".to_string()));
    let ev = event(json!({"action": "sudo rm"}));
    assert!(!ids(&engine, &ev).contains(&"POL-003".to_string()), "absent MFA flag is not a violation");
    let ev = event(json!({"privileged": true, "mfa_present": false}));
    assert!(ids(&engine, &ev).contains(&"POL-003".to_string()));
}

#[test]
fn test_production_financial_sod_and_pii_rules() {
    let engine = RulesEngine::with_builtins();
    let ev = event(json!({"host": "db-prod-01"}));
    assert!(ids(&engine, &ev).contains(&"POL-004".to_string()));
    let ev = event(json!({"target": "prod-db", "justification": "INC-42"}));
    assert!(!ids(&engine, &ev).contains(&"POL-004".to_string()));

    let ev = event(json!({"mismatch_amount": 1500}));
    assert!(ids(&engine, &ev).contains(&"POL-005".to_string()));

    let ev = event(json!({"requester_id": "dave", "approver_id": "dave"}));
    assert!(ids(&engine, &ev).contains(&"POL-006".to_string()));
    let ev = event(json!({"requester_id": "dave", "approver_id": "erin"}));
    assert!(!ids(&engine, &ev).contains(&"POL-006".to_string()));

    let ev = event(json!({"table": "customer_ssn"}));
    assert!(ids(&engine, &ev).contains(&"POL-007".to_string()));
}

#[test]
fn test_load_yaml_adds_and_replaces_rules() {
    let mut engine = RulesEngine::with_builtins();
    let yaml = r#"
rules:
  - id: POL-100
    name: Root login
    description: Direct root logins are forbidden
    category: Security
    severity: High
    confidence: 0.9
    frameworks: [CIS-5.4]
    remediation: Use named accounts.
    when:
      type: field_contains
      fields: [username]
      needles: [root]
  - id: POL-007
    name: Sensitive Data Access
    description: disabled locally
    severity: Critical
    confidence: 0.9
    enabled: false
    when:
      type: payload_contains
      needles: [pii]
"#;
    let count = engine.load_str(yaml, true).unwrap();
    assert_eq!(count, 2);
    assert_eq!(engine.all_rules().len(), 8);
    assert!(engine.fingerprint().is_some());

    let ev = event(json!({"username": "root", "table": "pii"}));
    let matched = ids(&engine, &ev);
    assert!(matched.contains(&"POL-100".to_string()));
    assert!(!matched.contains(&"POL-007".to_string()), "replaced rule is disabled");
}

#[test]
fn test_load_json_file_and_reject_bad_confidence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    std::fs::write(
        &path,
        json!({"rules": [{
            "id": "X-1", "name": "n", "description": "d", "severity": "Low",
            "confidence": 1.5, "when": {"type": "field_true", "field": "x"}
        }]})
        .to_string(),
    )
    .unwrap();
    let mut engine = RulesEngine::empty();
    assert!(engine.load_file(&path).is_err());
    assert!(engine.all_rules().is_empty(), "failed load leaves rules untouched");
}

#[test]
fn test_field_false_default_decides_absent_fields() {
    let yaml = r#"
rules:
  - id: MFA-STRICT
    name: MFA required
    description: Logins without an MFA flag count as no MFA
    severity: High
    confidence: 0.9
    when:
      type: field_false
      field: mfa_present
      default: false
  - id: MFA-LENIENT
    name: MFA disabled
    description: Only explicit opt-outs match
    severity: Medium
    confidence: 0.8
    when:
      type: field_false
      field: mfa_present
"#;
    let mut engine = RulesEngine::empty();
    assert_eq!(engine.load_str(yaml, true).unwrap(), 2);

    let absent = ids(&engine, &event(json!({})));
    assert_eq!(absent, vec!["MFA-STRICT".to_string()], "only the strict rule reads absence as false");

    let explicit = ids(&engine, &event(json!({"mfa_present": false})));
    assert_eq!(explicit.len(), 2, "an explicit false matches both rules");

    let present = ids(&engine, &event(json!({"mfa_present": true})));
    assert!(present.is_empty(), "mfa present matches neither rule");
}
