use orbitr_protocol::{Severity, StandardizedEvent};
use orbitr_state::workflow::*;
use orbitr_state::{AuditStore, StateError};
use serde_json::{json, Map};

fn engine() -> WorkflowEngine {
    WorkflowEngine::new(AuditStore::open_in_memory().unwrap())
}

#[test]
fn test_create_persists_and_unknown_type_fails() {
    let engine = engine();
    let wf = engine.create(CHANGE_APPROVAL, "corr-1", Some("alice"), Map::new()).unwrap();
    let loaded = engine.get(&wf.workflow_id).unwrap().unwrap();
    assert_eq!(loaded, wf);

    let err = engine.create("security_review", "corr-2", None, Map::new()).unwrap_err();
    assert!(matches!(err, StateError::UnknownWorkflowType(_)));
}

#[test]
fn test_advance_approve_reject_lifecycle() {
    let engine = engine();
    let wf = engine.create(ACCESS_REVIEW, "corr-1", None, Map::new()).unwrap();

    let wf = engine.advance(&wf.workflow_id, "grant", None).unwrap();
    assert_eq!(wf.current_step, 0, "mismatched action is ignored");

    let wf = engine.advance(&wf.workflow_id, "request", Some("alice")).unwrap();
    assert_eq!(wf.current_step, 1);
    assert_eq!(wf.status, WorkflowStatus::InProgress);

    let wf = engine.approve(&wf.workflow_id, "bob").unwrap();
    assert_eq!(wf.approver_id.as_deref(), Some("bob"));
    assert_eq!(wf.steps[1].comment.as_deref(), Some("Approved"));
    assert_eq!(wf.status, WorkflowStatus::AwaitingApproval);

    let wf = engine.reject(&wf.workflow_id, "not justified", "carol").unwrap();
    assert_eq!(wf.status, WorkflowStatus::Rejected);
    assert_eq!(wf.metadata["rejected_reason"], json!("not justified"));
    assert!(engine.pending().unwrap().is_empty(), "rejected is not pending");
}

#[test]
fn test_escalate_then_unblock() {
    let engine = engine();
    let wf = engine.create(CHANGE_APPROVAL, "corr-1", None, Map::new()).unwrap();
    let mut extra = Map::new();
    extra.insert("violations".into(), json!(["POL-003"]));
    let wf = engine.escalate(&wf.workflow_id, "Policy violation", extra).unwrap();
    assert_eq!(wf.status, WorkflowStatus::Escalated);
    assert_eq!(wf.metadata["blocked_reason"], json!("Policy violation"));

    let wf = engine.unblock(&wf.workflow_id, "CISO approved").unwrap();
    assert_eq!(wf.current_step, 1);
    assert_eq!(wf.steps[0].comment.as_deref(), Some("Unblocked: CISO approved"));
    assert_eq!(wf.steps[0].completed_by.as_deref(), Some("admin"));
    assert!(!wf.metadata.contains_key("blocked_reason"));
}

#[test]
fn test_missing_workflow_is_not_found() {
    let engine = engine();
    assert!(matches!(engine.reset("nope"), Err(StateError::WorkflowNotFound(_))));
}

#[test]
fn test_detect_trigger_rules() {
    let deploy = StandardizedEvent::new("DeploymentSuccess", "ci");
    assert_eq!(detect_trigger(&deploy), Some(CHANGE_APPROVAL));

    let access = StandardizedEvent::new("role_assignment", "iam").with_payload(json!({"privileged": true}));
    assert_eq!(detect_trigger(&access), Some(ACCESS_REVIEW));

    let low_access = StandardizedEvent::new("permission_check", "iam").with_severity(Severity::Low);
    assert_eq!(detect_trigger(&low_access), None);

    let critical = StandardizedEvent::new("cpu_metric", "prom").with_severity(Severity::Critical);
    assert_eq!(detect_trigger(&critical), Some(INCIDENT_RESPONSE));

    let attack = StandardizedEvent::new("ddos_attack", "waf");
    assert_eq!(detect_trigger(&attack), Some(INCIDENT_RESPONSE));
}

#[test]
fn test_expire_stale_persists_changes() {
    let engine = engine();
    let wf = engine.create(INCIDENT_RESPONSE, "corr-1", None, Map::new()).unwrap();
    let changed = engine.expire_stale(wf.created_at + 169.0 * 3600.0).unwrap();
    assert_eq!(changed.len(), 1);
    let loaded = engine.get(&wf.workflow_id).unwrap().unwrap();
    assert_eq!(loaded.status, WorkflowStatus::Expired);
}
