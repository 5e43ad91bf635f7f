//! Scripted demo scenarios and the quick-demo seed data.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};

use orbitr_protocol::{
    now_unix, AgentFinding, Domain, Severity, StandardizedEvent, AGENT_COMPLIANCE_SENTINEL, AGENT_INSIGHT_SYNTHESIZER,
    AGENT_SECURITY_WATCHDOG, DEMO_PREFIX,
};
use orbitr_state::{AuditRecord, StateError};

use crate::state::AppState;

const SCRIPTED_SOURCE: &str = "scripted_demo";
const SUBMIT_DELAY: Duration = Duration::from_millis(500);

/// What a scenario step does to the scenario's change approval workflow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkflowAction {
    /// Open the workflow and submit it.
    Open,
    /// Action-matched advance by `actor`.
    Advance { action: &'static str, actor: &'static str },
    /// Block on a policy violation.
    Escalate,
}

pub struct ScenarioEvent {
    pub event_type: &'static str,
    pub severity: Severity,
    pub domain: Domain,
    pub delay_secs: u64,
    pub payload: fn() -> Value,
    pub workflow: WorkflowAction,
}

pub struct Scenario {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub events: &'static [ScenarioEvent],
}

fn rogue_push_payload() -> Value {
    json!({
        "branch": "main",
        "author": "dev_hotfix_user",
        "message": "HOTFIX: Emergency patch for production bug",
        "files_changed": 3,
        "bypass_pr": true,
    })
}

fn rogue_deploy_payload() -> Value {
    json!({
        "environment": "production",
        "source": "direct_push",
        "requires_approval": true,
        "bypassed_review": true,
    })
}

fn rogue_violation_payload() -> Value {
    json!({
        "policy_id": "POL-001",
        "policy_name": "Branch Protection Required",
        "violation": "Direct commit to protected branch without PR review",
        "evidence": "Commit SHA abc123 pushed directly to main",
        "remediation": "Revert commit and submit via PR with required reviews",
    })
}

fn secret_scan_payload() -> Value {
    json!({
        "scan_type": "secret_detection",
        "finding": "AWS API Key exposed",
        "file": "config/settings.py",
        "line": 42,
    })
}

pub static SCRIPTED_SCENARIOS: [Scenario; 2] = [
    Scenario {
        id: "rogue_hotfix",
        name: "Rogue Hotfix",
        description: "Direct commit to main without PR review - compliance violation",
        events: &[
            ScenarioEvent {
                event_type: "github_push",
                severity: Severity::Medium,
                domain: Domain::Compliance,
                delay_secs: 0,
                payload: rogue_push_payload,
                workflow: WorkflowAction::Open,
            },
            ScenarioEvent {
                event_type: "deployment_request",
                severity: Severity::High,
                domain: Domain::Compliance,
                delay_secs: 2,
                payload: rogue_deploy_payload,
                workflow: WorkflowAction::Advance { action: "assess", actor: AGENT_COMPLIANCE_SENTINEL },
            },
            ScenarioEvent {
                event_type: "compliance_violation",
                severity: Severity::Critical,
                domain: Domain::Compliance,
                delay_secs: 3,
                payload: rogue_violation_payload,
                workflow: WorkflowAction::Escalate,
            },
        ],
    },
    Scenario {
        id: "secret_exposure",
        name: "Secret Exposure",
        description: "API key detected in committed code",
        events: &[ScenarioEvent {
            event_type: "security_scan",
            severity: Severity::Critical,
            domain: Domain::Security,
            delay_secs: 0,
            payload: secret_scan_payload,
            workflow: WorkflowAction::Open,
        }],
    },
];

pub fn find_scenario(id: &str) -> Option<&'static Scenario> {
    SCRIPTED_SCENARIOS.iter().find(|s| s.id == id)
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioSummary {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub event_count: usize,
}

pub fn scenario_summaries() -> Vec<ScenarioSummary> {
    SCRIPTED_SCENARIOS
        .iter()
        .map(|s| ScenarioSummary { id: s.id, name: s.name, description: s.description, event_count: s.events.len() })
        .collect()
}

pub fn demo_correlation_id() -> String {
    format!("{DEMO_PREFIX}{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

impl ScenarioEvent {
    fn build(&self, correlation_id: &str, index: usize) -> StandardizedEvent {
        let payload = (self.payload)();
        let actor = payload.get("author").and_then(Value::as_str).unwrap_or("demo_user").to_string();
        let mut event = StandardizedEvent::new(self.event_type, SCRIPTED_SOURCE)
            .with_severity(self.severity)
            .with_domain(self.domain)
            .with_payload(payload)
            .with_correlation_id(correlation_id);
        event.event_id = format!("{correlation_id}_evt_{index}");
        event.actor_id = Some(actor);
        event.resource_id = Some(format!("demo_resource_{index}"));
        event
    }
}

/// Play `scenario` to completion. Returns the workflow it drove, if any.
pub async fn execute_scenario(
    app: &AppState,
    scenario: &Scenario,
    correlation_id: &str,
) -> Result<Option<String>, StateError> {
    let mut workflow_id: Option<String> = None;

    for (i, step) in scenario.events.iter().enumerate() {
        if step.delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(step.delay_secs)).await;
        }
        let event = step.build(correlation_id, i);
        let actor = event.actor_id.clone();
        let payload = event.payload.clone();
        app.analyze(event).await;
        tracing::info!(
            scenario = scenario.id,
            step = i + 1,
            of = scenario.events.len(),
            event_type = step.event_type,
            "Scenario event processed"
        );

        match (step.workflow, workflow_id.as_deref()) {
            (WorkflowAction::Open, None) => {
                let mut metadata = Map::new();
                metadata.insert("scenario".into(), Value::from(scenario.name));
                metadata.insert("trigger_event".into(), Value::from(step.event_type));
                let workflow = app.workflows.create("change_approval", correlation_id, actor.as_deref(), metadata)?;
                tokio::time::sleep(SUBMIT_DELAY).await;
                app.workflows.advance(&workflow.workflow_id, "submit", Some("system"))?;
                workflow_id = Some(workflow.workflow_id);
            }
            (WorkflowAction::Advance { action, actor }, Some(id)) => {
                app.workflows.advance(id, action, Some(actor))?;
            }
            (WorkflowAction::Escalate, Some(id)) => {
                let mut extra = Map::new();
                extra.insert(
                    "policy_id".into(),
                    payload.get("policy_id").cloned().unwrap_or_else(|| Value::from("POL-001")),
                );
                extra.insert(
                    "violation".into(),
                    payload.get("violation").cloned().unwrap_or_else(|| Value::from("Compliance breach")),
                );
                app.workflows.escalate(id, "Policy violation detected", extra)?;
                tracing::warn!(workflow_id = id, scenario = scenario.id, "Workflow blocked by policy violation");
            }
            _ => {}
        }
    }
    Ok(workflow_id)
}

struct DemoRecord {
    event_type: &'static str,
    severity: &'static str,
    summary: &'static str,
    source: &'static str,
    payload: Option<(&'static str, i64)>,
}

const DEMO_RECORDS: [DemoRecord; 8] = [
    DemoRecord { event_type: "MetricUpdate", severity: "Low", summary: "CPU utilization normal (42%)", source: "resource_watcher", payload: Some(("cpu", 42)) },
    DemoRecord { event_type: "MetricUpdate", severity: "Warning", summary: "Memory usage warning (85%)", source: "resource_watcher", payload: Some(("memory", 85)) },
    DemoRecord { event_type: "PullRequestMerged", severity: "Critical", summary: "PR merged without code review - policy violation", source: "github", payload: None },
    DemoRecord { event_type: "SecretDetected", severity: "Critical", summary: "AWS API key detected in config.py", source: "security_scanner", payload: None },
    DemoRecord { event_type: "DeploymentFailed", severity: "High", summary: "Production deployment failed - rollback initiated", source: "vercel", payload: None },
    DemoRecord { event_type: "ComplianceViolation", severity: "High", summary: "Direct commit to main branch detected", source: "compliance_sentinel", payload: None },
    DemoRecord { event_type: "TicketUpdated", severity: "Medium", summary: "JIRA-1234 moved to Done without deployment", source: "jira", payload: None },
    DemoRecord { event_type: "PipelineCompleted", severity: "Low", summary: "CI pipeline completed - 48 tests passed", source: "github", payload: None },
];

/// (agent, finding type, title, severity, record index it attaches to)
const DEMO_FINDINGS: [(&str, &str, &str, Severity, usize); 5] = [
    (AGENT_COMPLIANCE_SENTINEL, "PolicyViolation", "Branch protection bypassed", Severity::Critical, 2),
    (AGENT_SECURITY_WATCHDOG, "SecretExposure", "Hardcoded AWS credentials", Severity::Critical, 3),
    (AGENT_SECURITY_WATCHDOG, "VulnerabilityDetected", "Outdated dependency with CVE", Severity::High, 4),
    (AGENT_COMPLIANCE_SENTINEL, "ComplianceGap", "Missing ticket reference", Severity::High, 5),
    (AGENT_INSIGHT_SYNTHESIZER, "PatternDetected", "Unusual deployment pattern", Severity::Medium, 4),
];

/// (workflow type, requester, metadata)
const DEMO_WORKFLOWS: [(&str, &str, &[(&str, &str)]); 3] = [
    ("change_approval", "ci_pipeline", &[("env", "production"), ("service", "api-gateway")]),
    ("access_review", "new_developer", &[("resource", "prod-database"), ("level", "read-only")]),
    ("incident_response", "alertmanager", &[("alert", "High CPU usage"), ("severity", "High")]),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DemoCounts {
    pub events: usize,
    pub findings: usize,
    pub workflows: usize,
}

/// Replace earlier demo rows with a fresh set of events, findings and workflows.
pub fn seed_quick_demo(app: &AppState) -> Result<DemoCounts, StateError> {
    app.store.clear_demo_data()?;
    let now = now_unix();

    let mut records: Vec<AuditRecord> = DEMO_RECORDS
        .iter()
        .enumerate()
        .map(|(i, demo)| {
            let severity = demo.severity.parse().unwrap_or(Severity::Medium);
            let mut event = StandardizedEvent::new(demo.event_type, demo.source).with_severity(severity);
            if let Some((metric, value)) = demo.payload {
                event = event.with_payload(json!({ "metric": metric, "value": value }));
            }
            let id = demo_correlation_id();
            event.event_id = id.clone();
            event.correlation_id = id;
            event.timestamp = now - (i as f64) * 300.0;
            event.domain = Domain::infer(demo.event_type);
            let mut record = AuditRecord::for_event(&event);
            record.insight_text = demo.summary.to_string();
            record.risk_score = severity.weight();
            record
        })
        .collect();

    for (agent, finding_type, title, severity, index) in DEMO_FINDINGS {
        let finding = AgentFinding::new(agent, finding_type, title, severity, 0.92)
            .description(format!("Demo finding: {title}"));
        if let Some(record) = records.get_mut(index) {
            record.findings.push(finding);
        }
    }

    let mut counts = DemoCounts::default();
    for record in &records {
        app.store.save_audit_entry(record)?;
        counts.events += 1;
        counts.findings += record.findings.len();
    }

    for (workflow_type, requester, fields) in DEMO_WORKFLOWS {
        let metadata: Map<String, Value> =
            fields.iter().map(|(k, v)| (k.to_string(), Value::from(*v))).collect();
        app.workflows.create(workflow_type, &demo_correlation_id(), Some(requester), metadata)?;
        counts.workflows += 1;
    }

    tracing::info!(
        events = counts.events,
        findings = counts.findings,
        workflows = counts.workflows,
        "Quick demo data seeded"
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrbitrConfig;
    use orbitr_state::{AuditStore, RulesEngine, WorkflowStatus};

    fn app() -> AppState {
        AppState::with_parts(OrbitrConfig::default(), AuditStore::open_in_memory().unwrap(), RulesEngine::with_builtins(), None)
    }

    #[test]
    fn test_scenario_catalog() {
        let summaries = scenario_summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "rogue_hotfix");
        assert_eq!(summaries[0].event_count, 3);
        assert!(find_scenario("secret_exposure").is_some());
        assert!(find_scenario("nope").is_none());
    }

    #[test]
    fn test_scenario_event_uses_payload_author() {
        let scenario = find_scenario("rogue_hotfix").unwrap();
        let event = scenario.events[0].build("demo_abc12345", 0);
        assert_eq!(event.event_id, "demo_abc12345_evt_0");
        assert_eq!(event.actor_id.as_deref(), Some("dev_hotfix_user"));
        assert_eq!(event.resource_id.as_deref(), Some("demo_resource_0"));
        assert_eq!(event.source_system, SCRIPTED_SOURCE);

        let second = scenario.events[1].build("demo_abc12345", 1);
        assert_eq!(second.actor_id.as_deref(), Some("demo_user"), "no author falls back to demo_user");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rogue_hotfix_escalates_its_workflow() {
        let app = app();
        let scenario = find_scenario("rogue_hotfix").unwrap();
        let workflow_id = execute_scenario(&app, scenario, "demo_rogue001").await.unwrap().unwrap();

        let workflow = app.workflows.get(&workflow_id).unwrap().unwrap();
        assert_eq!(workflow.workflow_type, "change_approval");
        assert_eq!(workflow.status, WorkflowStatus::Escalated);
        assert_eq!(workflow.metadata["policy_id"], "POL-001");
        assert_eq!(workflow.metadata["scenario"], "Rogue Hotfix");
        assert!(workflow.current_step >= 1, "workflow was submitted before escalation");
        assert!(app.store.audit_by_correlation("demo_rogue001").unwrap().is_some());
    }

    #[test]
    fn test_quick_demo_is_idempotent() {
        let app = app();
        let first = seed_quick_demo(&app).unwrap();
        assert_eq!(first, DemoCounts { events: 8, findings: 5, workflows: 3 });

        seed_quick_demo(&app).unwrap();
        assert_eq!(app.store.recent_audit(100, None, None).unwrap().len(), 8, "old demo rows replaced");
        assert_eq!(app.workflows.all().unwrap().len(), 3);
        assert_eq!(app.store.recent_findings(50).unwrap().len(), 5);
    }
}
