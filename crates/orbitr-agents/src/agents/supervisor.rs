use async_trait::async_trait;
use serde_json::json;

use orbitr_protocol::{
    AuditStep, Domain, StandardizedEvent, AGENT_ANOMALY_DETECTOR, AGENT_COMPLIANCE_SENTINEL,
    AGENT_COST_ANALYST, AGENT_INFRASTRUCTURE_MONITOR, AGENT_RESOURCE_WATCHER,
    AGENT_SECURITY_WATCHDOG, AGENT_SUPERVISOR,
};

use super::{Agent, AgentOutput};
use crate::pipeline::PipelineRun;
use crate::AgentError;

const SECURITY_KEYWORDS: [&str; 6] = ["access", "auth", "login", "security", "ssh", "permission"];
const FINANCIAL_KEYWORDS: [&str; 5] = ["financial", "cost", "billing", "payment", "reconciliation"];
const INFRA_KEYWORDS: [&str; 8] = ["metric", "system", "cpu", "memory", "disk", "health", "scaling", "resource"];
const SCALING_KEYWORDS: [&str; 3] = ["cost", "scale", "autoscal"];

/// Expert agents for `event`, in run order, without duplicates.
pub fn route(event: &StandardizedEvent) -> Vec<&'static str> {
    let event_type = event.event_type_lower();
    let has = |keywords: &[&str]| keywords.iter().any(|kw| event_type.contains(kw));
    let mut agents: Vec<&'static str> = Vec::new();

    if event.domain == Domain::Security || has(&SECURITY_KEYWORDS) {
        agents.extend([AGENT_SECURITY_WATCHDOG, AGENT_COMPLIANCE_SENTINEL]);
    }
    if event.domain == Domain::Financial || has(&FINANCIAL_KEYWORDS) {
        agents.extend([AGENT_COST_ANALYST, AGENT_COMPLIANCE_SENTINEL]);
    }
    if event.domain == Domain::Infrastructure || has(&INFRA_KEYWORDS) {
        agents.extend([AGENT_INFRASTRUCTURE_MONITOR, AGENT_RESOURCE_WATCHER, AGENT_ANOMALY_DETECTOR]);
    }
    if has(&SCALING_KEYWORDS) {
        agents.extend([AGENT_COST_ANALYST, AGENT_INFRASTRUCTURE_MONITOR]);
    }
    if event.severity.is_high() {
        agents.extend([AGENT_SECURITY_WATCHDOG, AGENT_COMPLIANCE_SENTINEL]);
    }
    if agents.is_empty() {
        agents = vec![AGENT_SECURITY_WATCHDOG, AGENT_COMPLIANCE_SENTINEL, AGENT_ANOMALY_DETECTOR];
    }

    let mut seen = std::collections::HashSet::new();
    agents.retain(|a| seen.insert(*a));
    agents
}

/// Routes each event to the expert agents that understand it.
pub struct Supervisor;

#[async_trait]
impl Agent for Supervisor {
    fn id(&self) -> &'static str {
        AGENT_SUPERVISOR
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let routed = route(&run.event);
        let audit = AuditStep::new(
            "Routing",
            format!("Routed to {} agents: {}", routed.len(), routed.join(", ")),
        )
        .agent(AGENT_SUPERVISOR)
        .detail("domain", run.event.domain.as_str())
        .detail("severity", run.event.severity.as_str())
        .detail("routed_to", json!(routed));
        Ok(AgentOutput {
            route: Some(routed.iter().map(|a| a.to_string()).collect()),
            audit: Some(audit),
            ..Default::default()
        })
    }
}
