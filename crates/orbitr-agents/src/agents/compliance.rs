use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use orbitr_protocol::{AgentFinding, AuditStep, AGENT_COMPLIANCE_SENTINEL};
use orbitr_state::RulesEngine;

use super::{Agent, AgentOutput};
use crate::pipeline::PipelineRun;
use crate::AgentError;

/// Evaluates the compliance rule set.
pub struct ComplianceSentinel {
    rules: Arc<RulesEngine>,
}

impl ComplianceSentinel {
    pub fn new(rules: Arc<RulesEngine>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl Agent for ComplianceSentinel {
    fn id(&self) -> &'static str {
        AGENT_COMPLIANCE_SENTINEL
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let event = &run.event;
        let findings: Vec<AgentFinding> = self
            .rules
            .evaluate(event)
            .into_iter()
            .map(|rule| {
                let mut finding = AgentFinding::new(
                    AGENT_COMPLIANCE_SENTINEL,
                    "Policy Violation",
                    rule.title(),
                    rule.severity,
                    rule.confidence,
                )
                .description(rule.description.clone())
                .evidence("policy_id", rule.id.as_str())
                .evidence("frameworks", json!(rule.frameworks))
                .evidence("event_type", event.event_type.as_str());
                if let Some(actor) = event.actor_hint() {
                    finding = finding.evidence("actor", actor);
                }
                if !rule.remediation.is_empty() {
                    finding = finding.remediation(rule.remediation.clone());
                }
                finding
            })
            .collect();

        let checked = self.rules.enabled_rules().count();
        let audit = AuditStep::new(
            "Compliance Analysis",
            format!("Checked {checked} policies, found {} violations.", findings.len()),
        )
        .agent(AGENT_COMPLIANCE_SENTINEL)
        .detail("rules_checked", checked)
        .detail("findings_count", findings.len());
        Ok(AgentOutput::with_findings(findings, audit))
    }
}
