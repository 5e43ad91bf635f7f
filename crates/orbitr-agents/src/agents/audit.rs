use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use orbitr_protocol::{AgentFinding, AuditStep, Severity, AGENT_AUDIT_COORDINATOR};
use orbitr_state::AuditStore;

use super::{Agent, AgentOutput, RiskAssessment};
use crate::pipeline::PipelineRun;
use crate::tracer::Tracer;
use crate::AgentError;

/// Risk is the largest `weight × confidence` over all findings, capped at
/// 1.0 and rounded to two decimals. No findings means zero risk at Low.
pub fn assess_risk(findings: &[AgentFinding]) -> (f64, Severity) {
    let risk = findings.iter().map(AgentFinding::risk).fold(0.0_f64, f64::max);
    let highest = findings.iter().map(|f| f.severity).max().unwrap_or(Severity::Low);
    ((risk.min(1.0) * 100.0).round() / 100.0, highest)
}

/// Last stage: scores the run and persists it.
pub struct AuditCoordinator {
    store: AuditStore,
    tracer: Arc<Tracer>,
}

impl AuditCoordinator {
    pub fn new(store: AuditStore, tracer: Arc<Tracer>) -> Self {
        Self { store, tracer }
    }
}

#[async_trait]
impl Agent for AuditCoordinator {
    fn id(&self) -> &'static str {
        AGENT_AUDIT_COORDINATOR
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let (risk_score, highest_severity) = assess_risk(&run.findings);
        let record = run.audit_record(risk_score);
        self.tracer.agent_decision(
            &run.run_id,
            AGENT_AUDIT_COORDINATOR,
            "risk_calculated",
            json!({
                "total_risk": risk_score,
                "highest_severity": highest_severity,
                "findings_count": run.findings.len(),
                "context_score": run.context_score,
                "llm_used": run.llm_used,
            }),
        );

        let store = self.store.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_audit_entry(&record)).await;
        let db_status = match saved {
            Ok(Ok(())) => {
                self.tracer.agent_decision(
                    &run.run_id,
                    AGENT_AUDIT_COORDINATOR,
                    "db_persisted",
                    json!({ "status": "success", "event_id": run.event.event_id }),
                );
                "saved".to_string()
            }
            Ok(Err(e)) => {
                tracing::error!(event_id = %run.event.event_id, error = %e, "Failed to persist audit entry");
                self.tracer
                    .agent_decision(&run.run_id, AGENT_AUDIT_COORDINATOR, "db_error", json!({ "error": e.to_string() }));
                format!("error: {e}")
            }
            Err(e) => {
                tracing::error!(event_id = %run.event.event_id, error = %e, "Audit persistence task failed");
                format!("error: {e}")
            }
        };

        let audit = AuditStep::new(
            "Audit Coordination",
            format!(
                "Workflow complete. Risk: {risk_score}, Severity: {}, Findings: {}",
                highest_severity.as_str(),
                run.findings.len()
            ),
        )
        .agent(AGENT_AUDIT_COORDINATOR)
        .detail("risk_score", risk_score)
        .detail("highest_severity", highest_severity.as_str())
        .detail("findings_count", run.findings.len())
        .detail("processing_time_ms", run.elapsed_ms())
        .detail("db_status", db_status.as_str())
        .detail("context_score", run.context_score)
        .detail("guardrails_passed", run.guardrails_passed())
        .detail("llm_used", run.llm_used);

        Ok(AgentOutput {
            audit: Some(audit),
            assessment: Some(RiskAssessment { risk_score, highest_severity, db_status }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_is_max_weighted_confidence() {
        let findings = vec![
            AgentFinding::new("a", "t", "low", Severity::Low, 1.0),
            AgentFinding::new("a", "t", "high", Severity::High, 0.9),
            AgentFinding::new("a", "t", "medium", Severity::Medium, 0.95),
        ];
        let (risk, highest) = assess_risk(&findings);
        assert_eq!(risk, 0.72);
        assert_eq!(highest, Severity::High);
    }

    #[test]
    fn test_no_findings_is_zero_risk() {
        assert_eq!(assess_risk(&[]), (0.0, Severity::Low));
    }
}
