use async_trait::async_trait;

use orbitr_protocol::{AgentFinding, AuditStep, Severity, AGENT_COST_ANALYST};

use super::{Agent, AgentOutput};
use crate::pipeline::PipelineRun;
use crate::AgentError;

/// FinOps checks on reconciliation and scaling spend.
pub struct CostAnalyst;

#[async_trait]
impl Agent for CostAnalyst {
    fn id(&self) -> &'static str {
        AGENT_COST_ANALYST
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let event = &run.event;
        let mismatch = event.payload_f64("mismatch_amount").unwrap_or(0.0);
        let cost_daily = event.payload_f64("cost_impact_daily").unwrap_or(0.0);
        let delta = event.payload_f64("delta_instances").unwrap_or(0.0);
        let mut findings = Vec::new();

        if mismatch > 500.0 {
            findings.push(
                AgentFinding::new(
                    AGENT_COST_ANALYST,
                    "Financial Alert",
                    "Reconciliation Mismatch",
                    if mismatch > 2000.0 { Severity::Critical } else { Severity::High },
                    0.92,
                )
                .description(format!("${mismatch} discrepancy detected in financial reconciliation"))
                .evidence("mismatch_amount", mismatch)
                .evidence("monthly_projection", mismatch * 30.0)
                .remediation("Escalate to Finance for manual review and reconciliation."),
            );
        }

        if cost_daily > 500.0 {
            let monthly = cost_daily * 30.0;
            findings.push(
                AgentFinding::new(
                    AGENT_COST_ANALYST,
                    "Cost Impact",
                    "Significant Daily Cost Increase",
                    if cost_daily > 1000.0 { Severity::High } else { Severity::Medium },
                    0.85,
                )
                .description(format!("${cost_daily}/day additional spend (${monthly}/month projected)"))
                .evidence("cost_daily", cost_daily)
                .evidence("monthly_projection", monthly)
                .evidence("delta_instances", delta)
                .remediation("Review auto-scaling thresholds and consider reserved capacity."),
            );
        }

        if delta > 5.0 {
            findings.push(
                AgentFinding::new(AGENT_COST_ANALYST, "Scaling Alert", "Large Instance Scale-Out", Severity::Medium, 0.75)
                    .description(format!("Scaling event added {delta} instances"))
                    .evidence("delta_instances", delta)
                    .remediation("Verify scaling is responding to genuine demand."),
            );
        }

        let audit = AuditStep::new("Cost Analysis", format!("Analyzed costs, found {} issues.", findings.len()))
            .agent(AGENT_COST_ANALYST)
            .detail("findings_count", findings.len());
        Ok(AgentOutput::with_findings(findings, audit))
    }
}
