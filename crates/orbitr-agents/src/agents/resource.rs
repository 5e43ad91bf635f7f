use async_trait::async_trait;

use orbitr_protocol::{AgentFinding, AuditStep, Severity, AGENT_RESOURCE_WATCHER};

use super::{Agent, AgentOutput};
use crate::pipeline::PipelineRun;
use crate::AgentError;

/// Service status and raw utilization metrics.
pub struct ResourceWatcher;

#[async_trait]
impl Agent for ResourceWatcher {
    fn id(&self) -> &'static str {
        AGENT_RESOURCE_WATCHER
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let event = &run.event;
        let mut findings = Vec::new();

        let status = event.payload_str("status").unwrap_or("").to_lowercase();
        if matches!(status.as_str(), "unhealthy" | "degraded" | "critical" | "down") {
            let severity = if matches!(status.as_str(), "critical" | "down") {
                Severity::Critical
            } else {
                Severity::High
            };
            findings.push(
                AgentFinding::new(AGENT_RESOURCE_WATCHER, "Health Alert", "Service Health Issue", severity, 0.95)
                    .description(format!("Service reported status: {status}"))
                    .evidence("status", status.as_str())
                    .evidence("service", event.payload_str("service_name").unwrap_or("Unknown"))
                    .remediation("Investigate service logs and consider restart."),
            );
        }

        if event.payload_str("metric") == Some("cpu_utilization") {
            let value = event.payload_f64("value").unwrap_or(0.0);
            if value > 90.0 {
                findings.push(
                    AgentFinding::new(AGENT_RESOURCE_WATCHER, "Resource Exhaustion", "Critical CPU Usage", Severity::Critical, 0.98)
                        .description(format!("CPU utilization is at {value}% (Threshold: 90%)"))
                        .evidence("cpu", value)
                        .remediation("Check for runaway processes or scale up instance type."),
                );
            } else if value > 75.0 {
                findings.push(
                    AgentFinding::new(AGENT_RESOURCE_WATCHER, "Performance Warning", "High CPU Usage", Severity::Medium, 0.85)
                        .description(format!("CPU utilization is at {value}%"))
                        .evidence("cpu", value)
                        .remediation("Monitor for sustained load."),
                );
            }
        }

        let memory = event.payload_f64("memory_pct").unwrap_or(0.0);
        if memory > 85.0 {
            findings.push(
                AgentFinding::new(AGENT_RESOURCE_WATCHER, "Resource Exhaustion", "High Memory Usage", Severity::High, 0.90)
                    .description(format!("Memory usage is at {memory}%"))
                    .evidence("memory", memory)
                    .remediation("Check for memory leaks or increase RAM."),
            );
        }

        let instances = event.payload_f64("instance_count").unwrap_or(0.0);
        if instances > 50.0 {
            findings.push(
                AgentFinding::new(AGENT_RESOURCE_WATCHER, "Capacity Alert", "High Instance Count", Severity::Medium, 0.70)
                    .description(format!("Service running {instances} instances"))
                    .evidence("instance_count", instances)
                    .remediation("Review if scale is appropriate for current load."),
            );
        }

        let audit = AuditStep::new("Resource Watch", format!("Checked resources, found {} issues.", findings.len()))
            .agent(AGENT_RESOURCE_WATCHER)
            .detail("findings_count", findings.len());
        Ok(AgentOutput::with_findings(findings, audit))
    }
}
