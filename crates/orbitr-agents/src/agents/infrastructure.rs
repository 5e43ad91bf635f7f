use async_trait::async_trait;
use serde_json::{json, Value};

use orbitr_protocol::{AgentFinding, AuditStep, Severity, AGENT_INFRASTRUCTURE_MONITOR};

use super::{Agent, AgentOutput};
use crate::pipeline::PipelineRun;
use crate::AgentError;

const CPU_CRITICAL: f64 = 95.0;
const CPU_HIGH: f64 = 85.0;
const CPU_WARNING: f64 = 75.0;
const MEMORY_CRITICAL: f64 = 95.0;
const MEMORY_HIGH: f64 = 90.0;
const DISK_CRITICAL: f64 = 95.0;
const DISK_HIGH: f64 = 85.0;
const LATENCY_CRITICAL_MS: f64 = 1000.0;
const LATENCY_HIGH_MS: f64 = 500.0;
const ERROR_RATE_CRITICAL: f64 = 5.0;
const ERROR_RATE_HIGH: f64 = 2.0;

fn finding(title: &str, description: String, severity: Severity, confidence: f64, evidence: Value, remediation: &str) -> AgentFinding {
    let mut f = AgentFinding::new(AGENT_INFRASTRUCTURE_MONITOR, "Infrastructure Alert", title, severity, confidence)
        .description(description)
        .remediation(remediation);
    if let Value::Object(map) = evidence {
        f.evidence = map;
    }
    f
}

/// "Critical", "Degraded", "Warning" or "Healthy" from the worst finding.
pub fn health_status(findings: &[AgentFinding]) -> &'static str {
    match findings.iter().map(|f| f.severity).max() {
        Some(Severity::Critical) => "Critical",
        Some(Severity::High) => "Degraded",
        Some(Severity::Medium) => "Warning",
        _ => "Healthy",
    }
}

/// Threshold checks over host and service metrics.
pub struct InfrastructureMonitor;

#[async_trait]
impl Agent for InfrastructureMonitor {
    fn id(&self) -> &'static str {
        AGENT_INFRASTRUCTURE_MONITOR
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let event = &run.event;
        let metric = |keys: &[&str]| keys.iter().find_map(|k| event.payload_f64(k)).unwrap_or(0.0);
        let service = event
            .payload_str("service_name")
            .or_else(|| event.payload_str("service_id"))
            .unwrap_or("Unknown Service")
            .to_string();
        let mut findings = Vec::new();

        let cpu = metric(&["cpu_usage"]);
        if cpu >= CPU_CRITICAL {
            findings.push(finding(
                "CPU Critical",
                format!("CPU usage at {cpu}% on {service}"),
                Severity::Critical,
                0.95,
                json!({"cpu_usage": cpu, "threshold": CPU_CRITICAL}),
                "Immediate scaling required. Check for runaway processes or DDoS.",
            ));
        } else if cpu >= CPU_HIGH {
            findings.push(finding(
                "CPU High",
                format!("CPU usage at {cpu}% approaching critical on {service}"),
                Severity::High,
                0.85,
                json!({"cpu_usage": cpu, "threshold": CPU_HIGH}),
                "Consider horizontal scaling or load balancing.",
            ));
        } else if cpu >= CPU_WARNING {
            findings.push(finding(
                "CPU Warning",
                format!("CPU usage at {cpu}% on {service}"),
                Severity::Medium,
                0.70,
                json!({"cpu_usage": cpu, "threshold": CPU_WARNING}),
                "Monitor trend. Pre-scale if load is increasing.",
            ));
        }

        let memory = metric(&["memory_usage"]);
        if memory >= MEMORY_CRITICAL {
            findings.push(finding(
                "Memory Critical",
                format!("Memory at {memory}% - OOM risk on {service}"),
                Severity::Critical,
                0.95,
                json!({"memory_usage": memory, "threshold": MEMORY_CRITICAL}),
                "Restart service or scale immediately. Check for memory leaks.",
            ));
        } else if memory >= MEMORY_HIGH {
            findings.push(finding(
                "Memory High",
                format!("Memory at {memory}% on {service}"),
                Severity::High,
                0.85,
                json!({"memory_usage": memory, "threshold": MEMORY_HIGH}),
                "Analyze heap dumps. Consider increasing instance memory.",
            ));
        }

        let disk = metric(&["disk_usage"]);
        if disk >= DISK_CRITICAL {
            findings.push(finding(
                "Disk Critical",
                format!("Disk at {disk}% - service may fail on {service}"),
                Severity::Critical,
                0.95,
                json!({"disk_usage": disk, "threshold": DISK_CRITICAL}),
                "Clear logs, expand volume, or add storage immediately.",
            ));
        } else if disk >= DISK_HIGH {
            findings.push(finding(
                "Disk Space Low",
                format!("Disk at {disk}% on {service}"),
                Severity::High,
                0.80,
                json!({"disk_usage": disk, "threshold": DISK_HIGH}),
                "Schedule log rotation and cleanup old artifacts.",
            ));
        }

        let status = event.payload_str("status").unwrap_or("").to_lowercase();
        if matches!(status.as_str(), "unhealthy" | "degraded" | "critical" | "down" | "failing") {
            let severity = if matches!(status.as_str(), "critical" | "down") {
                Severity::Critical
            } else {
                Severity::High
            };
            findings.push(finding(
                "Service Unhealthy",
                format!("Service {service} reported status: {}", status.to_uppercase()),
                severity,
                0.95,
                json!({"status": status, "service": service}),
                "Check service logs. Run health diagnostics. Consider failover.",
            ));
        }

        let latency = metric(&["latency_ms", "response_time_ms"]);
        if latency >= LATENCY_CRITICAL_MS {
            findings.push(finding(
                "Latency Critical",
                format!("Response time {latency}ms exceeds SLA on {service}"),
                Severity::Critical,
                0.90,
                json!({"latency_ms": latency, "threshold": LATENCY_CRITICAL_MS}),
                "Check database connections, network issues, or service dependencies.",
            ));
        } else if latency >= LATENCY_HIGH_MS {
            findings.push(finding(
                "High Latency",
                format!("Response time {latency}ms on {service}"),
                Severity::Medium,
                0.75,
                json!({"latency_ms": latency, "threshold": LATENCY_HIGH_MS}),
                "Investigate slow database queries or external API calls.",
            ));
        }

        let error_rate = metric(&["error_rate", "error_percentage"]);
        if error_rate >= ERROR_RATE_CRITICAL {
            findings.push(finding(
                "Error Rate Critical",
                format!("{error_rate}% error rate on {service}"),
                Severity::Critical,
                0.92,
                json!({"error_rate": error_rate, "threshold": ERROR_RATE_CRITICAL}),
                "Immediate investigation required. Check recent deployments.",
            ));
        } else if error_rate >= ERROR_RATE_HIGH {
            findings.push(finding(
                "Elevated Error Rate",
                format!("{error_rate}% error rate on {service}"),
                Severity::High,
                0.80,
                json!({"error_rate": error_rate, "threshold": ERROR_RATE_HIGH}),
                "Review error logs and recent changes.",
            ));
        }

        let instances = metric(&["instance_count"]);
        let delta = metric(&["delta_instances"]);
        if delta > 5.0 {
            findings.push(finding(
                "Large Scale Event",
                format!("Scaled by {delta} instances (now {instances})"),
                Severity::Medium,
                0.70,
                json!({"delta": delta, "total": instances}),
                "Verify scaling trigger was legitimate. Check cost impact.",
            ));
        }
        if instances > 100.0 {
            findings.push(finding(
                "High Instance Count",
                format!("Running {instances} instances for {service}"),
                Severity::Low,
                0.60,
                json!({"instance_count": instances}),
                "Review if scale is appropriate. Consider reserved capacity.",
            ));
        }

        let health = health_status(&findings);
        let audit = AuditStep::new(
            "Infrastructure Monitoring",
            format!("Infrastructure check: {health} ({} issues)", findings.len()),
        )
        .agent(AGENT_INFRASTRUCTURE_MONITOR)
        .detail("service", service.as_str())
        .detail("health_status", health)
        .detail("findings_count", findings.len());
        Ok(AgentOutput::with_findings(findings, audit))
    }
}
