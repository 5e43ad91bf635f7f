use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use orbitr_protocol::{AgentFinding, AuditStep, Severity, AGENT_ANOMALY_DETECTOR};
use orbitr_state::{EventHistory, HistorySource};

use super::{Agent, AgentOutput};
use crate::pipeline::PipelineRun;
use crate::tracer::Tracer;
use crate::AgentError;

const BASELINE_HOURS: u32 = 24;
const BASELINE_LIMIT: usize = 20;
const FREQUENCY_THRESHOLD: u64 = 5;

/// Averages over similar events in the last 24 hours.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Baseline {
    event_count: usize,
    avg_risk_score: f64,
    high_severity_count: usize,
}

/// Metric thresholds, event-rate spikes and severity deviation from history.
pub struct AnomalyDetector {
    history: Arc<dyn HistorySource>,
    tracer: Arc<Tracer>,
}

impl AnomalyDetector {
    pub fn new(history: Arc<dyn HistorySource>, tracer: Arc<Tracer>) -> Self {
        Self { history, tracer }
    }
}

fn threshold_findings(run: &PipelineRun, baseline: Option<Baseline>) -> Vec<AgentFinding> {
    let event = &run.event;
    let metric = |key: &str| event.payload_f64(key).unwrap_or(0.0);
    let cpu = metric("cpu_usage");
    let memory = metric("memory_usage");
    let disk = metric("disk_usage");
    let cost = metric("cost_impact_daily");
    let mut findings = Vec::new();

    if cpu > 90.0 {
        // A new pattern is one that has not been seen at high severity recently.
        let is_new_pattern = baseline.map(|b| b.high_severity_count < 2).unwrap_or(true);
        let boost: f64 = if is_new_pattern { 0.1 } else { 0.0 };
        findings.push(
            AgentFinding::new(
                AGENT_ANOMALY_DETECTOR,
                "Resource Anomaly",
                "Critical CPU Usage",
                if cpu > 95.0 { Severity::Critical } else { Severity::High },
                (0.90 + boost).min(1.0),
            )
            .description(format!("CPU usage at {cpu}% exceeds critical threshold"))
            .evidence("cpu_usage", cpu)
            .evidence("threshold", 90)
            .evidence("is_new_pattern", is_new_pattern)
            .evidence("historical_events_24h", baseline.map(|b| b.event_count).unwrap_or(0))
            .remediation("Scale horizontally or investigate runaway processes."),
        );
    }

    if memory > 85.0 {
        findings.push(
            AgentFinding::new(
                AGENT_ANOMALY_DETECTOR,
                "Resource Anomaly",
                "High Memory Usage",
                if memory > 90.0 { Severity::High } else { Severity::Medium },
                0.85,
            )
            .description(format!("Memory usage at {memory}% exceeds threshold"))
            .evidence("memory_usage", memory)
            .evidence("threshold", 85)
            .remediation("Check for memory leaks or increase instance size."),
        );
    }

    if disk > 80.0 {
        findings.push(
            AgentFinding::new(AGENT_ANOMALY_DETECTOR, "Resource Anomaly", "Disk Space Warning", Severity::Medium, 0.80)
                .description(format!("Disk usage at {disk}% approaching capacity"))
                .evidence("disk_usage", disk)
                .evidence("threshold", 80)
                .remediation("Clean up logs or expand storage."),
        );
    }

    if cost > 500.0 {
        findings.push(
            AgentFinding::new(
                AGENT_ANOMALY_DETECTOR,
                "Cost Anomaly",
                "Significant Cost Impact",
                if cost > 1000.0 { Severity::High } else { Severity::Medium },
                0.88,
            )
            .description(format!("Daily cost impact of ${cost} detected"))
            .evidence("cost_impact_daily", cost)
            .remediation("Review scaling policies and resource allocation."),
        );
    }

    findings
}

#[async_trait]
impl Agent for AnomalyDetector {
    fn id(&self) -> &'static str {
        AGENT_ANOMALY_DETECTOR
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let event = &run.event;
        let history = EventHistory::new(self.history.as_ref());

        let similar = history.similar_events(&event.event_type, BASELINE_HOURS, BASELINE_LIMIT);
        let baseline = (!similar.is_empty()).then(|| Baseline {
            event_count: similar.len(),
            avg_risk_score: similar.iter().map(|e| e.risk_score).sum::<f64>() / similar.len() as f64,
            high_severity_count: similar
                .iter()
                .filter(|e| e.severity == "High" || e.severity == "Critical")
                .count(),
        });
        if let Some(b) = baseline {
            self.tracer.agent_decision(
                &run.run_id,
                AGENT_ANOMALY_DETECTOR,
                "baseline_established",
                json!({
                    "event_count_24h": b.event_count,
                    "avg_risk_score": b.avg_risk_score,
                    "high_severity_count": b.high_severity_count,
                }),
            );
        }

        let mut findings = threshold_findings(run, baseline);

        let frequency = history.frequency_anomaly(&event.event_type, 1, FREQUENCY_THRESHOLD);
        if frequency.is_anomaly {
            let score = frequency.anomaly_score;
            findings.push(
                AgentFinding::new(
                    AGENT_ANOMALY_DETECTOR,
                    "Frequency Anomaly",
                    "Event Rate Spike",
                    if score < 1.5 { Severity::Medium } else { Severity::High },
                    (0.70 + score * 0.1).min(0.95),
                )
                .description(format!(
                    "{} similar events in the last hour - {score:.1}x normal",
                    frequency.count_in_window
                ))
                .evidence("count_in_window", frequency.count_in_window)
                .evidence("threshold", frequency.threshold)
                .evidence("anomaly_score", score)
                .remediation("Investigate for potential misconfiguration, attack, or cascading failure."),
            );
            self.tracer
                .agent_decision(&run.run_id, AGENT_ANOMALY_DETECTOR, "frequency_anomaly", json!(frequency));
        }

        if let Some(b) = baseline {
            let current = event.severity.weight();
            if current > b.avg_risk_score + 0.3 {
                findings.push(
                    AgentFinding::new(AGENT_ANOMALY_DETECTOR, "Pattern Deviation", "Severity Escalation", Severity::Medium, 0.70)
                        .description(format!(
                            "Event severity ({}) is higher than historical pattern (avg risk: {:.2})",
                            event.severity.as_str(),
                            b.avg_risk_score
                        ))
                        .evidence("current_severity", event.severity.as_str())
                        .evidence("historical_avg_risk", b.avg_risk_score)
                        .evidence("deviation", current - b.avg_risk_score)
                        .remediation("Review if conditions have changed. May indicate escalating issue."),
                );
            }
        }

        let audit = AuditStep::new(
            "Anomaly Detection",
            format!("Analyzed metrics with historical baseline, found {} anomalies.", findings.len()),
        )
        .agent(AGENT_ANOMALY_DETECTOR)
        .detail("findings_count", findings.len())
        .detail("historical_baseline_available", baseline.is_some())
        .detail("events_in_baseline", baseline.map(|b| b.event_count).unwrap_or(0));
        Ok(AgentOutput::with_findings(findings, audit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbitr_protocol::StandardizedEvent;

    fn metric_run(cpu: f64) -> PipelineRun {
        PipelineRun::new(StandardizedEvent::new("metric_alert", "datadog").with_payload(json!({"cpu_usage": cpu})))
    }

    #[test]
    fn test_new_cpu_pattern_boosts_confidence_to_cap() {
        let findings = threshold_findings(&metric_run(97.0), None);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].confidence, 1.0, "new pattern adds 0.1 and is capped at 1.0");
    }

    #[test]
    fn test_known_cpu_pattern_keeps_base_confidence() {
        let baseline = Baseline { event_count: 6, avg_risk_score: 0.7, high_severity_count: 4 };
        let findings = threshold_findings(&metric_run(92.0), Some(baseline));
        assert_eq!(findings[0].severity, Severity::High);
        assert!((findings[0].confidence - 0.90).abs() < 1e-9, "no boost for a recurring pattern");
    }
}
