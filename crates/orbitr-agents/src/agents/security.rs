use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use orbitr_protocol::{AgentFinding, AuditStep, Severity, StandardizedEvent, AGENT_SECURITY_WATCHDOG};
use orbitr_state::{EventHistory, HistorySource};

use super::{Agent, AgentOutput};
use crate::pipeline::PipelineRun;
use crate::tracer::Tracer;
use crate::AgentError;

const FREQUENCY_WINDOW_HOURS: u32 = 1;
const FREQUENCY_THRESHOLD: u64 = 10;
const OFFENDER_LOOKBACK_DAYS: u32 = 7;

fn aws_key_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"AKIA[0-9A-Z]{16}").ok()).as_ref()
}

enum Detection {
    /// Regex over top-level string payload values.
    Pattern(fn() -> Option<&'static Regex>),
    Check(fn(&StandardizedEvent) -> bool),
}

struct DetectionRule {
    name: &'static str,
    detection: Detection,
    severity: Severity,
    confidence: f64,
    remediation: &'static str,
}

fn sudo_without_mfa(event: &StandardizedEvent) -> bool {
    let sudo = event
        .payload_str("action")
        .map(|a| a.to_lowercase().contains("sudo"))
        .unwrap_or(false);
    sudo && event.payload_bool("mfa_present") == Some(false)
}

fn production_database(event: &StandardizedEvent) -> bool {
    let target = event
        .payload
        .get("target")
        .or_else(|| event.payload.get("host"))
        .map(|v| match v {
            Value::String(s) => s.to_lowercase(),
            other => other.to_string().to_lowercase(),
        })
        .unwrap_or_default();
    ["prod-db", "db-prod", "production"].iter().any(|kw| target.contains(kw))
}

fn unknown_location(event: &StandardizedEvent) -> bool {
    event
        .payload_str("location")
        .map(|l| matches!(l.to_lowercase().as_str(), "unknown" | "unknown-ip" | "tor" | "vpn-exit"))
        .unwrap_or(false)
}

const DETECTION_RULES: [DetectionRule; 4] = [
    DetectionRule {
        name: "AWS Key Exposure",
        detection: Detection::Pattern(aws_key_regex),
        severity: Severity::Critical,
        confidence: 0.95,
        remediation: "Immediately rotate the exposed AWS access key.",
    },
    DetectionRule {
        name: "Privileged Command Without MFA",
        detection: Detection::Check(sudo_without_mfa),
        severity: Severity::Critical,
        confidence: 0.92,
        remediation: "Enforce MFA for all privileged operations.",
    },
    DetectionRule {
        name: "Production Database Access",
        detection: Detection::Check(production_database),
        severity: Severity::High,
        confidence: 0.80,
        remediation: "Verify access is through approved jump host.",
    },
    DetectionRule {
        name: "Unknown IP Location",
        detection: Detection::Check(unknown_location),
        severity: Severity::High,
        confidence: 0.85,
        remediation: "Verify user identity and investigate source IP.",
    },
];

/// Threat patterns plus behavioural history of the actor.
pub struct SecurityWatchdog {
    history: Arc<dyn HistorySource>,
    tracer: Arc<Tracer>,
}

impl SecurityWatchdog {
    pub fn new(history: Arc<dyn HistorySource>, tracer: Arc<Tracer>) -> Self {
        Self { history, tracer }
    }

    fn rule_findings(&self, run: &PipelineRun, actor: &str) -> Vec<AgentFinding> {
        let event = &run.event;
        let mut findings = Vec::new();
        for rule in &DETECTION_RULES {
            let matched_field = match &rule.detection {
                Detection::Pattern(regex) => {
                    let Some(re) = regex() else { continue };
                    match event
                        .payload
                        .iter()
                        .find(|(_, v)| v.as_str().map(|s| re.is_match(s)).unwrap_or(false))
                    {
                        Some((key, _)) => Some(Some(key.clone())),
                        None => None,
                    }
                }
                Detection::Check(check) => check(event).then_some(None),
            };
            let Some(matched_field) = matched_field else { continue };

            let mut finding = AgentFinding::new(
                AGENT_SECURITY_WATCHDOG,
                "Security Threat",
                rule.name,
                rule.severity,
                rule.confidence,
            )
            .description(format!("Detected: {} in event from {}", rule.name, event.source_system))
            .evidence("actor", actor)
            .remediation(rule.remediation);
            if let Some(field) = matched_field {
                finding = finding.evidence("matched_field", field);
            }
            self.tracer.agent_decision(
                &run.run_id,
                AGENT_SECURITY_WATCHDOG,
                "threat_detected",
                json!({ "rule": rule.name, "evidence": finding.evidence }),
            );
            findings.push(finding);
        }
        findings
    }

    fn historical_findings(&self, run: &PipelineRun, actor: &str) -> Vec<AgentFinding> {
        let history = EventHistory::new(self.history.as_ref());
        let mut findings = Vec::new();

        if actor != "Unknown" {
            let profile = history.actor_risk_history(actor, OFFENDER_LOOKBACK_DAYS);
            if profile.is_repeat_offender {
                findings.push(
                    AgentFinding::new(
                        AGENT_SECURITY_WATCHDOG,
                        "Behavioral Pattern",
                        "Repeat Security Offender",
                        Severity::High,
                        0.90,
                    )
                    .description(format!(
                        "Actor {actor} has {} high-severity events in past {OFFENDER_LOOKBACK_DAYS} days",
                        profile.high_severity_count
                    ))
                    .evidence("actor", actor)
                    .evidence("historical_events", profile.events_count)
                    .evidence("high_severity_count", profile.high_severity_count)
                    .evidence("avg_risk_score", (profile.risk_score * 100.0).round() / 100.0)
                    .remediation("Investigate actor's access patterns. Consider temporary privilege revocation."),
                );
                self.tracer.agent_decision(
                    &run.run_id,
                    AGENT_SECURITY_WATCHDOG,
                    "repeat_offender_flagged",
                    json!(profile),
                );
            }
        }

        let frequency = history.frequency_anomaly(&run.event.event_type, FREQUENCY_WINDOW_HOURS, FREQUENCY_THRESHOLD);
        if frequency.is_anomaly {
            findings.push(
                AgentFinding::new(
                    AGENT_SECURITY_WATCHDOG,
                    "Frequency Anomaly",
                    "Unusual Event Frequency",
                    Severity::Medium,
                    0.75,
                )
                .description(format!(
                    "{} {} events in past hour (threshold: {})",
                    frequency.count_in_window, run.event.event_type, frequency.threshold
                ))
                .evidence("count", frequency.count_in_window)
                .evidence("threshold", frequency.threshold)
                .evidence("anomaly_score", frequency.anomaly_score)
                .remediation("Investigate for potential attack or misconfiguration."),
            );
            self.tracer.agent_decision(
                &run.run_id,
                AGENT_SECURITY_WATCHDOG,
                "frequency_anomaly_detected",
                json!(frequency),
            );
        }
        findings
    }
}

#[async_trait]
impl Agent for SecurityWatchdog {
    fn id(&self) -> &'static str {
        AGENT_SECURITY_WATCHDOG
    }

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError> {
        let actor = run.event.actor_hint().unwrap_or_else(|| "Unknown".to_string());
        let rule_findings = self.rule_findings(run, &actor);
        let historical = self.historical_findings(run, &actor);

        let audit = AuditStep::new(
            "Security Analysis",
            format!(
                "Detected {} threats + {} behavioral patterns.",
                rule_findings.len(),
                historical.len()
            ),
        )
        .agent(AGENT_SECURITY_WATCHDOG)
        .detail("findings_count", rule_findings.len() + historical.len())
        .detail("rule_findings", rule_findings.len())
        .detail("historical_findings", historical.len())
        .detail("actor", actor.as_str());

        let mut findings = rule_findings;
        findings.extend(historical);
        Ok(AgentOutput::with_findings(findings, audit))
    }
}
