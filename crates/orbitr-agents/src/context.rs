//! Context handed to the LLM when synthesizing insights.
//!
//! Policies are grouped by domain; the general compliance policies are
//! added to every other domain's list. Remediations listed by the
//! applicable policies are the only "approved" actions the guardrails
//! accept without an `[UNVERIFIED]` mark.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use orbitr_protocol::{AgentFinding, Domain, StandardizedEvent};
use orbitr_state::{ActorRiskProfile, FrequencyAnomaly, SimilarEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPolicy {
    pub id: String,
    pub name: String,
    pub description: String,
    pub frameworks: Vec<String>,
    pub remediation: String,
}

fn policy(id: &str, name: &str, description: &str, frameworks: &[&str], remediation: &str) -> ContextPolicy {
    ContextPolicy {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        frameworks: frameworks.iter().map(|f| f.to_string()).collect(),
        remediation: remediation.to_string(),
    }
}

/// Everything known about an event at synthesis time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub applicable_policies: Vec<ContextPolicy>,
    pub approved_remediations: Vec<String>,
    pub historical_context: Vec<SimilarEvent>,
    pub actor_profile: Option<ActorRiskProfile>,
    pub frequency_anomaly: Option<FrequencyAnomaly>,
    pub event_domain: String,
    pub event_type: String,
    pub severity: String,
    /// Finding titles and descriptions, used to check root-cause support.
    pub findings_text: String,
}

/// History gathered by the caller before building a context.
#[derive(Debug, Clone, Default)]
pub struct HistoricalData {
    pub similar_events: Vec<SimilarEvent>,
    pub actor_risk: Option<ActorRiskProfile>,
    pub frequency_anomaly: Option<FrequencyAnomaly>,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    policies: HashMap<Domain, Vec<ContextPolicy>>,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextAssembler {
    pub fn new() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            Domain::Security,
            vec![
                policy(
                    "SEC-001",
                    "MFA Required for Privileged Access",
                    "All sudo/admin operations require multi-factor authentication",
                    &["ISO27001-A.9.4", "NIST-IA-2", "SOC2-CC6.1"],
                    "Enable MFA for all privileged operations",
                ),
                policy(
                    "SEC-002",
                    "Production Access Logging",
                    "All production environment access must be logged with justification",
                    &["ISO27001-A.12.4", "SOC2-CC7.2"],
                    "Document business justification for production access",
                ),
                policy(
                    "SEC-003",
                    "AWS Key Exposure Prevention",
                    "AWS access keys must never be exposed in logs or payloads",
                    &["CIS-AWS-1.4", "SOC2-CC6.7"],
                    "Rotate exposed key immediately and scan for usage",
                ),
            ],
        );
        policies.insert(
            Domain::Financial,
            vec![
                policy(
                    "FIN-001",
                    "Transaction Threshold Approval",
                    "Transactions over $1000 require dual approval",
                    &["SOX-404", "PCI-DSS-10.2"],
                    "Escalate to Finance Controller for approval",
                ),
                policy(
                    "FIN-002",
                    "Segregation of Duties",
                    "Same person cannot request and approve transactions",
                    &["SOX-302", "ISO27001-A.6.1"],
                    "Implement proper approval chain with different approvers",
                ),
            ],
        );
        policies.insert(
            Domain::Compliance,
            vec![
                policy(
                    "COMP-001",
                    "Working Hours Enforcement",
                    "System changes outside 6AM-10PM require CAB approval",
                    &["SOC2-CC6.1", "ISO27001-A.12.1"],
                    "Schedule during approved windows or obtain CAB approval",
                ),
                policy(
                    "COMP-002",
                    "Change Ticket Required",
                    "High/Critical severity events must reference a change ticket",
                    &["SOC2-CC8.1", "ITIL"],
                    "Create or link to an approved RFC before proceeding",
                ),
            ],
        );
        policies.insert(
            Domain::Infrastructure,
            vec![
                policy(
                    "INFRA-001",
                    "Resource Utilization Thresholds",
                    "CPU/Memory > 90% requires immediate action",
                    &["SRE-SLO", "ITIL-Capacity"],
                    "Scale horizontally or investigate resource hogs",
                ),
                policy(
                    "INFRA-002",
                    "Disk Space Management",
                    "Disk usage > 85% requires cleanup or expansion",
                    &["SRE-SLO", "ITIL-Capacity"],
                    "Clear logs, expand volume, or add storage",
                ),
            ],
        );
        Self { policies }
    }

    /// Policies for `domain`, followed by the general compliance policies.
    pub fn policies_for_domain(&self, domain: Domain) -> Vec<ContextPolicy> {
        let mut out = self.policies.get(&domain).cloned().unwrap_or_default();
        if domain != Domain::Compliance {
            out.extend(self.policies.get(&Domain::Compliance).cloned().unwrap_or_default());
        }
        out
    }

    pub fn approved_remediations(&self, domain: Domain) -> Vec<String> {
        self.policies_for_domain(domain)
            .into_iter()
            .map(|p| p.remediation)
            .filter(|r| !r.is_empty())
            .collect()
    }

    pub fn build(&self, event: &StandardizedEvent, findings: &[AgentFinding], history: HistoricalData) -> AnalysisContext {
        let findings_text = findings
            .iter()
            .map(|f| format!("{}: {}", f.title, f.description))
            .collect::<Vec<_>>()
            .join("\n");
        AnalysisContext {
            applicable_policies: self.policies_for_domain(event.domain),
            approved_remediations: self.approved_remediations(event.domain),
            historical_context: history.similar_events,
            actor_profile: history.actor_risk,
            frequency_anomaly: history.frequency_anomaly,
            event_domain: event.domain.as_str().to_string(),
            event_type: event.event_type.clone(),
            severity: event.severity.as_str().to_string(),
            findings_text,
        }
    }
}

pub fn format_policies(policies: &[ContextPolicy]) -> String {
    if policies.is_empty() {
        return "No specific policies loaded.".to_string();
    }
    policies
        .iter()
        .map(|p| format!("- [{}] {}: {} (Frameworks: {})", p.id, p.name, p.description, p.frameworks.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_remediations(remediations: &[String]) -> String {
    if remediations.is_empty() {
        return "No pre-approved remediations.".to_string();
    }
    remediations.iter().map(|r| format!("- {r}")).collect::<Vec<_>>().join("\n")
}
