//! Agent identifiers and pipeline-wide constants.

pub const AGENT_NORMALIZER: &str = "normalizer";
pub const AGENT_SUPERVISOR: &str = "supervisor";
pub const AGENT_SECURITY_WATCHDOG: &str = "security_watchdog";
pub const AGENT_COMPLIANCE_SENTINEL: &str = "compliance_sentinel";
pub const AGENT_ANOMALY_DETECTOR: &str = "anomaly_detector";
pub const AGENT_COST_ANALYST: &str = "cost_analyst";
pub const AGENT_RESOURCE_WATCHER: &str = "resource_watcher";
pub const AGENT_INFRASTRUCTURE_MONITOR: &str = "infrastructure_monitor";
pub const AGENT_INSIGHT_SYNTHESIZER: &str = "insight_synthesizer";
pub const AGENT_AUDIT_COORDINATOR: &str = "audit_coordinator";

/// Every agent the pipeline knows about, in pipeline order.
pub const ALL_AGENTS: [&str; 10] = [
    AGENT_NORMALIZER,
    AGENT_SUPERVISOR,
    AGENT_SECURITY_WATCHDOG,
    AGENT_COMPLIANCE_SENTINEL,
    AGENT_ANOMALY_DETECTOR,
    AGENT_COST_ANALYST,
    AGENT_RESOURCE_WATCHER,
    AGENT_INFRASTRUCTURE_MONITOR,
    AGENT_INSIGHT_SYNTHESIZER,
    AGENT_AUDIT_COORDINATOR,
];

/// Agents that are considered "monitoring" even without recent findings.
pub const CORE_AGENTS: [&str; 4] = [
    AGENT_COMPLIANCE_SENTINEL,
    AGENT_SECURITY_WATCHDOG,
    AGENT_INSIGHT_SYNTHESIZER,
    AGENT_SUPERVISOR,
];

/// Compliance frameworks a finding or insight may cite.
pub const KNOWN_FRAMEWORKS: [&str; 11] = [
    "SOC2", "SOX", "ISO27001", "NIST", "PCI-DSS", "GDPR", "HIPAA", "CIS", "ITIL", "SRE", "FedRAMP",
];

/// Prefix used for audit rows and workflows created by the quick demo.
pub const DEMO_PREFIX: &str = "demo_";
