//! Agent activity monitor, derived from recent findings and audit rows.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use orbitr_protocol::{
    now_unix, AGENT_ANOMALY_DETECTOR, AGENT_AUDIT_COORDINATOR, AGENT_COMPLIANCE_SENTINEL, AGENT_COST_ANALYST,
    AGENT_INFRASTRUCTURE_MONITOR, AGENT_INSIGHT_SYNTHESIZER, AGENT_NORMALIZER, AGENT_RESOURCE_WATCHER,
    AGENT_SECURITY_WATCHDOG, AGENT_SUPERVISOR, CORE_AGENTS,
};
use orbitr_state::store::AgentActivity;
use orbitr_state::{AuditStore, StateError};

/// Display name and one-line description per agent.
pub const AGENT_DEFINITIONS: [(&str, &str, &str); 10] = [
    (AGENT_COMPLIANCE_SENTINEL, "Compliance Sentinel", "Policy & regulation checker"),
    (AGENT_SECURITY_WATCHDOG, "Security Watchdog", "Threat & vulnerability detector"),
    (AGENT_INSIGHT_SYNTHESIZER, "Insight Synthesizer", "LLM-powered analysis engine"),
    (AGENT_SUPERVISOR, "Supervisor Agent", "Dynamic agent routing orchestrator"),
    (AGENT_ANOMALY_DETECTOR, "Anomaly Detector", "Pattern anomaly correlator"),
    (AGENT_COST_ANALYST, "Cost Analyst", "Financial & budget monitor"),
    (AGENT_RESOURCE_WATCHER, "Resource Watcher", "Cloud resource auditor"),
    (AGENT_INFRASTRUCTURE_MONITOR, "Infrastructure Monitor", "System health tracker"),
    (AGENT_NORMALIZER, "Event Normalizer", "Event standardization engine"),
    (AGENT_AUDIT_COORDINATOR, "Audit Coordinator", "Persistence & logging manager"),
];

const PROCESSING_WINDOW_SECS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentStatus {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `active`, `processing`, `idle` or `offline`.
    pub status: String,
    #[serde(rename = "lastActive")]
    pub last_active: String,
    pub task: String,
}

fn last_active_label(seconds_ago: f64) -> String {
    if seconds_ago < PROCESSING_WINDOW_SECS {
        "Just now".to_string()
    } else if seconds_ago < 120.0 {
        format!("{}s ago", seconds_ago as u64)
    } else {
        format!("{}m ago", (seconds_ago / 60.0) as u64)
    }
}

/// Status of every known agent given its activity in the window.
pub fn agent_statuses(activity: &HashMap<String, AgentActivity>, now: f64) -> Vec<AgentStatus> {
    AGENT_DEFINITIONS
        .iter()
        .map(|(id, name, description)| {
            let (status, last_active, task) = match activity.get(*id) {
                Some(seen) => {
                    let seconds_ago = (now - seen.last_activity).max(0.0);
                    let status = if seconds_ago < PROCESSING_WINDOW_SECS { "processing" } else { "active" };
                    let task = if seen.finding_count > 0 {
                        format!("Processed {} findings", seen.finding_count)
                    } else {
                        "Monitoring activity".to_string()
                    };
                    (status, last_active_label(seconds_ago), task)
                }
                None if CORE_AGENTS.contains(id) => {
                    ("active", "Monitoring".to_string(), "Watching for events".to_string())
                }
                None => ("idle", "Standby".to_string(), "Ready when needed".to_string()),
            };
            AgentStatus {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                status: status.to_string(),
                last_active,
                task,
            }
        })
        .collect()
}

pub fn summarize(statuses: &[AgentStatus]) -> BTreeMap<String, usize> {
    let mut summary: BTreeMap<String, usize> =
        ["active", "processing", "idle", "offline"].iter().map(|s| (s.to_string(), 0)).collect();
    for status in statuses {
        *summary.entry(status.status.clone()).or_insert(0) += 1;
    }
    summary
}

/// Agent statuses over the last `minutes`.
pub fn current_statuses(store: &AuditStore, minutes: u32) -> Result<Vec<AgentStatus>, StateError> {
    let now = now_unix();
    let activity = store.agent_activity(now - f64::from(minutes) * 60.0)?;
    Ok(agent_statuses(&activity, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seen(ago: f64, findings: u64, now: f64) -> AgentActivity {
        AgentActivity { last_activity: now - ago, finding_count: findings }
    }

    #[test]
    fn test_statuses_by_recency() {
        let now = 10_000.0;
        let activity: HashMap<String, AgentActivity> = [
            (AGENT_SECURITY_WATCHDOG.to_string(), seen(5.0, 3, now)),
            (AGENT_COST_ANALYST.to_string(), seen(45.0, 0, now)),
            (AGENT_RESOURCE_WATCHER.to_string(), seen(200.0, 1, now)),
        ]
        .into_iter()
        .collect();

        let statuses = agent_statuses(&activity, now);
        assert_eq!(statuses.len(), 10);
        let by_id = |id: &str| statuses.iter().find(|s| s.id == id).unwrap().clone();

        let watchdog = by_id(AGENT_SECURITY_WATCHDOG);
        assert_eq!(watchdog.status, "processing");
        assert_eq!(watchdog.last_active, "Just now");
        assert_eq!(watchdog.task, "Processed 3 findings");

        let cost = by_id(AGENT_COST_ANALYST);
        assert_eq!(cost.status, "active");
        assert_eq!(cost.last_active, "45s ago");
        assert_eq!(cost.task, "Monitoring activity");

        assert_eq!(by_id(AGENT_RESOURCE_WATCHER).last_active, "3m ago");

        let supervisor = by_id(AGENT_SUPERVISOR);
        assert_eq!(supervisor.status, "active", "core agents always monitor");
        assert_eq!(supervisor.last_active, "Monitoring");

        let normalizer = by_id(AGENT_NORMALIZER);
        assert_eq!(normalizer.status, "idle");
        assert_eq!(normalizer.task, "Ready when needed");
    }

    #[test]
    fn test_summary_counts() {
        let statuses = agent_statuses(&HashMap::new(), 0.0);
        let summary = summarize(&statuses);
        assert_eq!(summary["active"], CORE_AGENTS.len());
        assert_eq!(summary["idle"], 10 - CORE_AGENTS.len());
        assert_eq!(summary["processing"], 0);
        assert_eq!(summary["offline"], 0);
    }

    #[test]
    fn test_status_serializes_camel_case_last_active() {
        let statuses = agent_statuses(&HashMap::new(), 0.0);
        let value = serde_json::to_value(&statuses[0]).unwrap();
        assert_eq!(value["lastActive"], "Monitoring");
        assert_eq!(value["name"], "Compliance Sentinel");
    }
}
