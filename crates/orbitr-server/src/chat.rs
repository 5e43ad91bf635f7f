//! Operator chat: intent detection, system-state context and an optional
//! LLM answer with canned fallbacks.

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use orbitr_agents::{ChatMessage, CompletionBackend, CompletionRequest};
use orbitr_protocol::Severity;
use orbitr_state::{AgentFindingRow, AuditRecord, AuditStore, StateError, Workflow};

const CHAT_TEMPERATURE: f32 = 0.4;
const CHAT_MAX_TOKENS: u32 = 300;
const HISTORY_TURNS: usize = 3;

const SYSTEM_PROMPT: &str = "You are Orbiter, an advanced AI system monitor for SDLC compliance.
EXPLAIN system behavior using REAL DATA from context.

RULES:
1. NEVER invent data - only use information in context
2. Format findings: '[Agent] detected [Issue] because [Evidence]'
3. Be concise and technical
4. If workflow blocked, explain WHY

Tone: professional, precise, technical.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

fn default_role() -> String {
    "user".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub label: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAction {
    pub navigate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub role: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_actions: Vec<SuggestedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ChatAction>,
}

/// What the message is about, decided by keyword.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Intent {
    pub suggestion: Option<SuggestedAction>,
    pub navigate: Option<String>,
    pub needs_context: bool,
}

const NAVIGATION_WORDS: [&str; 5] = ["show", "go", "take", "open", "see"];

pub fn detect_intent(message: &str) -> Intent {
    let lower = message.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    let wants_navigation = any(&NAVIGATION_WORDS);

    let (label, href, needs_context, navigable) = if any(&["workflow", "blocked", "stuck", "pending"]) {
        ("View Workflows", "/workflows", true, true)
    } else if any(&["incident", "violation", "critical", "alert"]) {
        ("View Incidents", "/incidents", true, true)
    } else if any(&["happening", "status", "now", "current"]) {
        ("View Dashboard", "/", true, false)
    } else if any(&["policy", "compliance", "rule"]) {
        ("View Policies", "/policies", true, true)
    } else if any(&["analytics", "report", "data"]) {
        ("View Analytics", "/analytics", false, true)
    } else {
        return Intent::default();
    };

    Intent {
        suggestion: Some(SuggestedAction { label: label.to_string(), href: href.to_string() }),
        navigate: (navigable && wants_navigation).then(|| href.to_string()),
        needs_context,
    }
}

fn short_id_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b[a-f0-9]{8}\b").ok()).as_ref()
}

/// An eight-hex-digit reference (a workflow id prefix) in the message.
pub fn find_reference(message: &str) -> Option<String> {
    short_id_regex()?.find(message).map(|m| m.as_str().to_lowercase())
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Recent workflows, high-severity incidents and findings as prompt context.
pub fn format_system_context(workflows: &[Workflow], incidents: &[AuditRecord], findings: &[AgentFindingRow]) -> String {
    let mut parts = Vec::new();

    if !workflows.is_empty() {
        let lines: Vec<String> = workflows
            .iter()
            .map(|w| {
                let blocked = w
                    .metadata
                    .get("blocked_reason")
                    .and_then(|v| v.as_str())
                    .map(|r| format!(" BLOCKED: {r}"))
                    .unwrap_or_default();
                format!(
                    "  [{}] {} | {} | Step {}{}",
                    short(&w.workflow_id),
                    w.workflow_type,
                    w.status.as_str(),
                    w.current_step,
                    blocked
                )
            })
            .collect();
        parts.push(format!("WORKFLOWS:\n{}", lines.join("\n")));
    }

    if !incidents.is_empty() {
        let lines: Vec<String> = incidents
            .iter()
            .map(|i| format!("  [{}] {} | {}", short(&i.correlation_id), i.event_type, i.severity.as_str()))
            .collect();
        parts.push(format!("INCIDENTS:\n{}", lines.join("\n")));
    }

    if !findings.is_empty() {
        let lines: Vec<String> = findings
            .iter()
            .take(5)
            .map(|f| {
                let title: String = f.title.chars().take(40).collect();
                format!("  [{}] {}: {}...", f.agent_id, f.finding_type, title)
            })
            .collect();
        parts.push(format!("FINDINGS:\n{}", lines.join("\n")));
    }

    if parts.is_empty() {
        "No recent activity.".to_string()
    } else {
        parts.join("\n\n")
    }
}

pub fn system_context(store: &AuditStore) -> Result<String, StateError> {
    let mut workflows = store.list_workflows()?;
    workflows.sort_by(|a, b| b.updated_at.total_cmp(&a.updated_at));
    workflows.truncate(5);
    let incidents: Vec<AuditRecord> = store
        .recent_audit(50, None, None)?
        .into_iter()
        .filter(|r| matches!(r.severity, Severity::High | Severity::Critical))
        .take(5)
        .collect();
    let findings = store.recent_findings(10)?;
    Ok(format_system_context(&workflows, &incidents, &findings))
}

pub fn workflow_details(workflows: &[Workflow], reference: &str) -> String {
    let Some(w) = workflows.iter().find(|w| w.workflow_id.to_lowercase().contains(reference)) else {
        return format!("No workflow found matching '{reference}'");
    };
    let meta = |key: &str, default: &str| {
        w.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    };
    format!(
        "WORKFLOW {}:\n  Type: {}\n  Status: {}\n  Step: {}/{}\n  Requester: {}\n  Blocked: {}\n  Policy: {}",
        short(&w.workflow_id),
        w.workflow_type,
        w.status.as_str(),
        w.current_step,
        w.steps.len(),
        w.requester_id.as_deref().unwrap_or("N/A"),
        meta("blocked_reason", "No"),
        meta("policy_id", "N/A"),
    )
}

pub fn fallback_reply(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("workflow") {
        "I see you're asking about workflows. The system has active compliance workflows being tracked. Check Workflows page for details."
    } else if lower.contains("incident") {
        "Regarding incidents: the system monitors security and compliance events continuously. Check Incidents page for full details."
    } else if lower.contains("policy") {
        "Policies govern our compliance rules. View the Policies page to see all active enforcement rules."
    } else {
        "I'm analyzing the system state. Check the dashboard for real-time information."
    }
}

pub fn build_messages(request: &ChatRequest, context: &str) -> Vec<ChatMessage> {
    let mut system = SYSTEM_PROMPT.to_string();
    if !context.is_empty() {
        system.push_str(&format!("\n\nSYSTEM STATE:\n{context}"));
    }
    let mut messages = vec![ChatMessage::system(system)];
    let skip = request.history.len().saturating_sub(HISTORY_TURNS);
    messages.extend(
        request
            .history
            .iter()
            .skip(skip)
            .map(|turn| ChatMessage { role: turn.role.clone(), content: turn.content.clone() }),
    );
    messages.push(ChatMessage::user(request.message.clone()));
    messages
}

/// Answer one chat message.
pub async fn respond(store: &AuditStore, llm: Option<&dyn CompletionBackend>, request: &ChatRequest) -> ChatReply {
    let intent = detect_intent(&request.message);

    let mut context = String::new();
    if intent.needs_context {
        context = system_context(store).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Chat context unavailable");
            String::new()
        });
    }
    if let Some(reference) = find_reference(&request.message) {
        match store.list_workflows() {
            Ok(workflows) => context = workflow_details(&workflows, &reference),
            Err(e) => tracing::warn!(error = %e, "Workflow lookup failed"),
        }
    }

    let answer = match llm {
        Some(llm) => {
            let chat = CompletionRequest {
                messages: build_messages(request, &context),
                max_tokens: CHAT_MAX_TOKENS,
                temperature: Some(CHAT_TEMPERATURE),
            };
            match llm.complete(&chat).await {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(error = %e, "Chat completion failed");
                    None
                }
            }
        }
        None => None,
    };
    let content = answer
        .map(|a| a.trim().to_string())
        .filter(|a| a.chars().count() >= 5)
        .unwrap_or_else(|| fallback_reply(&request.message).to_string());

    ChatReply {
        role: "assistant".to_string(),
        content,
        timestamp: Utc::now().to_rfc3339(),
        suggested_actions: intent.suggestion.into_iter().collect(),
        action: intent.navigate.map(|navigate| ChatAction { navigate }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    #[test]
    fn test_intent_with_navigation() {
        let intent = detect_intent("Show me the blocked workflows");
        assert_eq!(intent.suggestion.unwrap().href, "/workflows");
        assert_eq!(intent.navigate.as_deref(), Some("/workflows"));
        assert!(intent.needs_context);
    }

    #[test]
    fn test_intent_without_navigation() {
        let intent = detect_intent("any critical alerts?");
        assert_eq!(intent.suggestion.unwrap().label, "View Incidents");
        assert_eq!(intent.navigate, None);
    }

    #[test]
    fn test_dashboard_intent_never_navigates() {
        let intent = detect_intent("show current status");
        assert_eq!(intent.suggestion.unwrap().href, "/");
        assert_eq!(intent.navigate, None);
    }

    #[test]
    fn test_analytics_needs_no_context() {
        let intent = detect_intent("open the report");
        assert!(!intent.needs_context);
        assert_eq!(intent.navigate.as_deref(), Some("/analytics"));
    }

    #[test]
    fn test_no_intent() {
        assert_eq!(detect_intent("hello there"), Intent::default());
    }

    #[test]
    fn test_find_reference() {
        assert_eq!(find_reference("why is 3F2A9C1B stuck?").as_deref(), Some("3f2a9c1b"));
        assert_eq!(find_reference("nothing here"), None);
        assert_eq!(find_reference("abc123"), None, "too short");
    }

    #[test]
    fn test_workflow_details_reports_block_reason() {
        let mut metadata = Map::new();
        metadata.insert("blocked_reason".into(), Value::from("Policy violation detected"));
        let mut workflow =
            Workflow::from_template("change_approval", "corr", Some("alice"), metadata).unwrap();
        workflow.workflow_id = "3f2a9c1b-0000-0000-0000-000000000000".into();

        let details = workflow_details(&[workflow], "3f2a9c1b");
        assert!(details.starts_with("WORKFLOW 3f2a9c1b:"));
        assert!(details.contains("Requester: alice"));
        assert!(details.contains("Blocked: Policy violation detected"));
        assert!(details.contains("Step: 0/6"));

        assert_eq!(workflow_details(&[], "deadbeef"), "No workflow found matching 'deadbeef'");
    }

    #[test]
    fn test_empty_context() {
        assert_eq!(format_system_context(&[], &[], &[]), "No recent activity.");
    }

    #[test]
    fn test_build_messages_keeps_last_three_turns() {
        let request = ChatRequest {
            message: "and now?".into(),
            history: (0..5)
                .map(|i| ChatTurn { role: "user".into(), content: format!("turn {i}") })
                .collect(),
        };
        let messages = build_messages(&request, "WORKFLOWS:\n  none");
        assert_eq!(messages.len(), 5);
        assert!(messages[0].content.contains("SYSTEM STATE:\nWORKFLOWS"));
        assert_eq!(messages[1].content, "turn 2");
        assert_eq!(messages[4].content, "and now?");
    }

    #[tokio::test]
    async fn test_respond_without_llm_uses_fallback() {
        let store = AuditStore::open_in_memory().unwrap();
        let request = ChatRequest { message: "go to my workflow list".into(), history: vec![] };
        let reply = respond(&store, None, &request).await;
        assert_eq!(reply.role, "assistant");
        assert!(reply.content.starts_with("I see you're asking about workflows"));
        assert_eq!(reply.action, Some(ChatAction { navigate: "/workflows".into() }));
        assert_eq!(reply.suggested_actions.len(), 1);
    }
}
