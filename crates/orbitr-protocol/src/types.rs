use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Free-form JSON object attached to events and findings.
pub type Payload = Map<String, Value>;

/// Current wall-clock time as fractional unix seconds.
pub fn now_unix() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Convert fractional unix seconds to a UTC datetime (epoch on overflow).
pub fn unix_to_datetime(ts: f64) -> DateTime<Utc> {
    let millis = (ts * 1000.0) as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// ═══════════════════════════════════════════════════════════════
// Severity
// ═══════════════════════════════════════════════════════════════

/// Event and finding severity, ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Critical, Severity::High, Severity::Medium, Severity::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    /// Risk weight used when scoring findings.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.8,
            Severity::Medium => 0.5,
            Severity::Low => 0.2,
        }
    }

    /// Queue priority: 1 is most urgent.
    pub fn priority(&self) -> u8 {
        match self {
            Severity::Critical => 1,
            Severity::High => 2,
            Severity::Medium => 3,
            Severity::Low => 4,
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ProtocolError;

    /// Case-insensitive; `info` maps to Low and `warning` to Medium.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "info" => Ok(Severity::Low),
            "medium" | "warning" | "warn" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(ProtocolError::UnknownSeverity(s.to_string())),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Severity> for String {
    fn from(value: Severity) -> Self {
        value.as_str().to_string()
    }
}

// ═══════════════════════════════════════════════════════════════
// Domain
// ═══════════════════════════════════════════════════════════════

/// Business domain of an event. Unrecognized names become `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Domain {
    Security,
    Compliance,
    Financial,
    Infrastructure,
    #[default]
    Unknown,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Security => "Security",
            Domain::Compliance => "Compliance",
            Domain::Financial => "Financial",
            Domain::Infrastructure => "Infrastructure",
            Domain::Unknown => "Unknown",
        }
    }

    /// Infer a domain from keywords in the event type.
    pub fn infer(event_type: &str) -> Domain {
        let et = event_type.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| et.contains(w));
        if has(&["access", "auth", "login", "ssh"]) {
            Domain::Security
        } else if has(&["financial", "billing", "transaction", "cost"]) {
            Domain::Financial
        } else if has(&["metric", "cpu", "memory", "disk"]) {
            Domain::Infrastructure
        } else if has(&["policy", "compliance", "audit"]) {
            Domain::Compliance
        } else {
            Domain::Unknown
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Domain {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "security" => Domain::Security,
            "compliance" => Domain::Compliance,
            "financial" => Domain::Financial,
            "infrastructure" => Domain::Infrastructure,
            _ => Domain::Unknown,
        }
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        value.as_str().to_string()
    }
}

// ═══════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A single operational event in the canonical Orbitr shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedEvent {
    #[serde(default = "new_id")]
    pub event_id: String,
    #[serde(default = "new_id")]
    pub correlation_id: String,
    #[serde(default = "now_unix")]
    pub timestamp: f64,
    pub event_type: String,
    pub source_system: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub domain: Domain,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub risk_score: f64,
}

impl StandardizedEvent {
    pub fn new(event_type: impl Into<String>, source_system: impl Into<String>) -> Self {
        Self {
            event_id: new_id(),
            correlation_id: new_id(),
            timestamp: now_unix(),
            event_type: event_type.into(),
            source_system: source_system.into(),
            severity: Severity::default(),
            domain: Domain::default(),
            actor_id: None,
            resource_id: None,
            payload: Payload::new(),
            metadata: None,
            tags: Vec::new(),
            risk_score: 0.0,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    /// Replace the payload. Non-object values are ignored.
    pub fn with_payload(mut self, payload: Value) -> Self {
        if let Value::Object(map) = payload {
            self.payload = map;
        }
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Fill in derived fields: domain inference when the domain is unknown.
    pub fn normalize(&mut self) {
        if self.domain == Domain::Unknown {
            self.domain = Domain::infer(&self.event_type);
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.event_type.trim().is_empty() {
            return Err(ProtocolError::InvalidEvent("event_type must not be empty".into()));
        }
        if self.source_system.trim().is_empty() {
            return Err(ProtocolError::InvalidEvent("source_system must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.risk_score) {
            return Err(ProtocolError::InvalidEvent(format!(
                "risk_score {} outside [0, 1]",
                self.risk_score
            )));
        }
        Ok(())
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        unix_to_datetime(self.timestamp)
    }

    pub fn event_type_lower(&self) -> String {
        self.event_type.to_lowercase()
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Numeric payload field; numeric strings are accepted.
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        match self.payload.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean payload field; "true"/"false" strings are accepted.
    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        match self.payload.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether the payload has a non-null, non-empty value for `key`.
    pub fn payload_has(&self, key: &str) -> bool {
        match self.payload.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Lowercased JSON rendering of the payload, for keyword scans.
    pub fn payload_text(&self) -> String {
        Value::Object(self.payload.clone()).to_string().to_lowercase()
    }

    /// Who performed the action: explicit actor, then payload user fields.
    pub fn actor_hint(&self) -> Option<String> {
        if let Some(actor) = self.actor_id.as_ref().filter(|a| !a.is_empty()) {
            return Some(actor.clone());
        }
        ["user_id", "username", "actor_id"]
            .iter()
            .find_map(|k| self.payload_str(k).filter(|v| !v.is_empty()))
            .map(str::to_string)
    }

    /// What was acted upon: explicit resource, then payload target fields.
    pub fn resource_hint(&self) -> Option<String> {
        if let Some(res) = self.resource_id.as_ref().filter(|r| !r.is_empty()) {
            return Some(res.clone());
        }
        ["resource_id", "target", "host"]
            .iter()
            .find_map(|k| self.payload_str(k).filter(|v| !v.is_empty()))
            .map(str::to_string)
    }
}

// ═══════════════════════════════════════════════════════════════
// Findings and insights
// ═══════════════════════════════════════════════════════════════

/// One observation raised by an expert agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFinding {
    pub agent_id: String,
    pub finding_type: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl AgentFinding {
    pub fn new(
        agent_id: &str,
        finding_type: &str,
        title: impl Into<String>,
        severity: Severity,
        confidence: f64,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            finding_type: finding_type.to_string(),
            title: title.into(),
            description: String::new(),
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: Payload::new(),
            remediation: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn evidence(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.evidence.insert(key.to_string(), value.into());
        self
    }

    pub fn remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    /// Weighted risk contribution of this finding.
    pub fn risk(&self) -> f64 {
        self.severity.weight() * self.confidence
    }
}

/// How an insight was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightSource {
    #[default]
    RuleBased,
    Llm,
    Refusal,
}

/// Human-readable synthesis of an event and its findings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Insight {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub source: InsightSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_score: Option<u32>,
    #[serde(default)]
    pub guardrails_passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One entry of the per-run audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStep {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Payload,
}

impl AuditStep {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            agent: None,
            timestamp: now_unix(),
            duration_ms: None,
            message: message.into(),
            details: Payload::new(),
        }
    }

    pub fn agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn duration_ms(mut self, ms: f64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_weights() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Critical.priority(), 1);
        assert_eq!(Severity::Low.priority(), 4);
        assert!((Severity::High.weight() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_severity_parse_aliases() {
        assert_eq!("warning".parse::<Severity>().unwrap(), Severity::Medium);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_unknown_domain_string_maps_to_unknown() {
        let d: Domain = serde_json::from_str("\"DevOps\"").unwrap();
        assert_eq!(d, Domain::Unknown);
    }

    #[test]
    fn test_numeric_string_payload_field() {
        let ev = StandardizedEvent::new("metric", "prometheus")
            .with_payload(serde_json::json!({"value": "91.5", "mfa_present": "false"}));
        assert_eq!(ev.payload_f64("value"), Some(91.5));
        assert_eq!(ev.payload_bool("mfa_present"), Some(false));
    }
}
