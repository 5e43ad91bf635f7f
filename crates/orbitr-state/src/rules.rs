//! Declarative compliance rules.
//!
//! Each rule pairs metadata (severity, frameworks, remediation) with a
//! [`Condition`] tree evaluated against an event. Built-in rules ship with
//! the binary; more can be loaded from a YAML or JSON file shaped like:
//!
//! ```yaml
//! rules:
//!   - id: POL-100
//!     name: Root login
//!     description: Direct root logins are forbidden
//!     severity: High
//!     confidence: 0.9
//!     frameworks: [CIS-5.4]
//!     remediation: Use named accounts with sudo.
//!     when:
//!       type: field_contains
//!       fields: [username]
//!       needles: [root]
//! ```
//!
//! A loaded rule with the id of an existing rule replaces it.

use std::path::Path;

use chrono::{Local, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use orbitr_protocol::{Severity, StandardizedEvent};

use crate::StateError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    /// Local hour of the event is before `start` or after `end`.
    OutsideHours { start: u32, end: u32 },
    SeverityIn { values: Vec<Severity> },
    /// None of the fields is present in the payload.
    MissingFields { fields: Vec<String> },
    FieldTrue { field: String },
    /// The field is false, reading an absent field as `default`.
    FieldFalse {
        field: String,
        #[serde(default = "default_true")]
        default: bool,
    },
    /// The first present field among `fields` contains any needle.
    FieldContains { fields: Vec<String>, needles: Vec<String> },
    /// The serialized payload contains any needle.
    PayloadContains { needles: Vec<String> },
    FieldGt { field: String, threshold: f64 },
    /// All fields are present, non-empty and equal.
    FieldsEqual { fields: Vec<String> },
}

/// Local wall-clock hour of a unix timestamp.
pub fn local_hour(timestamp: f64) -> u32 {
    Local
        .timestamp_millis_opt((timestamp * 1000.0) as i64)
        .single()
        .map(|dt| dt.hour())
        .unwrap_or(12)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    }
}

impl Condition {
    pub fn matches(&self, event: &StandardizedEvent) -> bool {
        match self {
            Condition::All { conditions } => conditions.iter().all(|c| c.matches(event)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.matches(event)),
            Condition::Not { condition } => !condition.matches(event),
            Condition::OutsideHours { start, end } => {
                let hour = local_hour(event.timestamp);
                hour < *start || hour > *end
            }
            Condition::SeverityIn { values } => values.contains(&event.severity),
            Condition::MissingFields { fields } => fields.iter().all(|f| !event.payload_has(f)),
            Condition::FieldTrue { field } => event.payload_bool(field).unwrap_or(false),
            Condition::FieldFalse { field, default } => !event.payload_bool(field).unwrap_or(*default),
            Condition::FieldContains { fields, needles } => fields
                .iter()
                .find_map(|f| event.payload.get(f).filter(|v| !v.is_null()))
                .map(value_text)
                .map(|text| needles.iter().any(|n| text.contains(&n.to_lowercase())))
                .unwrap_or(false),
            Condition::PayloadContains { needles } => {
                let text = event.payload_text();
                needles.iter().any(|n| text.contains(&n.to_lowercase()))
            }
            Condition::FieldGt { field, threshold } => {
                event.payload_f64(field).map(|v| v > *threshold).unwrap_or(false)
            }
            Condition::FieldsEqual { fields } => {
                if fields.len() < 2 {
                    return false;
                }
                let values: Vec<Option<&Value>> = fields
                    .iter()
                    .map(|f| event.payload.get(f).filter(|v| !v.is_null() && *v != &Value::from("")))
                    .collect();
                match values.first() {
                    Some(Some(first)) => values.iter().all(|v| v.as_ref() == Some(first)),
                    _ => false,
                }
            }
        }
    }
}

fn default_category() -> String {
    "Compliance".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub remediation: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub when: Condition,
}

impl RuleDefinition {
    /// Finding title prefix, e.g. `[POL-003]`.
    pub fn title_prefix(&self) -> String {
        format!("[{}]", self.id)
    }

    pub fn title(&self) -> String {
        format!("[{}] {}", self.id, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RuleDefinition>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[allow(clippy::too_many_arguments)]
fn builtin(
    id: &str,
    name: &str,
    description: &str,
    category: &str,
    severity: Severity,
    confidence: f64,
    frameworks: &[&str],
    remediation: &str,
    when: Condition,
) -> RuleDefinition {
    RuleDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        severity,
        confidence,
        frameworks: strings(frameworks),
        remediation: remediation.to_string(),
        enabled: true,
        when,
    }
}

/// The rules shipped with Orbitr.
pub fn builtin_rules() -> Vec<RuleDefinition> {
    vec![
        builtin(
            "POL-001",
            "Working Hours Enforcement",
            "Actions outside 6AM-10PM require approval",
            "Operational",
            Severity::Medium,
            0.75,
            &["SOC2-CC6.1", "ISO27001-A.12.1"],
            "Schedule during approved windows or obtain CAB approval.",
            Condition::OutsideHours { start: 6, end: 22 },
        ),
        builtin(
            "POL-002",
            "Change Ticket Required",
            "High/Critical events must reference a change ticket",
            "Compliance",
            Severity::High,
            0.88,
            &["SOC2-CC8.1", "ITIL"],
            "Create or link to an approved RFC before proceeding.",
            Condition::All {
                conditions: vec![
                    Condition::SeverityIn { values: vec![Severity::High, Severity::Critical] },
                    Condition::MissingFields { fields: strings(&["change_id", "ticket_id", "jira_id"]) },
                ],
            },
        ),
        builtin(
            "POL-003",
            "MFA Required for Privileged Access",
            "Sudo/privileged actions require MFA",
            "Security",
            Severity::Critical,
            0.95,
            &["ISO27001-A.9.4", "NIST-IA-2", "SOC2-CC6.1"],
            "Enforce MFA for all privileged operations.",
            Condition::All {
                conditions: vec![
                    Condition::Any {
                        conditions: vec![
                            Condition::FieldTrue { field: "privileged".into() },
                            Condition::FieldContains { fields: strings(&["action"]), needles: strings(&["sudo"]) },
                        ],
                    },
                    Condition::FieldFalse { field: "mfa_present".into(), default: true },
                ],
            },
        ),
        builtin(
            "POL-004",
            "Production Access Logging",
            "Production access must be logged with justification",
            "Security",
            Severity::Medium,
            0.80,
            &["ISO27001-A.12.4", "SOC2-CC7.2"],
            "Document business justification for production access.",
            Condition::All {
                conditions: vec![
                    Condition::FieldContains {
                        fields: strings(&["target", "host"]),
                        needles: strings(&["prod", "production"]),
                    },
                    Condition::MissingFields { fields: strings(&["justification"]) },
                ],
            },
        ),
        builtin(
            "POL-005",
            "Financial Threshold Exceeded",
            "Transactions over $1000 require dual approval",
            "Financial",
            Severity::High,
            0.92,
            &["SOX-404", "PCI-DSS-10.2"],
            "Escalate to Finance Controller for manual reconciliation.",
            Condition::FieldGt { field: "mismatch_amount".into(), threshold: 1000.0 },
        ),
        builtin(
            "POL-006",
            "Segregation of Duties Violation",
            "Same person cannot request and approve",
            "Compliance",
            Severity::High,
            0.95,
            &["SOX-302", "ISO27001-A.6.1"],
            "Implement proper approval chain.",
            Condition::FieldsEqual { fields: strings(&["requester_id", "approver_id"]) },
        ),
        builtin(
            "POL-007",
            "Sensitive Data Access",
            "PII/sensitive data access requires pre-approval",
            "Security",
            Severity::Critical,
            0.90,
            &["GDPR-Art32", "PCI-DSS-3.4"],
            "Obtain data access approval.",
            Condition::PayloadContains { needles: strings(&["pii", "ssn", "credit_card"]) },
        ),
    ]
}

/// Rule set evaluated by the compliance agent.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    rules: Vec<RuleDefinition>,
    fingerprint: Option<String>,
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl RulesEngine {
    pub fn with_builtins() -> Self {
        Self { rules: builtin_rules(), fingerprint: None }
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new(), fingerprint: None }
    }

    /// Load rules from a `.yaml`/`.yml` or `.json` file. Returns the number
    /// of rules read.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, StateError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let count = self.load_str(&content, is_yaml)?;
        tracing::info!(
            path = %path.display(),
            rules = count,
            fingerprint = self.fingerprint.as_deref().unwrap_or(""),
            "Loaded compliance rules"
        );
        Ok(count)
    }

    pub fn load_str(&mut self, content: &str, yaml: bool) -> Result<usize, StateError> {
        let file: RulesFile = if yaml {
            serde_yaml::from_str(content).map_err(|e| StateError::InvalidRules(e.to_string()))?
        } else {
            serde_json::from_str(content).map_err(|e| StateError::InvalidRules(e.to_string()))?
        };

        for rule in &file.rules {
            if rule.id.trim().is_empty() {
                return Err(StateError::InvalidRules("rule with empty id".into()));
            }
            if !(0.0..=1.0).contains(&rule.confidence) {
                return Err(StateError::InvalidRules(format!(
                    "rule {} confidence {} outside [0, 1]",
                    rule.id, rule.confidence
                )));
            }
        }

        let count = file.rules.len();
        for rule in file.rules {
            match self.rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => *existing = rule,
                None => self.rules.push(rule),
            }
        }
        self.fingerprint = Some(hex::encode(Sha256::digest(content.as_bytes())));
        Ok(count)
    }

    /// SHA-256 of the last loaded rules file.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Every rule, enabled or not.
    pub fn all_rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    pub fn enabled_rules(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter().filter(|r| r.enabled)
    }

    pub fn get(&self, id: &str) -> Option<&RuleDefinition> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Enabled rules whose condition matches `event`.
    pub fn evaluate(&self, event: &StandardizedEvent) -> Vec<&RuleDefinition> {
        self.enabled_rules().filter(|r| r.when.matches(event)).collect()
    }
}
