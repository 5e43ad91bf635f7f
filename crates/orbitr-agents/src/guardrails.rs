//! Checks around LLM use.
//!
//! Before a call: is there enough context to ground an answer?
//! After a call: does the answer stay within that context? Unapproved
//! actions are marked `[UNVERIFIED]`, unsupported root causes
//! `[INFERENCE]`, and citations of unknown frameworks produce warnings.
//! Nothing is silently dropped.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use orbitr_protocol::KNOWN_FRAMEWORKS;

use crate::context::AnalysisContext;

/// Minimum context score for an LLM call to be considered grounded.
pub const SUFFICIENT_CONTEXT_SCORE: u32 = 60;
const ACTION_OVERLAP_RATIO: f64 = 0.3;
const ROOT_CAUSE_SUPPORT_RATIO: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCheck {
    pub sufficient: bool,
    pub score: u32,
    pub issues: Vec<String>,
    pub recommendation: String,
}

/// Score the context out of 100 before calling the LLM.
pub fn check_context(context: &AnalysisContext) -> ContextCheck {
    let mut score: i32 = 100;
    let mut issues = Vec::new();

    if context.applicable_policies.is_empty() {
        issues.push("No policies loaded".to_string());
        score -= 40;
    }
    if context.approved_remediations.is_empty() {
        issues.push("No approved remediations".to_string());
        score -= 20;
    }
    if context.historical_context.is_empty() {
        issues.push("No historical baseline".to_string());
        score -= 15;
    }
    if context.actor_profile.is_none() {
        issues.push("No actor risk profile".to_string());
        score -= 10;
    }

    let score = score.max(0) as u32;
    let sufficient = score >= SUFFICIENT_CONTEXT_SCORE;
    ContextCheck {
        sufficient,
        score,
        issues,
        recommendation: if sufficient {
            "Proceed".to_string()
        } else {
            "Add more context or use rule-based fallback".to_string()
        },
    }
}

/// LLM answer normalized to summary, root cause and actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub summary: String,
    pub root_cause: Option<String>,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn first_string(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
}

/// Parse a model reply that should contain a JSON object.
///
/// Markdown fences and text around the object are ignored. Field aliases
/// (`analysis`, `rootCause`, `cause`, `recommended_actions`,
/// `recommendations`) are accepted. Without a parseable object the text
/// itself becomes the summary.
pub fn parse_json_response(raw: &str) -> ParsedResponse {
    if raw.trim().is_empty() {
        return ParsedResponse { summary: "No response received".to_string(), ..Default::default() };
    }

    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    let (start, end) = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => {
            return ParsedResponse {
                summary: truncate_chars(cleaned, 200),
                parse_error: Some("No JSON object found".to_string()),
                ..Default::default()
            }
        }
    };

    match serde_json::from_str::<Value>(&cleaned[start..=end]) {
        Ok(parsed) => {
            let actions = ["actions", "recommended_actions", "recommendations"]
                .iter()
                .filter_map(|k| parsed.get(*k))
                .find(|v| match v {
                    Value::Array(items) => !items.is_empty(),
                    Value::String(s) => !s.is_empty(),
                    _ => false,
                })
                .map(|v| match v {
                    Value::Array(items) => items
                        .iter()
                        .map(|i| match i {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                    Value::String(s) => vec![s.clone()],
                    _ => Vec::new(),
                })
                .unwrap_or_default();
            ParsedResponse {
                summary: first_string(&parsed, &["summary", "analysis"]).unwrap_or_default(),
                root_cause: first_string(&parsed, &["root_cause", "rootCause", "cause"]),
                actions,
                parse_error: None,
            }
        }
        Err(e) => ParsedResponse {
            summary: truncate_chars(cleaned, 200),
            parse_error: Some(e.to_string()),
            ..Default::default()
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailOutcome {
    pub valid: bool,
    pub response: ParsedResponse,
    pub warnings: Vec<String>,
    pub refused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<String>,
}

fn words(text: &str, min_len: usize) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() >= min_len.max(1))
        .map(str::to_string)
        .collect()
}

/// At least 30% of the shorter text's words appear in the other.
pub fn similar(a: &str, b: &str) -> bool {
    let wa = words(a, 1);
    let wb = words(b, 1);
    if wa.is_empty() || wb.is_empty() {
        return false;
    }
    let overlap = wa.intersection(&wb).count() as f64;
    overlap / wa.len().min(wb.len()) as f64 >= ACTION_OVERLAP_RATIO
}

/// At least 20% of the claim's terms (4+ chars) appear in the evidence.
pub fn has_evidence_support(claim: &str, evidence: &str) -> bool {
    let claim_terms = words(claim, 4);
    if claim_terms.is_empty() {
        return true;
    }
    let evidence_terms = words(evidence, 4);
    let overlap = claim_terms.intersection(&evidence_terms).count() as f64;
    overlap / claim_terms.len() as f64 >= ROOT_CAUSE_SUPPORT_RATIO
}

fn citation_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][A-Z0-9]+(?:-[A-Z0-9.]*[0-9][A-Z0-9.]*|-[A-Z]+)+\b").ok())
        .as_ref()
}

fn is_known_framework(citation: &str) -> bool {
    KNOWN_FRAMEWORKS.iter().map(|f| f.to_uppercase()).any(|f| {
        citation == f || citation.starts_with(&format!("{f}-"))
    })
}

/// Framework-style citations (`SOC2-CC6.1`, `XYZ-4.2`) in `text` that are
/// not policy ids of the context. Only citations with a digit count.
pub fn extract_citations(text: &str, policy_ids: &HashSet<&str>) -> Vec<String> {
    let upper = text.to_uppercase();
    let Some(re) = citation_regex() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.find_iter(&upper)
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .filter(|c| c.contains('-') && c.chars().any(|ch| ch.is_ascii_digit()))
        .filter(|c| !policy_ids.contains(c.as_str()) && !c.starts_with("POL-"))
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Validate a parsed answer against the context it was grounded on.
pub fn validate_response(response: ParsedResponse, context: &AnalysisContext, strict: bool) -> GuardrailOutcome {
    if strict && context.applicable_policies.is_empty() {
        return GuardrailOutcome {
            valid: false,
            response: ParsedResponse {
                summary: "Unable to analyze - no compliance policies loaded for this domain.".to_string(),
                root_cause: None,
                actions: vec!["Manual review required - context insufficient".to_string()],
                parse_error: None,
            },
            warnings: vec!["No policies in context".to_string()],
            refused: true,
            refusal_reason: Some("No applicable policies loaded for event domain".to_string()),
        };
    }

    let mut warnings = Vec::new();
    let mut modified = response.clone();

    modified.actions = response
        .actions
        .iter()
        .map(|action| {
            if context.approved_remediations.iter().any(|approved| similar(action, approved)) {
                action.clone()
            } else {
                let head: String = action.chars().take(50).collect();
                warnings.push(format!("Action not in approved list: {head}..."));
                format!("[UNVERIFIED] {action}")
            }
        })
        .collect();

    if let Some(root_cause) = response.root_cause.as_deref().filter(|r| !r.is_empty()) {
        if !context.findings_text.is_empty() && !has_evidence_support(root_cause, &context.findings_text) {
            modified.root_cause = Some(format!("[INFERENCE] {root_cause}"));
            warnings.push("Root cause not directly supported by findings".to_string());
        }
    }

    let policy_ids: HashSet<&str> = context.applicable_policies.iter().map(|p| p.id.as_str()).collect();
    let cited_text = format!("{} {}", response.summary, response.actions.join(" "));
    for citation in extract_citations(&cited_text, &policy_ids) {
        if !is_known_framework(&citation) {
            warnings.push(format!("Unknown framework cited: {citation}"));
        }
    }

    GuardrailOutcome {
        valid: warnings.is_empty(),
        response: modified,
        warnings,
        refused: false,
        refusal_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPolicy;

    fn context() -> AnalysisContext {
        AnalysisContext {
            applicable_policies: vec![ContextPolicy {
                id: "SEC-001".into(),
                name: "MFA Required for Privileged Access".into(),
                description: "All sudo operations require MFA".into(),
                frameworks: vec!["NIST-IA-2".into()],
                remediation: "Enable MFA for all privileged operations".into(),
            }],
            approved_remediations: vec!["Enable MFA for all privileged operations".into()],
            findings_text: "Privileged Command Without MFA: sudo executed without multi-factor".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_context_score_deductions() {
        let check = check_context(&AnalysisContext::default());
        assert_eq!(check.score, 15);
        assert!(!check.sufficient);
        assert_eq!(check.issues.len(), 4);

        let check = check_context(&context());
        assert_eq!(check.score, 75, "missing history and actor profile cost 25");
        assert!(check.sufficient);
        assert_eq!(check.recommendation, "Proceed");
    }

    #[test]
    fn test_parse_fenced_json_with_aliases() {
        let raw = "Here you go:\n```json\n{\"analysis\": \"Key leaked\", \"rootCause\": \"commit\", \"recommendations\": \"Rotate key\"}\n```";
        let parsed = parse_json_response(raw);
        assert_eq!(parsed.summary, "Key leaked");
        assert_eq!(parsed.root_cause.as_deref(), Some("commit"));
        assert_eq!(parsed.actions, vec!["Rotate key"]);
        assert!(parsed.parse_error.is_none());
    }

    #[test]
    fn test_parse_without_json_uses_text() {
        let parsed = parse_json_response("The server is on fire.");
        assert_eq!(parsed.summary, "The server is on fire.");
        assert_eq!(parsed.parse_error.as_deref(), Some("No JSON object found"));

        let parsed = parse_json_response("{not json}");
        assert!(parsed.parse_error.is_some());
        assert_eq!(parse_json_response("").summary, "No response received");
    }

    #[test]
    fn test_unapproved_actions_marked() {
        let response = ParsedResponse {
            summary: "MFA bypass".into(),
            root_cause: Some("sudo executed without multi-factor".into()),
            actions: vec!["Enable MFA for privileged users".into(), "Reboot the datacenter".into()],
            parse_error: None,
        };
        let outcome = validate_response(response, &context(), true);
        assert!(!outcome.valid);
        assert_eq!(outcome.response.actions[0], "Enable MFA for privileged users");
        assert_eq!(outcome.response.actions[1], "[UNVERIFIED] Reboot the datacenter");
        assert_eq!(outcome.response.root_cause.as_deref(), Some("sudo executed without multi-factor"));
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_unsupported_root_cause_is_inference() {
        let response = ParsedResponse {
            summary: "ok".into(),
            root_cause: Some("Cosmic radiation flipped memory bits".into()),
            actions: vec![],
            parse_error: None,
        };
        let outcome = validate_response(response, &context(), true);
        assert_eq!(outcome.response.root_cause.as_deref(), Some("[INFERENCE] Cosmic radiation flipped memory bits"));
    }

    #[test]
    fn test_strict_refusal_without_policies() {
        let outcome = validate_response(ParsedResponse::default(), &AnalysisContext::default(), true);
        assert!(outcome.refused);
        assert_eq!(outcome.response.actions, vec!["Manual review required - context insufficient"]);

        let outcome = validate_response(ParsedResponse::default(), &AnalysisContext::default(), false);
        assert!(!outcome.refused);
        assert!(outcome.valid);
    }

    #[test]
    fn test_unknown_framework_citation_warns() {
        let response = ParsedResponse {
            summary: "Violates SOC2-CC6.1, PCI-DSS-10.2 and FAKEREG-9.1 per SEC-001".into(),
            root_cause: None,
            actions: vec![],
            parse_error: None,
        };
        let outcome = validate_response(response, &context(), true);
        assert_eq!(outcome.warnings, vec!["Unknown framework cited: FAKEREG-9.1"]);
    }
}
