//! Compliance workflow state machine.
//!
//! A workflow is created from a template (change approval, access review,
//! incident response) and walks its steps one at a time:
//!
//! ```text
//! pending ──advance──▶ in_progress (next step auto)
//!                   └▶ awaiting_approval (next step manual)
//!                   └▶ completed (past the last step)
//! any open state ──reject──▶ rejected
//! any open state ──escalate──▶ escalated ──unblock──▶ (advance)
//! any state ──reset──▶ pending at step 0
//! ```
//!
//! Workflows are persisted through [`AuditStore`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use orbitr_protocol::{now_unix, Severity, StandardizedEvent};

use crate::store::AuditStore;
use crate::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    AwaitingApproval,
    Approved,
    Rejected,
    Completed,
    Escalated,
    Expired,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::AwaitingApproval => "awaiting_approval",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Rejected => "rejected",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Escalated => "escalated",
            WorkflowStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => WorkflowStatus::Pending,
            "in_progress" => WorkflowStatus::InProgress,
            "awaiting_approval" => WorkflowStatus::AwaitingApproval,
            "approved" => WorkflowStatus::Approved,
            "rejected" => WorkflowStatus::Rejected,
            "completed" => WorkflowStatus::Completed,
            "escalated" => WorkflowStatus::Escalated,
            "expired" => WorkflowStatus::Expired,
            _ => return None,
        })
    }

    /// Completed and rejected workflows accept no further transitions
    /// other than reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub required_action: String,
    pub auto: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Static template a workflow is instantiated from.
pub struct WorkflowTemplate {
    pub workflow_type: &'static str,
    /// (name, required_action, auto, condition)
    pub steps: &'static [(&'static str, &'static str, bool, Option<&'static str>)],
    pub timeout_hours: u32,
    pub escalation_hours: u32,
}

pub const CHANGE_APPROVAL: &str = "change_approval";
pub const ACCESS_REVIEW: &str = "access_review";
pub const INCIDENT_RESPONSE: &str = "incident_response";

pub static TEMPLATES: [WorkflowTemplate; 3] = [
    WorkflowTemplate {
        workflow_type: CHANGE_APPROVAL,
        steps: &[
            ("request_submitted", "submit", true, None),
            ("risk_assessment", "assess", true, None),
            ("manager_approval", "approve", false, None),
            ("cab_review", "review", false, Some("high_risk")),
            ("implementation", "implement", true, None),
            ("verification", "verify", true, None),
        ],
        timeout_hours: 72,
        escalation_hours: 24,
    },
    WorkflowTemplate {
        workflow_type: ACCESS_REVIEW,
        steps: &[
            ("access_requested", "request", true, None),
            ("identity_verification", "verify", true, None),
            ("manager_approval", "approve", false, None),
            ("security_review", "review", false, Some("privileged")),
            ("access_granted", "grant", true, None),
        ],
        timeout_hours: 48,
        escalation_hours: 12,
    },
    WorkflowTemplate {
        workflow_type: INCIDENT_RESPONSE,
        steps: &[
            ("incident_detected", "detect", true, None),
            ("triage", "triage", true, None),
            ("investigation", "investigate", false, None),
            ("containment", "contain", false, None),
            ("remediation", "remediate", false, None),
            ("post_mortem", "review", false, None),
        ],
        timeout_hours: 168,
        escalation_hours: 4,
    },
];

pub fn template(workflow_type: &str) -> Option<&'static WorkflowTemplate> {
    TEMPLATES.iter().find(|t| t.workflow_type == workflow_type)
}

/// Presentation of one step for detail views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub name: String,
    pub description: String,
    pub agent: String,
    pub status: String,
    pub completed_at: Option<f64>,
    pub completed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn step_description(name: &str) -> (&'static str, &'static str) {
    match name {
        "request_submitted" => ("Change request submitted for processing", "System"),
        "risk_assessment" => ("Automated compliance and risk assessment", "Compliance Sentinel"),
        "manager_approval" => ("Awaiting manager or supervisor approval", "Supervisor Agent"),
        "cab_review" => ("Change advisory board review for high-risk changes", "Supervisor Agent"),
        "implementation" => ("Deployment to production environment", "Infrastructure Monitor"),
        "verification" => ("Post-change verification and health checks", "Infrastructure Monitor"),
        "access_requested" => ("Access request received", "System"),
        "identity_verification" => ("Identity and access verification", "Identity Service"),
        "security_review" => ("Security review of privileged access", "Security Watchdog"),
        "access_granted" => ("Provisioning access to requested resources", "Access Controller"),
        "incident_detected" => ("Incident raised by monitoring agents", "Security Watchdog"),
        "triage" => ("Assessing incident severity and impact", "Incident Manager"),
        "investigation" => ("Investigating root cause", "Security Watchdog"),
        "containment" => ("Containing the affected systems", "Incident Manager"),
        "remediation" => ("Implementing resolution and recovery", "Incident Manager"),
        "post_mortem" => ("Post-incident review", "Incident Manager"),
        _ => ("Processing step", "System"),
    }
}

/// `request_submitted` → `Request Submitted`.
pub fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub workflow_type: String,
    pub correlation_id: String,
    pub status: WorkflowStatus,
    pub created_at: f64,
    pub updated_at: f64,
    pub requester_id: Option<String>,
    pub approver_id: Option<String>,
    pub current_step: usize,
    pub steps: Vec<WorkflowStep>,
    pub metadata: Map<String, Value>,
}

impl Workflow {
    /// Instantiate a template. Fails for unknown workflow types.
    pub fn from_template(
        workflow_type: &str,
        correlation_id: &str,
        requester_id: Option<&str>,
        metadata: Map<String, Value>,
    ) -> Result<Self, StateError> {
        let template = template(workflow_type)
            .ok_or_else(|| StateError::UnknownWorkflowType(workflow_type.to_string()))?;
        let now = now_unix();
        Ok(Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            workflow_type: workflow_type.to_string(),
            correlation_id: correlation_id.to_string(),
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
            requester_id: requester_id.map(str::to_string),
            approver_id: None,
            current_step: 0,
            steps: template
                .steps
                .iter()
                .map(|(name, action, auto, condition)| WorkflowStep {
                    name: name.to_string(),
                    required_action: action.to_string(),
                    auto: *auto,
                    condition: condition.map(str::to_string),
                    completed_at: None,
                    completed_by: None,
                    comment: None,
                })
                .collect(),
            metadata,
        })
    }

    pub fn current(&self) -> Option<&WorkflowStep> {
        self.steps.get(self.current_step)
    }

    /// Mark the current step done and move on, updating the status.
    fn complete_current_step(&mut self, actor_id: Option<&str>, comment: Option<&str>, now: f64) {
        if let Some(step) = self.steps.get_mut(self.current_step) {
            step.completed_at = Some(now);
            step.completed_by = actor_id.map(str::to_string);
            if let Some(comment) = comment {
                step.comment = Some(comment.to_string());
            }
        }
        self.current_step = (self.current_step + 1).min(self.steps.len());
        self.updated_at = now;
        self.status = match self.steps.get(self.current_step) {
            None => WorkflowStatus::Completed,
            Some(next) if next.auto => WorkflowStatus::InProgress,
            Some(_) => WorkflowStatus::AwaitingApproval,
        };
    }

    fn ensure_open(&self) -> Result<(), StateError> {
        if self.status.is_terminal() || self.current_step >= self.steps.len() {
            return Err(StateError::WorkflowClosed(self.workflow_id.clone()));
        }
        Ok(())
    }

    /// Advance only if `action` matches the current step's required action.
    /// Returns whether the workflow moved.
    pub fn advance(&mut self, action: &str, actor_id: Option<&str>) -> Result<bool, StateError> {
        self.ensure_open()?;
        let matches = self
            .current()
            .map(|s| s.required_action == action)
            .unwrap_or(false);
        if !matches {
            return Ok(false);
        }
        self.complete_current_step(actor_id, None, now_unix());
        Ok(true)
    }

    /// Advance regardless of the required action.
    pub fn force_advance(&mut self, actor_id: &str, comment: Option<&str>) -> Result<(), StateError> {
        self.ensure_open()?;
        self.complete_current_step(Some(actor_id), comment, now_unix());
        self.approver_id = Some(actor_id.to_string());
        self.metadata.remove("blocked_reason");
        Ok(())
    }

    pub fn reject(&mut self, reason: &str, actor_id: &str) -> Result<(), StateError> {
        self.ensure_open()?;
        self.status = WorkflowStatus::Rejected;
        self.metadata.insert("rejected_reason".into(), Value::from(reason));
        self.metadata.insert("rejected_by".into(), Value::from(actor_id));
        self.updated_at = now_unix();
        Ok(())
    }

    pub fn escalate(&mut self, reason: &str, extra: Map<String, Value>) -> Result<(), StateError> {
        self.ensure_open()?;
        self.status = WorkflowStatus::Escalated;
        self.metadata.insert("blocked_reason".into(), Value::from(reason));
        self.metadata.extend(extra);
        self.updated_at = now_unix();
        Ok(())
    }

    /// Back to step 0 and pending, clearing step completion marks.
    pub fn reset(&mut self) {
        let now = now_unix();
        self.current_step = 0;
        self.status = WorkflowStatus::Pending;
        self.approver_id = None;
        for step in &mut self.steps {
            step.completed_at = None;
            step.completed_by = None;
            step.comment = None;
        }
        for key in ["blocked_reason", "rejected_reason", "rejected_by"] {
            self.metadata.remove(key);
        }
        self.metadata.insert("reset_at".into(), Value::from(now));
        self.updated_at = now;
    }

    /// Apply timeout and escalation windows. Returns whether the status changed.
    pub fn apply_deadlines(&mut self, now: f64) -> bool {
        if self.status.is_terminal()
            || matches!(self.status, WorkflowStatus::Expired | WorkflowStatus::Escalated)
        {
            return false;
        }
        let Some(template) = template(&self.workflow_type) else {
            return false;
        };
        if now - self.created_at > f64::from(template.timeout_hours) * 3600.0 {
            self.status = WorkflowStatus::Expired;
            self.updated_at = now;
            return true;
        }
        if self.status == WorkflowStatus::AwaitingApproval
            && now - self.updated_at > f64::from(template.escalation_hours) * 3600.0
        {
            self.status = WorkflowStatus::Escalated;
            self.metadata
                .insert("blocked_reason".into(), Value::from("Approval overdue"));
            self.updated_at = now;
            return true;
        }
        false
    }

    pub fn step_views(&self) -> Vec<StepView> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let (description, agent) = step_description(&step.name);
                let status = if i < self.current_step {
                    "completed"
                } else if i == self.current_step {
                    "in_progress"
                } else {
                    "pending"
                };
                StepView {
                    name: title_case(&step.name),
                    description: description.to_string(),
                    agent: agent.to_string(),
                    status: status.to_string(),
                    completed_at: step.completed_at,
                    completed_by: step.completed_by.clone(),
                    comment: step.comment.clone(),
                }
            })
            .collect()
    }
}

/// Which workflow (if any) an event should open.
pub fn detect_trigger(event: &StandardizedEvent) -> Option<&'static str> {
    let event_type = event.event_type_lower();
    let has = |words: &[&str]| words.iter().any(|w| event_type.contains(w));

    if has(&["deployment", "change", "release"]) {
        return Some(CHANGE_APPROVAL);
    }
    if has(&["access", "permission", "role"])
        && (event.payload_bool("privileged").unwrap_or(false) || event.severity.is_high())
    {
        return Some(ACCESS_REVIEW);
    }
    if event.severity == Severity::Critical || has(&["breach", "incident", "attack"]) {
        return Some(INCIDENT_RESPONSE);
    }
    None
}

/// Store-backed workflow operations.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: AuditStore,
}

impl WorkflowEngine {
    pub fn new(store: AuditStore) -> Self {
        Self { store }
    }

    pub fn create(
        &self,
        workflow_type: &str,
        correlation_id: &str,
        requester_id: Option<&str>,
        metadata: Map<String, Value>,
    ) -> Result<Workflow, StateError> {
        let workflow = Workflow::from_template(workflow_type, correlation_id, requester_id, metadata)?;
        self.store.save_workflow(&workflow)?;
        tracing::info!(
            workflow_id = %workflow.workflow_id,
            workflow_type,
            correlation_id,
            "Workflow created"
        );
        Ok(workflow)
    }

    pub fn get(&self, workflow_id: &str) -> Result<Option<Workflow>, StateError> {
        self.store.load_workflow(workflow_id)
    }

    fn update<F>(&self, workflow_id: &str, f: F) -> Result<Workflow, StateError>
    where
        F: FnOnce(&mut Workflow) -> Result<(), StateError>,
    {
        let mut workflow = self
            .store
            .load_workflow(workflow_id)?
            .ok_or_else(|| StateError::WorkflowNotFound(workflow_id.to_string()))?;
        f(&mut workflow)?;
        self.store.save_workflow(&workflow)?;
        tracing::debug!(
            workflow_id,
            status = workflow.status.as_str(),
            step = workflow.current_step,
            "Workflow updated"
        );
        Ok(workflow)
    }

    /// Action-matched advance; a mismatched action leaves the workflow as is.
    pub fn advance(&self, workflow_id: &str, action: &str, actor_id: Option<&str>) -> Result<Workflow, StateError> {
        self.update(workflow_id, |w| w.advance(action, actor_id).map(|_| ()))
    }

    pub fn force_advance(&self, workflow_id: &str, actor_id: &str, comment: Option<&str>) -> Result<Workflow, StateError> {
        self.update(workflow_id, |w| w.force_advance(actor_id, comment))
    }

    pub fn approve(&self, workflow_id: &str, actor_id: &str) -> Result<Workflow, StateError> {
        self.force_advance(workflow_id, actor_id, Some("Approved"))
    }

    pub fn reject(&self, workflow_id: &str, reason: &str, actor_id: &str) -> Result<Workflow, StateError> {
        self.update(workflow_id, |w| w.reject(reason, actor_id))
    }

    pub fn unblock(&self, workflow_id: &str, reason: &str) -> Result<Workflow, StateError> {
        let comment = format!("Unblocked: {reason}");
        self.force_advance(workflow_id, "admin", Some(&comment))
    }

    pub fn reset(&self, workflow_id: &str) -> Result<Workflow, StateError> {
        self.update(workflow_id, |w| {
            w.reset();
            Ok(())
        })
    }

    pub fn escalate(&self, workflow_id: &str, reason: &str, extra: Map<String, Value>) -> Result<Workflow, StateError> {
        self.update(workflow_id, |w| w.escalate(reason, extra))
    }

    pub fn all(&self) -> Result<Vec<Workflow>, StateError> {
        self.store.list_workflows()
    }

    /// Workflows that are neither completed nor rejected.
    pub fn pending(&self) -> Result<Vec<Workflow>, StateError> {
        Ok(self
            .store
            .list_workflows()?
            .into_iter()
            .filter(|w| !w.status.is_terminal())
            .collect())
    }

    pub fn by_correlation(&self, correlation_id: &str) -> Result<Vec<Workflow>, StateError> {
        self.store.workflows_by_correlation(correlation_id)
    }

    /// Expire or escalate workflows past their template deadlines.
    pub fn expire_stale(&self, now: f64) -> Result<Vec<Workflow>, StateError> {
        let mut changed = Vec::new();
        for mut workflow in self.pending()? {
            if workflow.apply_deadlines(now) {
                self.store.save_workflow(&workflow)?;
                tracing::info!(
                    workflow_id = %workflow.workflow_id,
                    status = workflow.status.as_str(),
                    "Workflow deadline reached"
                );
                changed.push(workflow);
            }
        }
        Ok(changed)
    }
}
