//! Expert agents.
//!
//! Each agent reads the shared [`PipelineRun`] and answers with an
//! [`AgentOutput`]; the pipeline merges outputs in order. Agents never
//! mutate the run directly.

mod anomaly;
mod audit;
mod compliance;
mod cost;
mod infrastructure;
mod insight;
mod normalizer;
mod resource;
mod security;
mod supervisor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use orbitr_protocol::{AgentFinding, AuditStep, Insight, Severity, StandardizedEvent};

use crate::pipeline::PipelineRun;
use crate::AgentError;

pub use anomaly::AnomalyDetector;
pub use audit::{assess_risk, AuditCoordinator};
pub use compliance::ComplianceSentinel;
pub use cost::CostAnalyst;
pub use infrastructure::{health_status, InfrastructureMonitor};
pub use insight::{rule_based_insight, InsightSynthesizer};
pub use normalizer::Normalizer;
pub use resource::ResourceWatcher;
pub use security::SecurityWatchdog;
pub use supervisor::{route, Supervisor};

/// Final risk figures computed by the audit coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub highest_severity: Severity,
    /// `saved` or `error: <reason>`.
    pub db_status: String,
}

/// What one agent contributes to a run.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub findings: Vec<AgentFinding>,
    pub audit: Option<AuditStep>,
    /// Replacement event (normalizer only).
    pub event: Option<StandardizedEvent>,
    /// Expert agents to run next (supervisor only).
    pub route: Option<Vec<String>>,
    pub insight: Option<Insight>,
    pub context_score: Option<u32>,
    pub llm_used: bool,
    pub guardrails_applied: bool,
    pub assessment: Option<RiskAssessment>,
}

impl AgentOutput {
    pub fn with_findings(findings: Vec<AgentFinding>, audit: AuditStep) -> Self {
        Self { findings, audit: Some(audit), ..Default::default() }
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &'static str;

    async fn analyze(&self, run: &PipelineRun) -> Result<AgentOutput, AgentError>;
}
