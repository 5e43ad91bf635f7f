//! The analysis pipeline.
//!
//! ```text
//! normalizer -> supervisor -> routed experts -> insight_synthesizer -> audit_coordinator
//! ```
//!
//! Stages run sequentially over one [`PipelineRun`]. A failing agent is
//! recorded in the audit trail and the run continues with the next stage.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use orbitr_protocol::{
    AgentFinding, AuditStep, Insight, Severity, StandardizedEvent, AGENT_ANOMALY_DETECTOR,
    AGENT_AUDIT_COORDINATOR, AGENT_COMPLIANCE_SENTINEL, AGENT_INSIGHT_SYNTHESIZER, AGENT_NORMALIZER,
    AGENT_SUPERVISOR,
};
use orbitr_state::{AuditRecord, AuditStore, HistorySource, RulesEngine};

use crate::agents::{
    assess_risk, rule_based_insight, Agent, AgentOutput, AnomalyDetector, AuditCoordinator, ComplianceSentinel,
    CostAnalyst, InfrastructureMonitor, InsightSynthesizer, Normalizer, ResourceWatcher, RiskAssessment,
    SecurityWatchdog, Supervisor,
};
use crate::llm::CompletionBackend;
use crate::tracer::Tracer;
use crate::AgentError;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Trace id of the run analysing `event_id`.
pub fn run_id_for(event_id: &str) -> String {
    format!("run_{event_id}")
}

/// State accumulated while one event moves through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: String,
    pub event: StandardizedEvent,
    pub agents_to_run: Vec<String>,
    pub agents_completed: Vec<String>,
    pub findings: Vec<AgentFinding>,
    pub audit_trail: Vec<AuditStep>,
    pub insight: Option<Insight>,
    pub context_score: u32,
    pub llm_used: bool,
    pub guardrails_applied: bool,
    pub assessment: Option<RiskAssessment>,
    started: Instant,
}

impl PipelineRun {
    pub fn new(event: StandardizedEvent) -> Self {
        Self {
            run_id: run_id_for(&event.event_id),
            event,
            agents_to_run: Vec::new(),
            agents_completed: Vec::new(),
            findings: Vec::new(),
            audit_trail: Vec::new(),
            insight: None,
            context_score: 0,
            llm_used: false,
            guardrails_applied: false,
            assessment: None,
            started: Instant::now(),
        }
    }

    /// Milliseconds since the run started, rounded to two decimals.
    pub fn elapsed_ms(&self) -> f64 {
        round2(self.started.elapsed().as_secs_f64() * 1000.0)
    }

    pub fn guardrails_passed(&self) -> bool {
        self.insight.as_ref().map(|i| i.guardrails_passed).unwrap_or(true)
    }

    /// The audit row for this run as it stands now.
    pub fn audit_record(&self, risk_score: f64) -> AuditRecord {
        let mut record = AuditRecord::for_event(&self.event);
        record.findings = self.findings.clone();
        if let Some(insight) = &self.insight {
            record.insight_text = insight.summary.clone();
            record.suggestions = insight.recommended_actions.clone();
        }
        record.risk_score = risk_score;
        record.processing_time_ms = self.elapsed_ms();
        record.context_score = self.context_score;
        record.guardrails_passed = self.guardrails_passed();
        record.llm_used = self.llm_used;
        record
    }

    fn apply(&mut self, agent_id: &str, output: AgentOutput, duration_ms: f64) {
        if let Some(event) = output.event {
            self.event = event;
        }
        if let Some(route) = output.route {
            self.agents_to_run = route;
        }
        self.findings.extend(output.findings);
        if let Some(insight) = output.insight {
            self.insight = Some(insight);
        }
        if let Some(score) = output.context_score {
            self.context_score = score;
        }
        self.llm_used |= output.llm_used;
        self.guardrails_applied |= output.guardrails_applied;
        if let Some(assessment) = output.assessment {
            self.assessment = Some(assessment);
        }
        if let Some(mut step) = output.audit {
            if step.duration_ms.is_none() {
                step.duration_ms = Some(round2(duration_ms));
            }
            self.audit_trail.push(step);
        }
        self.agents_completed.push(agent_id.to_string());
    }

    fn record_failure(&mut self, agent_id: &str, error: &AgentError) {
        tracing::warn!(run_id = %self.run_id, agent = agent_id, error = %error, "Agent failed");
        self.audit_trail.push(
            AuditStep::new("Agent Error", format!("{agent_id} failed: {error}"))
                .agent(agent_id)
                .detail("error", error.to_string()),
        );
        self.agents_completed.push(agent_id.to_string());
    }

    fn into_report(self) -> AnalysisReport {
        let assessment = self.assessment.clone().unwrap_or_else(|| {
            let (risk_score, highest_severity) = assess_risk(&self.findings);
            RiskAssessment { risk_score, highest_severity, db_status: "skipped".to_string() }
        });
        let insight = self
            .insight
            .clone()
            .unwrap_or_else(|| rule_based_insight(&self.event, &self.findings));
        let processing_time_ms = self.elapsed_ms();
        AnalysisReport {
            run_id: self.run_id,
            event: self.event,
            findings: self.findings,
            insight,
            risk_score: assessment.risk_score,
            highest_severity: assessment.highest_severity,
            db_status: assessment.db_status,
            agents_invoked: self.agents_completed,
            audit_trail: self.audit_trail,
            processing_time_ms,
            context_score: self.context_score,
            guardrails_applied: self.guardrails_applied,
            llm_used: self.llm_used,
        }
    }
}

/// Result of analysing one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: String,
    pub event: StandardizedEvent,
    pub findings: Vec<AgentFinding>,
    pub insight: Insight,
    pub risk_score: f64,
    pub highest_severity: Severity,
    pub db_status: String,
    pub agents_invoked: Vec<String>,
    pub audit_trail: Vec<AuditStep>,
    pub processing_time_ms: f64,
    pub context_score: u32,
    pub guardrails_applied: bool,
    pub llm_used: bool,
}

/// Everything the pipeline's agents need.
pub struct PipelineDeps {
    pub store: AuditStore,
    pub history: Arc<dyn HistorySource>,
    pub rules: Arc<RulesEngine>,
    pub llm: Option<Arc<dyn CompletionBackend>>,
    pub tracer: Arc<Tracer>,
    pub strict_guardrails: bool,
    pub max_tokens: u32,
}

impl PipelineDeps {
    /// Store-backed history, built-in rules, no LLM.
    pub fn with_store(store: AuditStore) -> Self {
        Self {
            history: Arc::new(store.clone()),
            store,
            rules: Arc::new(RulesEngine::with_builtins()),
            llm: None,
            tracer: Arc::new(Tracer::default()),
            strict_guardrails: true,
            max_tokens: 200,
        }
    }
}

pub struct Pipeline {
    agents: HashMap<&'static str, Box<dyn Agent>>,
    tracer: Arc<Tracer>,
    rules: Arc<RulesEngine>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        let PipelineDeps { store, history, rules, llm, tracer, strict_guardrails, max_tokens } = deps;
        let agents: Vec<Box<dyn Agent>> = vec![
            Box::new(Normalizer),
            Box::new(Supervisor),
            Box::new(SecurityWatchdog::new(history.clone(), tracer.clone())),
            Box::new(ComplianceSentinel::new(rules.clone())),
            Box::new(AnomalyDetector::new(history.clone(), tracer.clone())),
            Box::new(CostAnalyst),
            Box::new(ResourceWatcher),
            Box::new(InfrastructureMonitor),
            Box::new(InsightSynthesizer::new(history, llm, tracer.clone(), strict_guardrails, max_tokens)),
            Box::new(AuditCoordinator::new(store, tracer.clone())),
        ];
        Self {
            agents: agents.into_iter().map(|a| (a.id(), a)).collect(),
            tracer,
            rules,
        }
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub fn rules(&self) -> &Arc<RulesEngine> {
        &self.rules
    }

    async fn step(&self, agent_id: &str, run: &mut PipelineRun) {
        let Some(agent) = self.agents.get(agent_id) else {
            run.record_failure(agent_id, &AgentError::UnknownAgent(agent_id.to_string()));
            return;
        };
        let started = Instant::now();
        match agent.analyze(run).await {
            Ok(output) => {
                let ms = started.elapsed().as_secs_f64() * 1000.0;
                run.apply(agent.id(), output, ms);
            }
            Err(e) => run.record_failure(agent.id(), &e),
        }
    }

    /// Run every stage for `event`.
    pub async fn run(&self, event: StandardizedEvent) -> AnalysisReport {
        let mut run = PipelineRun::new(event);
        self.tracer.start_run(&run.run_id);
        tracing::debug!(
            run_id = %run.run_id,
            event_type = %run.event.event_type,
            severity = %run.event.severity,
            "Pipeline started"
        );

        self.step(AGENT_NORMALIZER, &mut run).await;
        self.step(AGENT_SUPERVISOR, &mut run).await;
        if run.agents_to_run.is_empty() {
            run.agents_to_run = [AGENT_COMPLIANCE_SENTINEL, AGENT_ANOMALY_DETECTOR]
                .iter()
                .map(|a| a.to_string())
                .collect();
        }
        for agent_id in run.agents_to_run.clone() {
            self.step(&agent_id, &mut run).await;
        }
        self.step(AGENT_INSIGHT_SYNTHESIZER, &mut run).await;
        self.step(AGENT_AUDIT_COORDINATOR, &mut run).await;

        let report = run.into_report();
        tracing::info!(
            event_id = %report.event.event_id,
            event_type = %report.event.event_type,
            risk = report.risk_score,
            findings = report.findings.len(),
            ms = report.processing_time_ms,
            "Event analysed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_stay_distinct_for_shared_prefixes() {
        let a = run_id_for("metric_1700000000001");
        let b = run_id_for("metric_1700000000002");
        assert_ne!(a, b, "ids differing after the eighth char must not collide");
        assert_eq!(a, "run_metric_1700000000001");
    }

    #[test]
    fn test_new_run_takes_its_id_from_the_event() {
        let mut event = StandardizedEvent::new("metric_alert", "datadog");
        event.event_id = "demo_sec_001".into();
        let run = PipelineRun::new(event);
        assert_eq!(run.run_id, "run_demo_sec_001");
    }
}
